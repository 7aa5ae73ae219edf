//! Per-call operation parameters carried by every command.

// self
use crate::{
	_prelude::*,
	auth::{AccountRecord, ClientId, ScopeSet},
};

/// Errors raised while parsing an [`Authority`].
#[derive(Debug, ThisError)]
pub enum AuthorityError {
	/// The authority is not a valid URL.
	#[error("Authority URL is invalid.")]
	InvalidUrl(#[from] url::ParseError),
	/// Authorities must be served over HTTPS.
	#[error("Authority must use https, found `{scheme}`.")]
	NotHttps {
		/// Scheme found in the URL.
		scheme: String,
	},
	/// The URL path does not name a tenant.
	#[error("Authority URL does not name a tenant.")]
	MissingTenant,
}

/// Token-issuing authority such as `https://login.microsoftonline.com/common`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Url", into = "Url")]
pub struct Authority(Url);
impl Authority {
	/// Parses and validates an authority URL.
	pub fn parse(value: &str) -> Result<Self, AuthorityError> {
		Self::try_from(Url::parse(value)?)
	}

	/// Host the authority lives on; used as the account environment.
	pub fn host(&self) -> &str {
		self.0.host_str().unwrap_or_default()
	}

	/// First path segment naming the tenant.
	pub fn tenant(&self) -> &str {
		self.0.path_segments().and_then(|mut segments| segments.next()).unwrap_or_default()
	}

	/// Returns the underlying URL.
	pub fn url(&self) -> &Url {
		&self.0
	}
}
impl TryFrom<Url> for Authority {
	type Error = AuthorityError;

	fn try_from(url: Url) -> Result<Self, Self::Error> {
		if url.scheme() != "https" {
			return Err(AuthorityError::NotHttps { scheme: url.scheme().to_owned() });
		}
		if url.path_segments().and_then(|mut segments| segments.next()).is_none_or(str::is_empty) {
			return Err(AuthorityError::MissingTenant);
		}

		Ok(Self(url))
	}
}
impl From<Authority> for Url {
	fn from(value: Authority) -> Self {
		value.0
	}
}
impl Display for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.0.as_str())
	}
}

/// Token binding requested by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthenticationScheme {
	/// Plain bearer tokens.
	#[default]
	Bearer,
	/// Proof-of-possession tokens bound to an HTTP request.
	Pop {
		/// HTTP method of the protected request.
		http_method: Option<String>,
		/// URL of the protected request.
		url: Url,
		/// Server nonce, when the resource supplied one.
		nonce: Option<String>,
	},
}
impl AuthenticationScheme {
	/// Returns a stable scheme label.
	pub const fn name(&self) -> &'static str {
		match self {
			AuthenticationScheme::Bearer => "Bearer",
			AuthenticationScheme::Pop { .. } => "PoP",
		}
	}
}

/// Immutable request description shared by every controller a command tries.
///
/// Equality and hashing ignore `correlation_id`, which changes on every call; everything else
/// participates in command identity and therefore in de-duplication and result caching.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationParameters {
	/// Application (client) id.
	pub client_id: ClientId,
	/// Redirect URI registered for the client.
	pub redirect_uri: String,
	/// Requested scopes.
	pub scopes: ScopeSet,
	/// Target authority.
	pub authority: Authority,
	/// Account the operation targets, when one is known.
	pub account: Option<AccountRecord>,
	/// Token binding.
	pub auth_scheme: AuthenticationScheme,
	/// Caller-supplied correlation id.
	pub correlation_id: Option<String>,
	/// Skip cached access tokens and refresh unconditionally.
	pub force_refresh: bool,
	/// Claims challenge forwarded to the authority.
	pub claims: Option<String>,
	/// Minimum broker protocol version the caller requires.
	pub required_broker_protocol_version: Option<String>,
}
impl OperationParameters {
	/// Creates parameters with bearer scheme and no target account.
	pub fn new(
		client_id: ClientId,
		redirect_uri: impl Into<String>,
		authority: Authority,
		scopes: ScopeSet,
	) -> Self {
		Self {
			client_id,
			redirect_uri: redirect_uri.into(),
			scopes,
			authority,
			account: None,
			auth_scheme: AuthenticationScheme::default(),
			correlation_id: None,
			force_refresh: false,
			claims: None,
			required_broker_protocol_version: None,
		}
	}

	/// Targets an account.
	pub fn with_account(mut self, account: AccountRecord) -> Self {
		self.account = Some(account);

		self
	}

	/// Overrides the token binding.
	pub fn with_auth_scheme(mut self, scheme: AuthenticationScheme) -> Self {
		self.auth_scheme = scheme;

		self
	}

	/// Sets the correlation id.
	pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());

		self
	}

	/// Forces a refresh even when a valid access token is cached.
	pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
		self.force_refresh = force_refresh;

		self
	}

	/// Forwards a claims challenge.
	pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
		self.claims = Some(claims.into());

		self
	}

	/// Requires a minimum broker protocol version.
	pub fn with_required_broker_protocol_version(mut self, version: impl Into<String>) -> Self {
		self.required_broker_protocol_version = Some(version.into());

		self
	}

	#[allow(clippy::type_complexity)]
	fn identity(
		&self,
	) -> (
		&ClientId,
		&str,
		&ScopeSet,
		&Authority,
		Option<&AccountRecord>,
		&AuthenticationScheme,
		bool,
		Option<&str>,
		Option<&str>,
	) {
		(
			&self.client_id,
			&self.redirect_uri,
			&self.scopes,
			&self.authority,
			self.account.as_ref(),
			&self.auth_scheme,
			self.force_refresh,
			self.claims.as_deref(),
			self.required_broker_protocol_version.as_deref(),
		)
	}
}
impl PartialEq for OperationParameters {
	fn eq(&self, other: &Self) -> bool {
		self.identity() == other.identity()
	}
}
impl Eq for OperationParameters {}
impl Hash for OperationParameters {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.identity().hash(state);
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::hash::DefaultHasher;
	// self
	use super::*;

	fn params() -> OperationParameters {
		OperationParameters::new(
			ClientId::new("client-1").expect("Client fixture should be valid."),
			"msauth://com.example.app/hash",
			Authority::parse("https://login.microsoftonline.com/common")
				.expect("Authority fixture should be valid."),
			ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
		)
	}

	fn hash_of(value: &OperationParameters) -> u64 {
		let mut hasher = DefaultHasher::new();

		value.hash(&mut hasher);

		hasher.finish()
	}

	#[test]
	fn authority_validates_scheme_and_tenant() {
		let authority = Authority::parse("https://login.microsoftonline.com/contoso.onmicrosoft.com")
			.expect("Tenant authority should parse.");

		assert_eq!(authority.host(), "login.microsoftonline.com");
		assert_eq!(authority.tenant(), "contoso.onmicrosoft.com");
		assert!(matches!(
			Authority::parse("http://login.microsoftonline.com/common"),
			Err(AuthorityError::NotHttps { .. })
		));
		assert!(matches!(
			Authority::parse("https://login.microsoftonline.com/"),
			Err(AuthorityError::MissingTenant)
		));
	}

	#[test]
	fn correlation_id_does_not_affect_identity() {
		let lhs = params().with_correlation_id("a");
		let rhs = params().with_correlation_id("b");

		assert_eq!(lhs, rhs);
		assert_eq!(hash_of(&lhs), hash_of(&rhs));
		assert_ne!(lhs, params().with_force_refresh(true));
	}
}
