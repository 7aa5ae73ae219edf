//! Account and credential projections exchanged with token caches and brokers.

// self
use crate::{
	_prelude::*,
	auth::{HomeAccountId, LocalAccountId, ScopeSet, TokenSecret},
};

/// Safety margin applied when deciding whether a cached access token is still usable.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::minutes(5);

/// Credential families stored per account.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
	/// Bearer or PoP access token.
	AccessToken,
	/// Refresh token.
	RefreshToken,
	/// OIDC id token.
	IdToken,
}

/// Account projection for one home account in one environment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRecord {
	/// Cross-tenant home account identifier.
	pub home_account_id: HomeAccountId,
	/// Tenant-local object identifier.
	pub local_account_id: Option<LocalAccountId>,
	/// Authority host the account was signed in against.
	pub environment: String,
	/// Tenant the projection belongs to.
	pub realm: Option<String>,
	/// Preferred username (UPN or email).
	pub username: Option<String>,
	/// Display name.
	pub name: Option<String>,
}
impl AccountRecord {
	/// Creates a bare account projection.
	pub fn new(home_account_id: HomeAccountId, environment: impl Into<String>) -> Self {
		Self {
			home_account_id,
			local_account_id: None,
			environment: environment.into(),
			realm: None,
			username: None,
			name: None,
		}
	}

	/// Sets the tenant-local identifier.
	pub fn with_local_account_id(mut self, id: LocalAccountId) -> Self {
		self.local_account_id = Some(id);

		self
	}

	/// Sets the tenant.
	pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
		self.realm = Some(realm.into());

		self
	}

	/// Sets the preferred username.
	pub fn with_username(mut self, username: impl Into<String>) -> Self {
		self.username = Some(username.into());

		self
	}
}

/// Cached access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenRecord {
	/// Token value.
	pub secret: TokenSecret,
	/// Scopes the token was granted for.
	pub scopes: ScopeSet,
	/// Instant the token entered the cache.
	pub cached_at: OffsetDateTime,
	/// Instant the token stops being accepted.
	pub expires_on: OffsetDateTime,
}
impl AccessTokenRecord {
	/// Returns true when the token expires within `buffer` of `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime, buffer: Duration) -> bool {
		now.checked_add(buffer).is_none_or(|limit| self.expires_on <= limit)
	}

	/// Same as [`is_expired_at`](Self::is_expired_at) with the current clock and default buffer.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc(), DEFAULT_EXPIRY_BUFFER)
	}
}

/// Credentials resolved for one account projection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
	/// Account the credentials belong to.
	pub account: AccountRecord,
	/// Access token, if one is cached.
	pub access_token: Option<AccessTokenRecord>,
	/// Refresh token, if one is cached.
	pub refresh_token: Option<TokenSecret>,
	/// Raw id token, if one is cached.
	pub id_token: Option<TokenSecret>,
}
impl CacheRecord {
	/// Creates a record without credentials.
	pub fn new(account: AccountRecord) -> Self {
		Self { account, access_token: None, refresh_token: None, id_token: None }
	}

	/// Drops the credential of the given kind, returning whether one was present.
	pub fn take_credential(&mut self, kind: CredentialKind) -> bool {
		match kind {
			CredentialKind::AccessToken => self.access_token.take().is_some(),
			CredentialKind::RefreshToken => self.refresh_token.take().is_some(),
			CredentialKind::IdToken => self.id_token.take().is_some(),
		}
	}
}
