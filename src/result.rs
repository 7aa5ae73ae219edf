//! Authorization, token, and command result models.

// self
use crate::{
	_prelude::*,
	auth::{AccountRecord, CacheRecord, ScopeSet, TokenSecret},
	error::{ServerTelemetry, codes},
};

/// Terminal status of an authorization (UI) step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
	/// An authorization code was returned.
	Success,
	/// The authorization endpoint returned an error.
	Fail,
	/// The user closed the UI.
	UserCancel,
	/// The SDK tore the UI down.
	SdkCancel,
}

/// Error payload of a failed authorization step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationErrorResponse {
	/// OAuth error code.
	pub error: String,
	/// Human-readable description.
	pub error_description: Option<String>,
	/// Account the server asked to register, for device-registration redirects.
	pub upn_to_register: Option<String>,
}
impl AuthorizationErrorResponse {
	/// Creates an error payload.
	pub fn new(error: impl Into<String>, description: Option<String>) -> Self {
		Self { error: error.into(), error_description: description, upn_to_register: None }
	}
}

/// Successful authorization payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResponse {
	/// Authorization code to redeem.
	pub code: TokenSecret,
	/// Echoed `state` parameter.
	pub state: Option<String>,
	/// PKCE verifier of the request that produced the code.
	pub code_verifier: Option<TokenSecret>,
}

/// Outcome of the authorization step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationResult {
	/// Terminal status.
	pub status: AuthorizationStatus,
	/// Success payload.
	pub response: Option<AuthorizationResponse>,
	/// Error payload.
	pub error: Option<AuthorizationErrorResponse>,
}
impl AuthorizationResult {
	/// Successful authorization.
	pub fn success(response: AuthorizationResponse) -> Self {
		Self { status: AuthorizationStatus::Success, response: Some(response), error: None }
	}

	/// Failed or cancelled authorization.
	pub fn failure(status: AuthorizationStatus, error: Option<AuthorizationErrorResponse>) -> Self {
		Self { status, response: None, error }
	}

	/// SDK-initiated cancellation.
	pub fn sdk_cancel() -> Self {
		Self::failure(
			AuthorizationStatus::SdkCancel,
			Some(AuthorizationErrorResponse::new(
				codes::AUTHORIZATION_CANCELLED_BY_SDK,
				Some("Authorization was cancelled by a newer interactive request.".into()),
			)),
		)
	}

	/// Returns true when an authorization code is available.
	pub fn is_success(&self) -> bool {
		self.status == AuthorizationStatus::Success && self.response.is_some()
	}
}

/// Error payload returned by the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenErrorResponse {
	/// OAuth error code.
	pub error: String,
	/// Human-readable description.
	pub error_description: Option<String>,
	/// OAuth sub-error code.
	pub sub_error: Option<String>,
	/// HTTP status of the response.
	pub status_code: Option<u16>,
}
impl TokenErrorResponse {
	/// Creates an error payload with only the OAuth error code.
	pub fn new(error: impl Into<String>) -> Self {
		Self { error: error.into(), error_description: None, sub_error: None, status_code: None }
	}

	/// Sets the description.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}

	/// Sets the sub-error code.
	pub fn with_sub_error(mut self, sub_error: impl Into<String>) -> Self {
		self.sub_error = Some(sub_error.into());

		self
	}

	/// Sets the HTTP status.
	pub fn with_status_code(mut self, status: u16) -> Self {
		self.status_code = Some(status);

		self
	}
}

/// Successful token endpoint payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Issued access token.
	pub access_token: TokenSecret,
	/// Issued or rotated refresh token.
	pub refresh_token: Option<TokenSecret>,
	/// Raw id token.
	pub id_token: Option<TokenSecret>,
	/// Access token lifetime.
	pub expires_in: Duration,
	/// Granted scopes when they differ from the request.
	pub scopes: Option<ScopeSet>,
	/// Account resolved from the id token and client info.
	pub account: Option<AccountRecord>,
}

/// Outcome of a token request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
	/// Success payload.
	pub response: Option<TokenResponse>,
	/// Error payload.
	pub error: Option<TokenErrorResponse>,
	/// Server diagnostics captured from the response.
	pub telemetry: Option<ServerTelemetry>,
}
impl TokenResult {
	/// Successful token result.
	pub fn success(response: TokenResponse) -> Self {
		Self { response: Some(response), error: None, telemetry: None }
	}

	/// Failed token result.
	pub fn failure(error: TokenErrorResponse) -> Self {
		Self { response: None, error: Some(error), telemetry: None }
	}

	/// Attaches server diagnostics.
	pub fn with_telemetry(mut self, telemetry: ServerTelemetry) -> Self {
		self.telemetry = Some(telemetry);

		self
	}

	/// Returns true when a token was issued without an error.
	pub fn is_success(&self) -> bool {
		self.response.is_some() && self.error.is_none()
	}
}

/// Token and account projection handed to the application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAuthenticationResult {
	/// Access token.
	pub access_token: TokenSecret,
	/// Access token expiry.
	pub expires_on: OffsetDateTime,
	/// Scopes the token is valid for.
	pub scopes: ScopeSet,
	/// Account the token belongs to.
	pub account: AccountRecord,
	/// Tenant that issued the token.
	pub tenant_id: Option<String>,
	/// Raw id token.
	pub id_token: Option<TokenSecret>,
	/// True when no network request was made.
	pub served_from_cache: bool,
	/// Correlation id of the command that produced the result.
	pub correlation_id: Option<String>,
}
impl LocalAuthenticationResult {
	/// Projects a cache record; `None` when it holds no access token.
	pub fn from_cache_record(record: &CacheRecord, served_from_cache: bool) -> Option<Self> {
		let access_token = record.access_token.as_ref()?;

		Some(Self {
			access_token: access_token.secret.clone(),
			expires_on: access_token.expires_on,
			scopes: access_token.scopes.clone(),
			account: record.account.clone(),
			tenant_id: record.account.realm.clone(),
			id_token: record.id_token.clone(),
			served_from_cache,
			correlation_id: None,
		})
	}
}

/// Combined outcome of a token-acquiring controller call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcquireTokenResult {
	/// Authorization step, for interactive flows.
	pub authorization: Option<AuthorizationResult>,
	/// Token request outcome.
	pub token: Option<TokenResult>,
	/// Resolved projection, present only on success.
	pub local: Option<LocalAuthenticationResult>,
}
impl AcquireTokenResult {
	/// Successful result.
	pub fn from_local(local: LocalAuthenticationResult) -> Self {
		Self { local: Some(local), ..Default::default() }
	}

	/// Result whose authorization step did not succeed.
	pub fn from_authorization(authorization: AuthorizationResult) -> Self {
		Self { authorization: Some(authorization), ..Default::default() }
	}

	/// Result whose token request did not succeed.
	pub fn from_token(token: TokenResult) -> Self {
		Self { token: Some(token), ..Default::default() }
	}

	/// True when a projection exists and no recorded step failed.
	pub fn succeeded(&self) -> bool {
		self.local.is_some()
			&& self.authorization.as_ref().is_none_or(AuthorizationResult::is_success)
			&& self.token.as_ref().is_none_or(TokenResult::is_success)
	}

	/// OAuth error code of the failed token step, if any.
	pub fn token_error_code(&self) -> Option<&str> {
		self.token.as_ref()?.error.as_ref().map(|error| error.error.as_str())
	}
}

/// Value delivered to `on_task_completed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutput {
	/// Token acquisition result.
	Token(LocalAuthenticationResult),
	/// Account listing.
	Accounts(Vec<AccountRecord>),
	/// Whether an account was removed.
	Removed(bool),
	/// Whether the device runs in shared-device mode.
	SharedDeviceMode(bool),
}

/// Terminal status of a command.
#[derive(Clone, Debug)]
pub enum CommandStatus {
	/// Completed with a value.
	Completed(CommandOutput),
	/// Cancelled by the user.
	Cancelled,
	/// Failed with a normalized error.
	Failed(Error),
}
impl CommandStatus {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(&self) -> &'static str {
		match self {
			CommandStatus::Completed(_) => "completed",
			CommandStatus::Cancelled => "cancel",
			CommandStatus::Failed(_) => "error",
		}
	}
}

/// Terminal result of one command execution; shared by de-duplicated commands and the result
/// cache.
#[derive(Clone, Debug)]
pub struct CommandResult {
	/// Terminal status.
	pub status: CommandStatus,
	/// Correlation id of the execution that produced the result.
	pub correlation_id: String,
}
impl CommandResult {
	/// Creates a new result.
	pub fn new(status: CommandStatus, correlation_id: impl Into<String>) -> Self {
		Self { status, correlation_id: correlation_id.into() }
	}

	/// Returns the error for the failed status.
	pub fn error(&self) -> Option<&Error> {
		match &self.status {
			CommandStatus::Failed(error) => Some(error),
			_ => None,
		}
	}

	/// Copy attributed to the command with `correlation_id`, for results shared by identical
	/// commands or served from the cache.
	pub fn attributed_to(&self, correlation_id: &str) -> Self {
		let mut result = self.clone();

		if let CommandStatus::Completed(CommandOutput::Token(local)) = &mut result.status {
			local.correlation_id = Some(correlation_id.to_owned());
		}

		result.correlation_id = correlation_id.to_owned();

		result
	}

	/// Converts into a plain `Result`, mapping cancellation to [`Error::UserCancel`].
	pub fn into_result(self) -> Result<CommandOutput> {
		match self.status {
			CommandStatus::Completed(output) => Ok(output),
			CommandStatus::Cancelled => Err(Error::user_cancel("The command was cancelled")),
			CommandStatus::Failed(error) => Err(error),
		}
	}
}
