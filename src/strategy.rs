//! Contracts for the in-process OAuth2 strategy and the UI host.
//!
//! Wire-level request construction and transport live behind [`OAuth2Strategy`]; rendering the
//! authorization page lives behind [`AuthorizationUi`]. The UI host re-enters this crate only
//! through [`CommandDispatcher::complete_interactive`](crate::dispatcher::CommandDispatcher::complete_interactive).

// self
use crate::{
	_prelude::*,
	auth::{CacheRecord, ClientId, ScopeSet, TokenSecret},
	dispatcher::{InteractiveSession, SessionSignal},
	ipc::Bundle,
	params::OperationParameters,
	result::{
		AuthorizationErrorResponse, AuthorizationResponse, AuthorizationResult,
		AuthorizationStatus, TokenResult,
	},
};

/// Request codes identifying which UI flow a continuation belongs to.
pub mod request_code {
	/// Embedded or system browser authorization.
	pub const BROWSER_FLOW: i32 = 1001;
	/// Broker-hosted authorization.
	pub const BROKER_FLOW: i32 = 1003;
}

/// Result codes carried by continuations.
pub mod result_code {
	/// The user closed the UI.
	pub const CANCEL: i32 = 2001;
	/// The UI finished with an error payload.
	pub const ERROR: i32 = 2002;
	/// The browser flow finished with an authorization code.
	pub const COMPLETE: i32 = 2003;
	/// The broker finished and returned a result bundle.
	pub const BROKER_SUCCESS: i32 = 2004;
	/// The SDK tore the UI down.
	pub const SDK_CANCEL: i32 = 2008;
}

/// Out-of-band result delivered by the UI host.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthorizationContinuation {
	/// Flow identifier (see [`request_code`]).
	pub request_code: i32,
	/// Outcome identifier (see [`result_code`]).
	pub result_code: i32,
	/// Flow-specific payload.
	pub data: Bundle,
}
impl AuthorizationContinuation {
	/// Creates a continuation.
	pub fn new(request_code: i32, result_code: i32, data: Bundle) -> Self {
		Self { request_code, result_code, data }
	}
}

/// Authorization request prepared by the strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
	/// Fully built authorization URL.
	pub url: Url,
	/// Anti-forgery state the response must echo.
	pub state: String,
	/// PKCE verifier redeemed with the code.
	pub code_verifier: Option<TokenSecret>,
}

/// What the UI host is asked to show.
#[derive(Clone, Debug, PartialEq)]
pub enum AuthorizationLaunch {
	/// Open the authorization URL in a browser or web view.
	Browser {
		/// Request code the continuation must carry.
		request_code: i32,
		/// Authorization URL.
		url: Url,
	},
	/// Start the broker's interactive UI with the payload it returned.
	Broker {
		/// Request code the continuation must carry.
		request_code: i32,
		/// Broker launch payload.
		payload: Bundle,
	},
}

/// UI host contract.
pub trait AuthorizationUi
where
	Self: Send + Sync,
{
	/// Shows the UI without blocking; the outcome arrives later via `complete_interactive`.
	fn present(&self, launch: AuthorizationLaunch) -> Result<()>;
}

/// Grant redeemed by a token request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenGrant {
	/// Authorization code plus its PKCE verifier.
	AuthorizationCode {
		/// Code returned by the authorization step.
		code: TokenSecret,
		/// PKCE verifier.
		code_verifier: Option<TokenSecret>,
	},
	/// Refresh token.
	RefreshToken(TokenSecret),
}

/// Token request handed to [`OAuth2Strategy::request_token`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequest {
	/// Client id.
	pub client_id: ClientId,
	/// Redirect URI.
	pub redirect_uri: String,
	/// Requested scopes.
	pub scopes: ScopeSet,
	/// Grant to redeem.
	pub grant: TokenGrant,
	/// Claims challenge.
	pub claims: Option<String>,
	/// Correlation id forwarded to the authority.
	pub correlation_id: Option<String>,
}

/// In-process OAuth2 protocol strategy.
pub trait OAuth2Strategy
where
	Self: Send + Sync,
{
	/// Builds the authorization request.
	fn authorization_request(&self, params: &OperationParameters) -> Result<AuthorizationRequest>;

	/// Sends a token request synchronously.
	fn request_token(&self, request: &TokenRequest) -> Result<TokenResult>;

	/// Builds a token request for `grant`.
	fn create_token_request(&self, params: &OperationParameters, grant: TokenGrant) -> TokenRequest {
		TokenRequest {
			client_id: params.client_id.clone(),
			redirect_uri: params.redirect_uri.clone(),
			scopes: params.scopes.clone(),
			grant,
			claims: params.claims.clone(),
			correlation_id: params.correlation_id.clone(),
		}
	}

	/// Returns false to reject a cached record (for example, a PoP token bound to another key).
	fn validate_cached_result(&self, params: &OperationParameters, record: &CacheRecord) -> bool {
		let _ = (params, record);

		true
	}

	/// Turns a browser continuation into an authorization result.
	///
	/// `code` and `state` keys are read on completion; `error` and `error_description` on error.
	/// A state mismatch is reported as a failed authorization.
	fn authorization_result(
		&self,
		request: &AuthorizationRequest,
		continuation: &AuthorizationContinuation,
	) -> AuthorizationResult {
		let data = &continuation.data;
		let error = || {
			AuthorizationErrorResponse::new(
				data.get_str("error").unwrap_or(crate::error::codes::UNKNOWN_ERROR),
				data.get_str("error_description").map(str::to_owned),
			)
		};

		match continuation.result_code {
			result_code::CANCEL => AuthorizationResult::failure(AuthorizationStatus::UserCancel, None),
			result_code::SDK_CANCEL => AuthorizationResult::sdk_cancel(),
			result_code::COMPLETE => match (data.get_str("code"), data.get_str("state")) {
				(Some(code), Some(state)) if state == request.state =>
					AuthorizationResult::success(AuthorizationResponse {
						code: TokenSecret::new(code),
						state: Some(state.to_owned()),
						code_verifier: request.code_verifier.clone(),
					}),
				(Some(_), _) => AuthorizationResult::failure(
					AuthorizationStatus::Fail,
					Some(AuthorizationErrorResponse::new(
						"state_mismatch",
						Some("Returned state does not match the request.".into()),
					)),
				),
				(None, _) => AuthorizationResult::failure(AuthorizationStatus::Fail, Some(error())),
			},
			_ => AuthorizationResult::failure(AuthorizationStatus::Fail, Some(error())),
		}
	}

	/// Presents the authorization UI and blocks on the interactive session for its outcome.
	fn request_authorization(
		&self,
		params: &OperationParameters,
		ui: &dyn AuthorizationUi,
		session: &InteractiveSession,
	) -> Result<AuthorizationResult> {
		let request = self.authorization_request(params)?;

		ui.present(AuthorizationLaunch::Browser {
			request_code: request_code::BROWSER_FLOW,
			url: request.url.clone(),
		})?;

		match session.wait()? {
			SessionSignal::Completed(continuation) => Ok(self.authorization_result(&request, &continuation)),
			SessionSignal::Cancelled => Ok(AuthorizationResult::sdk_cancel()),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Fixed;
	impl OAuth2Strategy for Fixed {
		fn authorization_request(&self, _: &OperationParameters) -> Result<AuthorizationRequest> {
			unreachable!("Not used by these tests.")
		}

		fn request_token(&self, _: &TokenRequest) -> Result<TokenResult> {
			unreachable!("Not used by these tests.")
		}
	}

	fn request() -> AuthorizationRequest {
		AuthorizationRequest {
			url: Url::parse("https://login.microsoftonline.com/common/oauth2/v2.0/authorize")
				.expect("Authorization URL fixture should parse."),
			state: "s-1".into(),
			code_verifier: None,
		}
	}

	fn continuation(result_code: i32, data: Bundle) -> AuthorizationContinuation {
		AuthorizationContinuation::new(request_code::BROWSER_FLOW, result_code, data)
	}

	#[test]
	fn completion_with_matching_state_succeeds() {
		let result = Fixed.authorization_result(
			&request(),
			&continuation(result_code::COMPLETE, Bundle::new().with("code", "c-1").with("state", "s-1")),
		);

		assert!(result.is_success());
		assert_eq!(result.response.map(|r| r.code.expose().to_owned()).as_deref(), Some("c-1"));
	}

	#[test]
	fn state_mismatch_and_errors_fail() {
		let mismatch = Fixed.authorization_result(
			&request(),
			&continuation(result_code::COMPLETE, Bundle::new().with("code", "c-1").with("state", "other")),
		);

		assert_eq!(mismatch.status, AuthorizationStatus::Fail);

		let error = Fixed.authorization_result(
			&request(),
			&continuation(result_code::ERROR, Bundle::new().with("error", "access_denied")),
		);

		assert_eq!(error.error.map(|e| e.error).as_deref(), Some("access_denied"));
	}

	#[test]
	fn cancel_codes_map_to_cancel_statuses() {
		assert_eq!(
			Fixed.authorization_result(&request(), &continuation(result_code::CANCEL, Bundle::new())).status,
			AuthorizationStatus::UserCancel
		);
		assert_eq!(
			Fixed.authorization_result(&request(), &continuation(result_code::SDK_CANCEL, Bundle::new())).status,
			AuthorizationStatus::SdkCancel
		);
	}
}
