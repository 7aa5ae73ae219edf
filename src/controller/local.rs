//! In-process controller backed by an [`OAuth2Strategy`] and an [`OAuth2TokenCache`].

// self
use crate::{
	_prelude::*,
	auth::{AccessTokenRecord, AccountRecord, CacheRecord, CredentialKind, DEFAULT_EXPIRY_BUFFER},
	controller::Controller,
	dispatcher::InteractiveSession,
	error::{ClientError, codes},
	params::OperationParameters,
	result::{AcquireTokenResult, LocalAuthenticationResult, TokenResponse},
	store::OAuth2TokenCache,
	strategy::{AuthorizationUi, OAuth2Strategy, TokenGrant},
};

/// Controller that runs OAuth2 flows inside the application process.
#[derive(Clone)]
pub struct LocalController {
	strategy: Arc<dyn OAuth2Strategy>,
	cache: Arc<dyn OAuth2TokenCache>,
	ui: Arc<dyn AuthorizationUi>,
	expiry_buffer: Duration,
}
impl LocalController {
	/// Creates a controller using the default expiry buffer.
	pub fn new(
		strategy: Arc<dyn OAuth2Strategy>,
		cache: Arc<dyn OAuth2TokenCache>,
		ui: Arc<dyn AuthorizationUi>,
	) -> Self {
		Self { strategy, cache, ui, expiry_buffer: DEFAULT_EXPIRY_BUFFER }
	}

	/// Overrides how long before expiry a cached access token stops being served.
	pub fn with_expiry_buffer(mut self, buffer: Duration) -> Self {
		self.expiry_buffer = buffer;

		self
	}

	/// Silent acquisition evaluated against an explicit clock.
	pub fn acquire_token_silent_at(
		&self,
		params: &OperationParameters,
		now: OffsetDateTime,
	) -> Result<AcquireTokenResult> {
		let account = params.account.as_ref().ok_or_else(no_account)?;
		let records = self.cache.load_with_aggregated_account_data(&params.client_id, account)?;
		let record = records.into_iter().next().ok_or_else(no_account)?;

		if let Some(local) = self.cached_result(params, &record, now) {
			tracing::debug!(scopes = %params.scopes, "Serving access token from the cache.");

			return Ok(AcquireTokenResult::from_local(local));
		}

		let Some(refresh_token) = record.refresh_token.clone() else {
			return Err(Error::client(
				codes::NO_TOKENS_FOUND,
				"No refresh token is cached for the account.",
			));
		};
		let request =
			self.strategy.create_token_request(params, TokenGrant::RefreshToken(refresh_token));
		let token = self.strategy.request_token(&request)?;
		let Some(response) = token.response.as_ref().filter(|_| token.is_success()) else {
			if token.error.as_ref().is_some_and(|e| e.error == codes::INVALID_GRANT) {
				tracing::info!("Refresh token rejected; removing it from the cache.");

				self.cache.remove_credential(
					&params.client_id,
					&record.account.home_account_id,
					CredentialKind::RefreshToken,
				)?;
			}

			return Ok(AcquireTokenResult::from_token(token));
		};
		let account = response.account.clone().unwrap_or(record.account);
		let local = self.save(params, response, account, now)?;

		Ok(AcquireTokenResult { authorization: None, token: Some(token), local: Some(local) })
	}

	fn cached_result(
		&self,
		params: &OperationParameters,
		record: &CacheRecord,
		now: OffsetDateTime,
	) -> Option<LocalAuthenticationResult> {
		if params.force_refresh {
			return None;
		}

		let access_token = record.access_token.as_ref()?;

		if access_token.is_expired_at(now, self.expiry_buffer)
			|| !access_token.scopes.covers(&params.scopes)
			|| !self.strategy.validate_cached_result(params, record)
		{
			return None;
		}

		LocalAuthenticationResult::from_cache_record(record, true)
	}

	fn save(
		&self,
		params: &OperationParameters,
		response: &TokenResponse,
		account: AccountRecord,
		now: OffsetDateTime,
	) -> Result<LocalAuthenticationResult> {
		if !response.expires_in.is_positive() {
			return Err(invalid_lifetime(response.expires_in));
		}

		let expires_on =
			now.checked_add(response.expires_in).ok_or_else(|| invalid_lifetime(response.expires_in))?;
		let home_account_id = account.home_account_id.clone();
		let record = CacheRecord {
			account,
			access_token: Some(AccessTokenRecord {
				secret: response.access_token.clone(),
				scopes: response.scopes.clone().unwrap_or_else(|| params.scopes.clone()),
				cached_at: now,
				expires_on,
			}),
			refresh_token: response.refresh_token.clone(),
			id_token: response.id_token.clone(),
		};
		let saved = self.cache.save_and_load_aggregated_account_data(&params.client_id, record)?;

		saved
			.iter()
			.find(|record| record.account.home_account_id == home_account_id)
			.and_then(|record| LocalAuthenticationResult::from_cache_record(record, false))
			.ok_or_else(|| {
				ClientError::new(codes::STORAGE_ERROR, "Saved tokens could not be loaded back.")
					.into()
			})
	}
}
impl Controller for LocalController {
	fn name(&self) -> &'static str {
		"local"
	}

	fn acquire_token_interactive(
		&self,
		params: &OperationParameters,
		session: &InteractiveSession,
	) -> Result<AcquireTokenResult> {
		let authorization = self.strategy.request_authorization(params, self.ui.as_ref(), session)?;
		let Some(response) = authorization.response.clone().filter(|_| authorization.is_success())
		else {
			return Ok(AcquireTokenResult::from_authorization(authorization));
		};
		let grant = TokenGrant::AuthorizationCode {
			code: response.code,
			code_verifier: response.code_verifier,
		};
		let token = self.strategy.request_token(&self.strategy.create_token_request(params, grant))?;
		let mut result = AcquireTokenResult {
			authorization: Some(authorization),
			token: None,
			local: None,
		};
		let Some(response) = token.response.as_ref().filter(|_| token.is_success()) else {
			result.token = Some(token);

			return Ok(result);
		};
		let Some(account) = response.account.clone().or_else(|| params.account.clone()) else {
			return Err(Error::client(
				codes::NO_ACCOUNT_FOUND,
				"The token response did not identify an account.",
			));
		};

		result.local = Some(self.save(params, response, account, OffsetDateTime::now_utc())?);
		result.token = Some(token);

		Ok(result)
	}

	fn acquire_token_silent(&self, params: &OperationParameters) -> Result<AcquireTokenResult> {
		self.acquire_token_silent_at(params, OffsetDateTime::now_utc())
	}

	fn get_accounts(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>> {
		Ok(self.cache.get_accounts(&params.client_id)?)
	}

	fn remove_account(&self, params: &OperationParameters) -> Result<bool> {
		let Some(account) = params.account.as_ref() else {
			return Ok(false);
		};

		Ok(self.cache.remove_account(&params.client_id, &account.home_account_id)?)
	}

	fn get_device_mode(&self, _: &OperationParameters) -> Result<bool> {
		Ok(false)
	}

	fn get_current_account(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>> {
		self.get_accounts(params)
	}

	fn remove_current_account(&self, params: &OperationParameters) -> Result<bool> {
		self.remove_account(params)
	}
}
impl Debug for LocalController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LocalController").field("expiry_buffer", &self.expiry_buffer).finish()
	}
}

fn invalid_lifetime(expires_in: Duration) -> Error {
	Error::client(
		codes::INVALID_TOKEN_LIFETIME,
		format!("Token lifetime of {expires_in} is out of range."),
	)
}

fn no_account() -> Error {
	Error::client(codes::NO_ACCOUNT_FOUND, "The account is not present in the token cache.")
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		_preludet::*,
		auth::TokenSecret,
		error::ErrorKind,
		ipc::Bundle,
		result::{TokenErrorResponse, TokenResult},
		store::MemoryTokenCache,
		strategy::{AuthorizationContinuation, request_code, result_code},
	};

	const NOW: OffsetDateTime = macros::datetime!(2025-11-10 12:00 UTC);

	fn seeded(access_token_lifetime: Duration, refresh_token: Option<&str>) -> MemoryTokenCache {
		let cache = MemoryTokenCache::default();
		let record = CacheRecord {
			account: fixture_account(),
			access_token: Some(AccessTokenRecord {
				secret: TokenSecret::new("at-1"),
				scopes: fixture_params().scopes,
				cached_at: NOW - Duration::minutes(10),
				expires_on: NOW + access_token_lifetime,
			}),
			refresh_token: refresh_token.map(TokenSecret::new),
			id_token: None,
		};

		cache
			.save_and_load_aggregated_account_data(&fixture_params().client_id, record)
			.expect("Seeding the memory cache should succeed.");

		cache
	}

	fn controller(
		strategy: &Arc<ScriptedOAuth2Strategy>,
		cache: &MemoryTokenCache,
	) -> LocalController {
		LocalController::new(strategy.clone(), Arc::new(cache.clone()), Arc::new(RecordingUi::default()))
	}

	fn params() -> OperationParameters {
		fixture_params().with_account(fixture_account())
	}

	fn stored(cache: &MemoryTokenCache) -> CacheRecord {
		cache
			.load_with_aggregated_account_data(&fixture_params().client_id, &fixture_account())
			.expect("Loading from the memory cache should succeed.")
			.pop()
			.expect("Account record should still be cached.")
	}

	#[test]
	fn valid_cached_token_is_served_without_network() {
		let strategy = Arc::new(ScriptedOAuth2Strategy::default());
		let cache = seeded(Duration::hours(1), Some("rt-1"));
		let result = controller(&strategy, &cache)
			.acquire_token_silent_at(&params(), NOW)
			.expect("Silent acquisition should succeed.");
		let local = result.local.expect("Cache hit should carry a projection.");

		assert!(local.served_from_cache);
		assert_eq!(local.access_token.expose(), "at-1");
		assert!(strategy.requests().is_empty());
	}

	#[test]
	fn token_inside_expiry_buffer_is_refreshed_and_saved() {
		let strategy = Arc::new(ScriptedOAuth2Strategy::new([TokenResult::success(token_response(
			"at-2",
			Some("rt-2"),
		))]));
		let cache = seeded(Duration::minutes(1), Some("rt-1"));
		let result = controller(&strategy, &cache)
			.acquire_token_silent_at(&params(), NOW)
			.expect("Silent acquisition should succeed.");

		assert!(result.succeeded());

		let local = result.local.expect("Refresh should carry a projection.");

		assert!(!local.served_from_cache);
		assert_eq!(local.access_token.expose(), "at-2");
		assert_eq!(local.expires_on, NOW + Duration::hours(1));
		assert_eq!(
			strategy.requests().first().map(|request| request.grant.clone()),
			Some(TokenGrant::RefreshToken(TokenSecret::new("rt-1")))
		);
		assert_eq!(stored(&cache).refresh_token, Some(TokenSecret::new("rt-2")));
	}

	#[test]
	fn out_of_range_token_lifetimes_fail_without_saving() {
		for expires_in in [Duration::MAX, Duration::ZERO, Duration::seconds(-30)] {
			let mut response = token_response("at-2", Some("rt-2"));

			response.expires_in = expires_in;

			let strategy = Arc::new(ScriptedOAuth2Strategy::new([TokenResult::success(response)]));
			let cache = seeded(Duration::minutes(1), Some("rt-1"));
			let error = controller(&strategy, &cache)
				.acquire_token_silent_at(&params(), NOW)
				.expect_err("Out-of-range lifetimes should be rejected.");

			assert_eq!(error.kind(), ErrorKind::Client);
			assert_eq!(error.code(), codes::INVALID_TOKEN_LIFETIME);
			assert_eq!(stored(&cache).refresh_token, Some(TokenSecret::new("rt-1")));
		}
	}

	#[test]
	fn force_refresh_and_rejected_records_bypass_the_cache() {
		let refreshed = || TokenResult::success(token_response("at-2", None));
		let strategy = Arc::new(ScriptedOAuth2Strategy::new([refreshed()]));
		let cache = seeded(Duration::hours(1), Some("rt-1"));

		controller(&strategy, &cache)
			.acquire_token_silent_at(&params().with_force_refresh(true), NOW)
			.expect("Forced refresh should succeed.");

		assert_eq!(strategy.requests().len(), 1);

		let strategy = Arc::new(ScriptedOAuth2Strategy::new([refreshed()]).rejecting_cached_results());
		let cache = seeded(Duration::hours(1), Some("rt-1"));

		controller(&strategy, &cache)
			.acquire_token_silent_at(&params(), NOW)
			.expect("Refresh after a rejected record should succeed.");

		assert_eq!(strategy.requests().len(), 1);
	}

	#[test]
	fn invalid_grant_removes_the_refresh_token() {
		let strategy = Arc::new(ScriptedOAuth2Strategy::new([TokenResult::failure(
			TokenErrorResponse::new(codes::INVALID_GRANT),
		)]));
		let cache = seeded(Duration::ZERO, Some("rt-1"));
		let result = controller(&strategy, &cache)
			.acquire_token_silent_at(&params(), NOW)
			.expect("A rejected refresh is reported through the result.");

		assert!(!result.succeeded());
		assert_eq!(result.token_error_code(), Some(codes::INVALID_GRANT));
		assert_eq!(stored(&cache).refresh_token, None);
	}

	#[test]
	fn missing_account_or_refresh_token_fail_with_client_codes() {
		let strategy = Arc::new(ScriptedOAuth2Strategy::default());
		let cache = seeded(Duration::ZERO, None);
		let controller = controller(&strategy, &cache);
		let error = controller
			.acquire_token_silent_at(&fixture_params(), NOW)
			.expect_err("Parameters without an account should fail.");

		assert_eq!(error.code(), codes::NO_ACCOUNT_FOUND);

		let error = controller
			.acquire_token_silent_at(&params(), NOW)
			.expect_err("An expired token without a refresh token should fail.");

		assert_eq!(error.kind(), ErrorKind::Client);
		assert_eq!(error.code(), codes::NO_TOKENS_FOUND);

		let empty = LocalController::new(
			strategy,
			Arc::new(MemoryTokenCache::default()),
			Arc::new(RecordingUi::default()),
		);
		let error = empty
			.acquire_token_silent_at(&params(), NOW)
			.expect_err("Unknown accounts should fail.");

		assert_eq!(error.code(), codes::NO_ACCOUNT_FOUND);
	}

	#[test]
	fn interactive_flow_redeems_the_code_from_the_continuation() {
		let session = Arc::new(InteractiveSession::new("corr-1", Some(Duration::seconds(5))));
		let ui = {
			let session = session.clone();

			Arc::new(RecordingUi::default().with_responder(move |_| {
				session.deliver(AuthorizationContinuation::new(
					request_code::BROWSER_FLOW,
					result_code::COMPLETE,
					Bundle::new().with("code", "code-1").with("state", "state-1"),
				));
			}))
		};
		let strategy = Arc::new(ScriptedOAuth2Strategy::new([TokenResult::success(token_response(
			"at-1",
			Some("rt-1"),
		))]));
		let cache = MemoryTokenCache::default();
		let controller = LocalController::new(strategy.clone(), Arc::new(cache.clone()), ui.clone());
		let result = controller
			.acquire_token_interactive(&fixture_params(), &session)
			.expect("Interactive acquisition should succeed.");

		assert!(result.succeeded());
		assert_eq!(ui.launches().len(), 1);
		assert_eq!(
			strategy.requests().first().map(|request| request.grant.clone()),
			Some(TokenGrant::AuthorizationCode {
				code: TokenSecret::new("code-1"),
				code_verifier: Some(TokenSecret::new("verifier-1")),
			})
		);
		assert_eq!(stored(&cache).refresh_token, Some(TokenSecret::new("rt-1")));
	}

	#[test]
	fn cancelled_session_yields_sdk_cancel_without_token_request() {
		let session = InteractiveSession::new("corr-1", None);

		session.cancel();

		let strategy = Arc::new(ScriptedOAuth2Strategy::default());
		let result = controller(&strategy, &MemoryTokenCache::default())
			.acquire_token_interactive(&fixture_params(), &session)
			.expect("Cancellation is reported through the result.");

		assert!(!result.succeeded());
		assert!(strategy.requests().is_empty());
	}

	#[test]
	fn account_management_reads_the_cache() {
		let strategy = Arc::new(ScriptedOAuth2Strategy::default());
		let cache = seeded(Duration::hours(1), None);
		let controller = controller(&strategy, &cache);

		assert_eq!(
			controller.get_accounts(&params()).expect("Listing accounts should succeed."),
			vec![fixture_account()]
		);
		assert!(!controller.remove_account(&fixture_params()).expect("Removal should succeed."));
		assert!(controller.remove_account(&params()).expect("Removal should succeed."));
		assert!(cache.is_empty());
		assert!(!controller.get_device_mode(&params()).expect("Device mode should be reported."));
	}
}
