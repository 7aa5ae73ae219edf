//! Command dispatch, controller fallback, and broker IPC orchestration for native identity SDKs:
//! one interactive flow at a time, concurrent silent renewals, and one error taxonomy for every
//! path.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod command;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod ipc;
pub mod normalize;
pub mod obs;
pub mod params;
pub mod result;
pub mod store;
pub mod strategy;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Test doubles and fixtures shared by unit and integration tests; enabled via `cfg(test)` or
	//! the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		sync::atomic::{AtomicUsize, Ordering},
		thread,
		time::{Duration as StdDuration, Instant},
	};
	// self
	use crate::{
		auth::{AccountRecord, ClientId, HomeAccountId, ScopeSet, TokenSecret},
		command::CommandCallback,
		controller::Controller,
		dispatcher::{InteractiveSession, ResultFuture, SessionSignal},
		error::{BrokerCommunicationError, codes},
		ipc::{Bundle, IpcStrategy, IpcStrategyKind, OperationBundle},
		obs::{TelemetryEvent, TelemetrySink},
		params::{Authority, OperationParameters},
		result::{
			AcquireTokenResult, AuthorizationResult, AuthorizationStatus, CommandOutput,
			LocalAuthenticationResult, TokenResponse, TokenResult,
		},
		strategy::{
			AuthorizationLaunch, AuthorizationRequest, AuthorizationUi, OAuth2Strategy,
			TokenRequest, result_code,
		},
	};

	/// Upper bound tests wait for asynchronous outcomes.
	pub const WAIT: StdDuration = StdDuration::from_secs(5);

	/// Polls `condition` until it holds or [`WAIT`] elapses.
	pub fn eventually(condition: impl Fn() -> bool) -> bool {
		let deadline = Instant::now() + WAIT;

		while Instant::now() < deadline {
			if condition() {
				return true;
			}

			thread::sleep(StdDuration::from_millis(5));
		}

		condition()
	}

	/// Account used across fixtures.
	pub fn fixture_account() -> AccountRecord {
		AccountRecord::new(
			HomeAccountId::new("uid.utid").expect("Home account fixture should be valid."),
			"login.microsoftonline.com",
		)
		.with_realm("utid")
		.with_username("user@contoso.com")
	}

	/// Parameters for a `user.read` request against the common authority.
	pub fn fixture_params() -> OperationParameters {
		OperationParameters::new(
			ClientId::new("client-1").expect("Client fixture should be valid."),
			"msauth://com.example.app/hash",
			Authority::parse("https://login.microsoftonline.com/common")
				.expect("Authority fixture should be valid."),
			ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
		)
	}

	/// Resolved result for [`fixture_account`] valid for one hour.
	pub fn fixture_local(access_token: &str) -> LocalAuthenticationResult {
		LocalAuthenticationResult {
			access_token: TokenSecret::new(access_token),
			expires_on: OffsetDateTime::now_utc() + Duration::hours(1),
			scopes: ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
			account: fixture_account(),
			tenant_id: Some("utid".into()),
			id_token: None,
			served_from_cache: false,
			correlation_id: None,
		}
	}

	/// Successful acquisition carrying `access_token`.
	pub fn success_token(access_token: &str) -> AcquireTokenResult {
		AcquireTokenResult::from_local(fixture_local(access_token))
	}

	/// Token endpoint payload for [`fixture_account`] valid for one hour.
	pub fn token_response(access_token: &str, refresh_token: Option<&str>) -> TokenResponse {
		TokenResponse {
			access_token: TokenSecret::new(access_token),
			refresh_token: refresh_token.map(TokenSecret::new),
			id_token: None,
			expires_in: Duration::hours(1),
			scopes: None,
			account: Some(fixture_account()),
		}
	}

	/// Scripted outcome of one controller call.
	#[derive(Clone, Debug)]
	pub enum ControllerReply {
		/// Token operations return this result.
		Token(AcquireTokenResult),
		/// Account listings return these accounts.
		Accounts(Vec<AccountRecord>),
		/// Removal and device-mode queries return this flag.
		Flag(bool),
		/// Any operation fails with this error.
		Fail(Error),
		/// Any operation panics.
		Panic,
	}

	/// Controller answering from a script; the last reply repeats once the script runs out.
	#[derive(Debug)]
	pub struct ScriptedController {
		name: &'static str,
		replies: Mutex<VecDeque<ControllerReply>>,
		calls: AtomicUsize,
		gate: Option<ResultFuture<()>>,
		log: Option<Arc<Mutex<Vec<String>>>>,
	}
	impl ScriptedController {
		/// Creates a shared scripted controller.
		pub fn new(
			name: &'static str,
			replies: impl IntoIterator<Item = ControllerReply>,
		) -> Arc<Self> {
			Arc::new(Self::builder(name, replies))
		}

		/// Creates an unshared controller for further configuration.
		pub fn builder(
			name: &'static str,
			replies: impl IntoIterator<Item = ControllerReply>,
		) -> Self {
			Self {
				name,
				replies: Mutex::new(replies.into_iter().collect()),
				calls: AtomicUsize::new(0),
				gate: None,
				log: None,
			}
		}

		/// Blocks every call until `gate` resolves.
		pub fn with_gate(mut self, gate: ResultFuture<()>) -> Self {
			self.gate = Some(gate);

			self
		}

		/// Appends `start:<correlation id>` and `end:<correlation id>` around interactive calls.
		pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
			self.log = Some(log);

			self
		}

		/// Wraps the controller for sharing.
		pub fn shared(self) -> Arc<Self> {
			Arc::new(self)
		}

		/// Number of calls received.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		fn answer<T>(&self, pick: impl FnOnce(ControllerReply) -> Option<T>) -> Result<T> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			if let Some(gate) = self.gate.as_ref() {
				gate.wait();
			}

			let reply = {
				let mut replies = self.replies.lock();

				if replies.len() > 1 { replies.pop_front() } else { replies.front().cloned() }
			};

			match reply {
				Some(ControllerReply::Fail(e)) => Err(e),
				Some(ControllerReply::Panic) => panic!("Scripted controller {} panicked.", self.name),
				Some(reply) => pick(reply).ok_or_else(|| {
					Error::client(codes::UNSUPPORTED_OPERATION, "Scripted reply does not fit the call.")
				}),
				None => Err(Error::client(codes::UNKNOWN_ERROR, "Controller script is empty.")),
			}
		}

		fn record(&self, entry: String) {
			if let Some(log) = self.log.as_ref() {
				log.lock().push(entry);
			}
		}
	}
	impl Controller for ScriptedController {
		fn name(&self) -> &'static str {
			self.name
		}

		fn acquire_token_interactive(
			&self,
			_: &OperationParameters,
			session: &InteractiveSession,
		) -> Result<AcquireTokenResult> {
			self.record(format!("start:{}", session.correlation_id()));

			let signal = session.wait();

			self.record(format!("end:{}", session.correlation_id()));

			match signal? {
				SessionSignal::Cancelled =>
					Ok(AcquireTokenResult::from_authorization(AuthorizationResult::sdk_cancel())),
				SessionSignal::Completed(continuation) if continuation.result_code == result_code::CANCEL =>
					Ok(AcquireTokenResult::from_authorization(AuthorizationResult::failure(
						AuthorizationStatus::UserCancel,
						None,
					))),
				SessionSignal::Completed(_) => self.answer(|reply| match reply {
					ControllerReply::Token(result) => Some(result),
					_ => None,
				}),
			}
		}

		fn acquire_token_silent(&self, _: &OperationParameters) -> Result<AcquireTokenResult> {
			self.answer(|reply| match reply {
				ControllerReply::Token(result) => Some(result),
				_ => None,
			})
		}

		fn get_accounts(&self, _: &OperationParameters) -> Result<Vec<AccountRecord>> {
			self.answer(|reply| match reply {
				ControllerReply::Accounts(accounts) => Some(accounts),
				_ => None,
			})
		}

		fn remove_account(&self, _: &OperationParameters) -> Result<bool> {
			self.answer(|reply| match reply {
				ControllerReply::Flag(flag) => Some(flag),
				_ => None,
			})
		}

		fn get_device_mode(&self, params: &OperationParameters) -> Result<bool> {
			self.remove_account(params)
		}
	}

	/// Converts scripted controllers into a command's controller list.
	pub fn controllers<const N: usize>(list: [&Arc<ScriptedController>; N]) -> Vec<Arc<dyn Controller>> {
		list.into_iter().map(|controller| controller.clone() as Arc<dyn Controller>).collect()
	}

	/// Terminal notification captured by [`RecordingCallback`].
	#[derive(Clone, Debug)]
	pub enum CallbackEvent {
		/// `on_task_completed`.
		Completed(CommandOutput),
		/// `on_cancel`.
		Cancelled,
		/// `on_error`.
		Failed(Error),
	}
	impl CallbackEvent {
		/// Access token of a completed token acquisition.
		pub fn access_token(&self) -> Option<&str> {
			match self {
				CallbackEvent::Completed(CommandOutput::Token(local)) => Some(local.access_token.expose()),
				_ => None,
			}
		}

		/// Error code of a failure.
		pub fn error_code(&self) -> Option<&str> {
			match self {
				CallbackEvent::Failed(e) => Some(e.code()),
				_ => None,
			}
		}
	}

	/// Callback recording every notification it receives.
	#[derive(Debug, Default)]
	pub struct RecordingCallback {
		events: Mutex<Vec<CallbackEvent>>,
		changed: Condvar,
	}
	impl RecordingCallback {
		/// Creates a shared callback.
		pub fn shared() -> Arc<Self> {
			Arc::new(Self::default())
		}

		/// Notifications received so far.
		pub fn events(&self) -> Vec<CallbackEvent> {
			self.events.lock().clone()
		}

		/// Blocks until `count` notifications arrived or [`WAIT`] elapsed.
		pub fn wait_for(&self, count: usize) -> Vec<CallbackEvent> {
			let deadline = Instant::now() + WAIT;
			let mut events = self.events.lock();

			while events.len() < count {
				if self.changed.wait_until(&mut events, deadline).timed_out() {
					break;
				}
			}

			events.clone()
		}

		fn push(&self, event: CallbackEvent) {
			self.events.lock().push(event);
			self.changed.notify_all();
		}
	}
	impl CommandCallback for RecordingCallback {
		fn on_task_completed(&self, output: CommandOutput) {
			self.push(CallbackEvent::Completed(output));
		}

		fn on_cancel(&self) {
			self.push(CallbackEvent::Cancelled);
		}

		fn on_error(&self, error: Error) {
			self.push(CallbackEvent::Failed(error));
		}
	}

	/// Telemetry sink recording events and flushes.
	#[derive(Debug, Default)]
	pub struct RecordingTelemetry {
		events: Mutex<Vec<TelemetryEvent>>,
		flushes: Mutex<Vec<(String, Option<String>)>>,
	}
	impl RecordingTelemetry {
		/// Emitted events.
		pub fn events(&self) -> Vec<TelemetryEvent> {
			self.events.lock().clone()
		}

		/// Flushes as `(correlation id, error code)`.
		pub fn flushes(&self) -> Vec<(String, Option<String>)> {
			self.flushes.lock().clone()
		}
	}
	impl TelemetrySink for RecordingTelemetry {
		fn emit(&self, event: TelemetryEvent) {
			self.events.lock().push(event);
		}

		fn flush(&self, correlation_id: &str, error: Option<&Error>) {
			self.flushes.lock().push((correlation_id.to_owned(), error.map(|e| e.code().to_owned())));
		}
	}

	type Responder = Box<dyn Fn(&AuthorizationLaunch) + Send + Sync>;

	/// UI host recording launches and optionally answering them.
	#[derive(Default)]
	pub struct RecordingUi {
		launches: Mutex<Vec<AuthorizationLaunch>>,
		responder: Option<Responder>,
	}
	impl RecordingUi {
		/// Runs `responder` for every launch, after recording it.
		pub fn with_responder(
			mut self,
			responder: impl 'static + Fn(&AuthorizationLaunch) + Send + Sync,
		) -> Self {
			self.responder = Some(Box::new(responder));

			self
		}

		/// Launches presented so far.
		pub fn launches(&self) -> Vec<AuthorizationLaunch> {
			self.launches.lock().clone()
		}
	}
	impl AuthorizationUi for RecordingUi {
		fn present(&self, launch: AuthorizationLaunch) -> Result<()> {
			self.launches.lock().push(launch.clone());

			if let Some(responder) = self.responder.as_ref() {
				responder(&launch);
			}

			Ok(())
		}
	}
	impl Debug for RecordingUi {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("RecordingUi").field("launches", &self.launches.lock().len()).finish()
		}
	}

	/// OAuth2 strategy answering token requests from a script.
	#[derive(Debug, Default)]
	pub struct ScriptedOAuth2Strategy {
		tokens: Mutex<VecDeque<TokenResult>>,
		requests: Mutex<Vec<TokenRequest>>,
		reject_cached: bool,
	}
	impl ScriptedOAuth2Strategy {
		/// Creates a strategy returning `tokens` in order.
		pub fn new(tokens: impl IntoIterator<Item = TokenResult>) -> Self {
			Self { tokens: Mutex::new(tokens.into_iter().collect()), ..Default::default() }
		}

		/// Makes `validate_cached_result` reject every record.
		pub fn rejecting_cached_results(mut self) -> Self {
			self.reject_cached = true;

			self
		}

		/// Token requests received so far.
		pub fn requests(&self) -> Vec<TokenRequest> {
			self.requests.lock().clone()
		}
	}
	impl OAuth2Strategy for ScriptedOAuth2Strategy {
		fn authorization_request(&self, params: &OperationParameters) -> Result<AuthorizationRequest> {
			let mut url = params.authority.url().join("oauth2/v2.0/authorize").map_err(|e| {
				crate::error::ClientError::new(codes::UNKNOWN_ERROR, "Authorize URL fixture failed.")
					.with_source(e)
			})?;

			url.query_pairs_mut()
				.append_pair("client_id", &params.client_id)
				.append_pair("state", "state-1");

			Ok(AuthorizationRequest {
				url,
				state: "state-1".into(),
				code_verifier: Some(TokenSecret::new("verifier-1")),
			})
		}

		fn request_token(&self, request: &TokenRequest) -> Result<TokenResult> {
			self.requests.lock().push(request.clone());
			self.tokens
				.lock()
				.pop_front()
				.ok_or_else(|| Error::client(codes::UNKNOWN_ERROR, "Token script is empty."))
		}

		fn validate_cached_result(
			&self,
			_: &OperationParameters,
			_: &crate::auth::CacheRecord,
		) -> bool {
			!self.reject_cached
		}
	}

	/// Scripted reply of one IPC call.
	#[derive(Clone, Debug)]
	pub enum StrategyReply {
		/// The broker answered with this bundle.
		Answer(Bundle),
		/// The transport could not connect.
		Unreachable,
	}

	/// IPC strategy answering from a script; an exhausted script is unreachable.
	#[derive(Debug)]
	pub struct ScriptedStrategy {
		kind: IpcStrategyKind,
		replies: Mutex<VecDeque<StrategyReply>>,
		requests: Mutex<Vec<OperationBundle>>,
	}
	impl ScriptedStrategy {
		/// Creates a shared scripted strategy.
		pub fn new(kind: IpcStrategyKind, replies: impl IntoIterator<Item = StrategyReply>) -> Arc<Self> {
			Arc::new(Self {
				kind,
				replies: Mutex::new(replies.into_iter().collect()),
				requests: Mutex::new(Vec::new()),
			})
		}

		/// Number of IPC calls received.
		pub fn calls(&self) -> usize {
			self.requests.lock().len()
		}

		/// Bundles sent so far.
		pub fn requests(&self) -> Vec<OperationBundle> {
			self.requests.lock().clone()
		}
	}
	impl IpcStrategy for ScriptedStrategy {
		fn kind(&self) -> IpcStrategyKind {
			self.kind
		}

		fn communicate_to_broker(
			&self,
			bundle: &OperationBundle,
		) -> Result<Bundle, BrokerCommunicationError> {
			self.requests.lock().push(bundle.clone());

			match self.replies.lock().pop_front() {
				Some(StrategyReply::Answer(reply)) => Ok(reply),
				Some(StrategyReply::Unreachable) | None =>
					Err(BrokerCommunicationError::connection(self.kind, "Scripted transport is unreachable.")),
			}
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		hash::{Hash, Hasher},
		str::FromStr,
		sync::Arc,
	};

	pub use parking_lot::{Condvar, Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use url;
#[cfg(test)] use color_eyre as _;
