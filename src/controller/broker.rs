//! Controller that delegates every operation to a system broker over IPC.

// self
use crate::{
	_prelude::*,
	auth::{AccountRecord, PackageName},
	controller::Controller,
	dispatcher::{InteractiveSession, SessionSignal},
	error::{ClientError, codes},
	ipc::{
		BrokerApi, BrokerOperation, BrokerOperationExecutor, Bundle, HelloCache, HelloKey,
		HelloOutcome, IpcStrategy, OperationBundle, StrategyError, supported_strategies,
	},
	normalize,
	obs::TelemetrySink,
	params::OperationParameters,
	result::{
		AcquireTokenResult, AuthorizationResult, AuthorizationStatus, LocalAuthenticationResult,
	},
	strategy::{AuthorizationLaunch, AuthorizationUi, request_code, result_code},
};

/// Highest broker protocol version this crate speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "14.0";

const CLIENT_MAX_VERSION_KEY: &str = "client_advertised_maximum_version";
const CLIENT_MIN_VERSION_KEY: &str = "client_advertised_minimum_version";
const NEGOTIATED_VERSION_KEY: &str = "negotiated_broker_protocol_version";
const ERROR_CODE_KEY: &str = "error_code";
const ERROR_MESSAGE_KEY: &str = "error_message";
const SUB_ERROR_KEY: &str = "sub_error";
const USERNAME_KEY: &str = "username";

/// Installed broker the controller talks to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BrokerIdentity {
	/// Broker package name.
	pub package: PackageName,
	/// Broker app version; part of the hello cache key.
	pub app_version: String,
}
impl BrokerIdentity {
	/// Creates a broker identity.
	pub fn new(package: PackageName, app_version: impl Into<String>) -> Self {
		Self { package, app_version: app_version.into() }
	}
}

/// Token result returned by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenReply {
	/// Resolved token and account.
	pub authentication_result: LocalAuthenticationResult,
}

/// Account listing returned by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsReply {
	/// Accounts visible to the calling app.
	pub accounts: Vec<AccountRecord>,
}

/// Account removal result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedReply {
	/// Whether an account was removed.
	pub removed: bool,
}

/// Device mode query result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModeReply {
	/// Whether the device runs in shared-device mode.
	pub shared_device_mode: bool,
}

/// Payload that starts the broker's interactive UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LaunchReply {
	/// Opaque launch payload handed to the UI host.
	pub launch_payload: Bundle,
}

/// Controller backed by a [`BrokerOperationExecutor`].
#[derive(Clone)]
pub struct BrokerController {
	broker: BrokerIdentity,
	executor: BrokerOperationExecutor,
	hello_cache: Arc<HelloCache>,
	ui: Arc<dyn AuthorizationUi>,
	max_protocol_version: String,
}
impl BrokerController {
	/// Creates a controller using the strategies that support `broker`, in the given order.
	pub fn new(
		broker: BrokerIdentity,
		strategies: &[Arc<dyn IpcStrategy>],
		ui: Arc<dyn AuthorizationUi>,
	) -> Self {
		let executor = BrokerOperationExecutor::new(supported_strategies(strategies, &broker.package));

		Self {
			broker,
			executor,
			hello_cache: Arc::new(HelloCache::default()),
			ui,
			max_protocol_version: LATEST_PROTOCOL_VERSION.into(),
		}
	}

	/// Shares a hello cache between controllers.
	pub fn with_hello_cache(mut self, cache: Arc<HelloCache>) -> Self {
		self.hello_cache = cache;

		self
	}

	/// Routes per-strategy telemetry to `telemetry`.
	pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
		self.executor = self.executor.with_telemetry(telemetry);

		self
	}

	/// Overrides the maximum protocol version advertised during hello.
	pub fn with_max_protocol_version(mut self, version: impl Into<String>) -> Self {
		self.max_protocol_version = version.into();

		self
	}

	/// Executor used for every broker call.
	pub fn executor(&self) -> &BrokerOperationExecutor {
		&self.executor
	}

	/// Hello cache consulted before each call.
	pub fn hello_cache(&self) -> &HelloCache {
		&self.hello_cache
	}

	/// Negotiates the protocol version over `strategy`, consulting the hello cache first.
	///
	/// A cached handshake error fails immediately without IPC.
	pub fn hello(
		&self,
		strategy: &dyn IpcStrategy,
		params: &OperationParameters,
	) -> Result<String, StrategyError> {
		let key = HelloKey {
			min_version: params.required_broker_protocol_version.as_deref(),
			max_version: &self.max_protocol_version,
			package: &self.broker.package,
			app_version: &self.broker.app_version,
		};

		match self.hello_cache.get(key) {
			Some(HelloOutcome::Negotiated(version)) => return Ok(version),
			Some(HelloOutcome::HandshakeError) =>
				return Err(unsupported_version("A previous handshake with this broker failed.").into()),
			None => {},
		}

		let mut payload = Bundle::new().with(CLIENT_MAX_VERSION_KEY, self.max_protocol_version.as_str());

		if let Some(min) = key.min_version {
			payload.insert(CLIENT_MIN_VERSION_KEY, min);
		}

		let request = OperationBundle::new(BrokerApi::Hello, self.broker.package.clone(), payload);
		let reply = strategy.communicate_to_broker(&request)?;

		match reply.get_str(NEGOTIATED_VERSION_KEY) {
			Some(version) => {
				tracing::debug!(broker = %self.broker.package, version, "Negotiated broker protocol.");

				self.hello_cache.save_negotiated_version(key, version);

				Ok(version.to_owned())
			},
			None => {
				self.hello_cache.save_handshake_error(key);

				let message = reply
					.get_str(ERROR_MESSAGE_KEY)
					.unwrap_or("Broker does not support the requested protocol range.");

				Err(unsupported_version(message).into())
			},
		}
	}

	fn call<R>(
		&self,
		params: &OperationParameters,
		api: BrokerApi,
		extract: fn(&Bundle) -> Result<R>,
	) -> Result<R> {
		let mut operation =
			BrokerCall { controller: self, params, api, negotiated_version: None, extract };

		self.executor.execute(&mut operation)
	}

	fn continuation_result(&self, signal: SessionSignal) -> Result<AcquireTokenResult> {
		let continuation = match signal {
			SessionSignal::Completed(continuation) => continuation,
			SessionSignal::Cancelled =>
				return Ok(AcquireTokenResult::from_authorization(AuthorizationResult::sdk_cancel())),
		};

		if continuation.request_code != request_code::BROKER_FLOW {
			tracing::warn!(
				request_code = continuation.request_code,
				"Continuation does not belong to the broker flow."
			);
		}

		match continuation.result_code {
			result_code::BROKER_SUCCESS => token_reply(&continuation.data),
			result_code::CANCEL => Ok(AcquireTokenResult::from_authorization(
				AuthorizationResult::failure(AuthorizationStatus::UserCancel, None),
			)),
			result_code::SDK_CANCEL =>
				Ok(AcquireTokenResult::from_authorization(AuthorizationResult::sdk_cancel())),
			other => {
				check_broker_error(&continuation.data)?;

				Err(Error::client(
					codes::UNKNOWN_ERROR,
					format!("Broker finished with result code {other} and no error payload."),
				))
			},
		}
	}
}
impl Controller for BrokerController {
	fn name(&self) -> &'static str {
		"broker"
	}

	fn acquire_token_interactive(
		&self,
		params: &OperationParameters,
		session: &InteractiveSession,
	) -> Result<AcquireTokenResult> {
		let payload = self.call(params, BrokerApi::GetIntentForInteractiveRequest, launch_reply)?;

		self.ui.present(AuthorizationLaunch::Broker { request_code: request_code::BROKER_FLOW, payload })?;

		self.continuation_result(session.wait()?)
	}

	fn acquire_token_silent(&self, params: &OperationParameters) -> Result<AcquireTokenResult> {
		self.call(params, BrokerApi::AcquireTokenSilent, token_reply)
	}

	fn get_accounts(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>> {
		self.call(params, BrokerApi::GetAccounts, accounts_reply)
	}

	fn remove_account(&self, params: &OperationParameters) -> Result<bool> {
		self.call(params, BrokerApi::RemoveAccount, removed_reply)
	}

	fn get_device_mode(&self, params: &OperationParameters) -> Result<bool> {
		self.call(params, BrokerApi::GetDeviceMode, device_mode_reply)
	}

	fn get_current_account(&self, params: &OperationParameters) -> Result<Vec<AccountRecord>> {
		self.call(params, BrokerApi::GetCurrentAccountInSharedDevice, accounts_reply)
	}

	fn remove_current_account(&self, params: &OperationParameters) -> Result<bool> {
		self.call(params, BrokerApi::SignOutFromSharedDevice, removed_reply)
	}
}
impl Debug for BrokerController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerController")
			.field("broker", &self.broker)
			.field("executor", &self.executor)
			.field("max_protocol_version", &self.max_protocol_version)
			.finish()
	}
}

struct BrokerCall<'a, R> {
	controller: &'a BrokerController,
	params: &'a OperationParameters,
	api: BrokerApi,
	negotiated_version: Option<String>,
	extract: fn(&Bundle) -> Result<R>,
}
impl<R> BrokerOperation for BrokerCall<'_, R> {
	type Output = R;

	fn method_name(&self) -> &'static str {
		self.api.as_str()
	}

	fn perform_prerequisites(&mut self, strategy: &dyn IpcStrategy) -> Result<(), StrategyError> {
		self.negotiated_version = Some(self.controller.hello(strategy, self.params)?);

		Ok(())
	}

	fn bundle(&self) -> Result<OperationBundle> {
		let mut payload = Bundle::from_payload(self.params)?;

		if let Some(version) = self.negotiated_version.as_deref() {
			payload.insert(NEGOTIATED_VERSION_KEY, version);
		}

		Ok(OperationBundle::new(self.api, self.controller.broker.package.clone(), payload))
	}

	fn extract_result(&self, bundle: &Bundle) -> Result<R> {
		check_broker_error(bundle)?;

		(self.extract)(bundle)
	}
}

/// Fails with the taxonomy error matching a broker-reported `error_code`.
pub fn check_broker_error(bundle: &Bundle) -> Result<()> {
	let Some(code) = bundle.get_str(ERROR_CODE_KEY) else {
		return Ok(());
	};

	Err(normalize::error_from_code(
		code,
		bundle.get_str(ERROR_MESSAGE_KEY).unwrap_or_default(),
		bundle.get_str(SUB_ERROR_KEY).map(str::to_owned),
		bundle.get_str(USERNAME_KEY).map(str::to_owned),
	))
}

fn token_reply(bundle: &Bundle) -> Result<AcquireTokenResult> {
	check_broker_error(bundle)?;

	Ok(AcquireTokenResult::from_local(bundle.extract::<TokenReply>()?.authentication_result))
}

fn accounts_reply(bundle: &Bundle) -> Result<Vec<AccountRecord>> {
	Ok(bundle.extract::<AccountsReply>()?.accounts)
}

fn removed_reply(bundle: &Bundle) -> Result<bool> {
	Ok(bundle.extract::<RemovedReply>()?.removed)
}

fn device_mode_reply(bundle: &Bundle) -> Result<bool> {
	Ok(bundle.extract::<DeviceModeReply>()?.shared_device_mode)
}

fn launch_reply(bundle: &Bundle) -> Result<Bundle> {
	Ok(bundle.extract::<LaunchReply>()?.launch_payload)
}

fn unsupported_version(message: &str) -> ClientError {
	ClientError::new(codes::UNSUPPORTED_BROKER_VERSION, message)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::*,
		error::ErrorKind,
		ipc::IpcStrategyKind,
		strategy::AuthorizationContinuation,
	};

	fn broker() -> BrokerIdentity {
		BrokerIdentity::new(
			PackageName::new("com.example.broker").expect("Package fixture should be valid."),
			"1.0.0",
		)
	}

	fn controller(strategies: &[Arc<ScriptedStrategy>], ui: Arc<RecordingUi>) -> BrokerController {
		let strategies =
			strategies.iter().map(|s| s.clone() as Arc<dyn IpcStrategy>).collect::<Vec<_>>();

		BrokerController::new(broker(), &strategies, ui)
	}

	fn negotiated() -> StrategyReply {
		StrategyReply::Answer(Bundle::new().with(NEGOTIATED_VERSION_KEY, LATEST_PROTOCOL_VERSION))
	}

	fn token_bundle(access_token: &str) -> Bundle {
		Bundle::from_payload(&TokenReply { authentication_result: fixture_local(access_token) })
			.expect("Token reply fixture should serialize.")
	}

	fn launch_bundle() -> StrategyReply {
		StrategyReply::Answer(
			Bundle::from_payload(&LaunchReply { launch_payload: Bundle::new().with("intent", "broker-ui") })
				.expect("Launch reply fixture should serialize."),
		)
	}

	fn access_token(result: &AcquireTokenResult) -> Option<&str> {
		result.local.as_ref().map(|local| local.access_token.expose())
	}

	#[test]
	fn hello_runs_once_and_the_negotiated_version_is_forwarded() {
		let strategy = ScriptedStrategy::new(
			IpcStrategyKind::ContentProvider,
			[
				negotiated(),
				StrategyReply::Answer(token_bundle("at-1")),
				StrategyReply::Answer(token_bundle("at-2")),
			],
		);
		let controller = controller(&[strategy.clone()], Arc::new(RecordingUi::default()));
		let params = fixture_params();
		let first = controller.acquire_token_silent(&params).expect("First call should succeed.");
		let second = controller.acquire_token_silent(&params).expect("Second call should succeed.");

		assert_eq!(access_token(&first), Some("at-1"));
		assert_eq!(access_token(&second), Some("at-2"));
		assert_eq!(strategy.calls(), 3);

		let requests = strategy.requests();

		assert_eq!(requests[0].api, BrokerApi::Hello);
		assert_eq!(requests[0].payload.get_str(CLIENT_MAX_VERSION_KEY), Some(LATEST_PROTOCOL_VERSION));
		assert_eq!(requests[1].api, BrokerApi::AcquireTokenSilent);
		assert_eq!(requests[1].payload.get_str(NEGOTIATED_VERSION_KEY), Some(LATEST_PROTOCOL_VERSION));
		assert_eq!(requests[2].api, BrokerApi::AcquireTokenSilent);
	}

	#[test]
	fn cached_handshake_error_fails_without_ipc() {
		let strategy = ScriptedStrategy::new(
			IpcStrategyKind::BoundService,
			[StrategyReply::Answer(Bundle::new().with(ERROR_MESSAGE_KEY, "Client is too new."))],
		);
		let controller = controller(&[strategy.clone()], Arc::new(RecordingUi::default()));
		let params = fixture_params().with_required_broker_protocol_version("15.0");

		for _ in 0..2 {
			let error = controller
				.get_accounts(&params)
				.expect_err("An incompatible broker should be rejected.");

			assert_eq!(error.code(), codes::UNSUPPORTED_BROKER_VERSION);
		}

		assert_eq!(strategy.calls(), 1);
		assert_eq!(strategy.requests()[0].payload.get_str(CLIENT_MIN_VERSION_KEY), Some("15.0"));
	}

	#[test]
	fn broker_error_bundles_map_onto_the_taxonomy() {
		let strategy = ScriptedStrategy::new(
			IpcStrategyKind::ContentProvider,
			[
				negotiated(),
				StrategyReply::Answer(
					Bundle::new()
						.with(ERROR_CODE_KEY, codes::INVALID_GRANT)
						.with(ERROR_MESSAGE_KEY, "Refresh token expired.")
						.with(SUB_ERROR_KEY, "bad_token"),
				),
			],
		);
		let error = controller(&[strategy], Arc::new(RecordingUi::default()))
			.acquire_token_silent(&fixture_params())
			.expect_err("Broker errors should surface.");

		assert_eq!(error.kind(), ErrorKind::UiRequired);
		assert_eq!(error.sub_error(), Some("bad_token"));

		let registration = check_broker_error(
			&Bundle::new()
				.with(ERROR_CODE_KEY, codes::DEVICE_REGISTRATION_NEEDED)
				.with(USERNAME_KEY, "user@contoso.com"),
		)
		.expect_err("Registration errors should surface.");

		assert_eq!(registration.kind(), ErrorKind::DeviceRegistrationRequired);
		assert!(check_broker_error(&Bundle::new()).is_ok());
	}

	#[test]
	fn malformed_reply_is_an_invalid_bundle() {
		let strategy = ScriptedStrategy::new(
			IpcStrategyKind::ContentProvider,
			[negotiated(), StrategyReply::Answer(Bundle::new().with("accounts", "not-a-list"))],
		);
		let error = controller(&[strategy], Arc::new(RecordingUi::default()))
			.get_accounts(&fixture_params())
			.expect_err("Malformed bundles should be rejected.");

		assert_eq!(error.code(), codes::INVALID_BROKER_BUNDLE);
		assert!(error.message().contains("accounts"));
	}

	#[test]
	fn unreachable_broker_reports_bind_failure() {
		let strategies = [
			ScriptedStrategy::new(IpcStrategyKind::ContentProvider, [StrategyReply::Unreachable]),
			ScriptedStrategy::new(IpcStrategyKind::AccountManager, [StrategyReply::Unreachable]),
		];
		let error = controller(&strategies, Arc::new(RecordingUi::default()))
			.get_device_mode(&fixture_params())
			.expect_err("No strategy can reach the broker.");

		assert_eq!(error.code(), codes::BROKER_BIND_SERVICE_FAILED);
		assert!(strategies.iter().all(|s| s.calls() == 1));
	}

	#[test]
	fn device_mode_and_removal_read_their_replies() {
		let strategy = ScriptedStrategy::new(
			IpcStrategyKind::ContentProvider,
			[
				negotiated(),
				StrategyReply::Answer(Bundle::new().with("shared_device_mode", true)),
				StrategyReply::Answer(Bundle::new().with("removed", true)),
			],
		);
		let controller = controller(&[strategy.clone()], Arc::new(RecordingUi::default()));

		assert!(controller.get_device_mode(&fixture_params()).expect("Device mode should be read."));
		assert!(controller.remove_current_account(&fixture_params()).expect("Sign-out should succeed."));
		assert_eq!(strategy.requests()[2].api, BrokerApi::SignOutFromSharedDevice);
	}

	#[test]
	fn interactive_flow_launches_the_broker_ui_and_reads_the_continuation() {
		let session = Arc::new(InteractiveSession::new("corr-1", Some(Duration::seconds(5))));
		let ui = {
			let session = session.clone();

			Arc::new(RecordingUi::default().with_responder(move |_| {
				session.deliver(AuthorizationContinuation::new(
					request_code::BROKER_FLOW,
					result_code::BROKER_SUCCESS,
					token_bundle("at-ui"),
				));
			}))
		};
		let strategy =
			ScriptedStrategy::new(IpcStrategyKind::ContentProvider, [negotiated(), launch_bundle()]);
		let result = controller(&[strategy], ui.clone())
			.acquire_token_interactive(&fixture_params(), &session)
			.expect("Interactive flow should succeed.");

		assert_eq!(access_token(&result), Some("at-ui"));
		assert_eq!(
			ui.launches(),
			vec![AuthorizationLaunch::Broker {
				request_code: request_code::BROKER_FLOW,
				payload: Bundle::new().with("intent", "broker-ui"),
			}]
		);
	}

	#[test]
	fn interactive_cancellations_are_reported_through_the_result() {
		for (signal, status) in [
			(
				Some(AuthorizationContinuation::new(
					request_code::BROKER_FLOW,
					result_code::CANCEL,
					Bundle::new(),
				)),
				AuthorizationStatus::UserCancel,
			),
			(None, AuthorizationStatus::SdkCancel),
		] {
			let session = InteractiveSession::new("corr-1", None);

			match signal {
				Some(continuation) => session.deliver(continuation),
				None => session.cancel(),
			};

			let strategy =
				ScriptedStrategy::new(IpcStrategyKind::ContentProvider, [negotiated(), launch_bundle()]);
			let result = controller(&[strategy], Arc::new(RecordingUi::default()))
				.acquire_token_interactive(&fixture_params(), &session)
				.expect("Cancellation is reported through the result.");

			assert_eq!(result.authorization.map(|a| a.status), Some(status));
		}
	}
}
