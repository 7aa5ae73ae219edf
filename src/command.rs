//! Commands: one operation, its parameters, the controllers to try, and the callback to notify.

// crates.io
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	controller::{Controller, ControllerOutcome, FallbackValue, classify_attempt},
	dispatcher::InteractiveSession,
	error::codes,
	params::OperationParameters,
	result::{AcquireTokenResult, CommandOutput},
};

/// Operation a command performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	/// Interactive token acquisition.
	AcquireTokenInteractive,
	/// Silent token acquisition.
	AcquireTokenSilent,
	/// Account listing.
	GetAccounts,
	/// Account removal.
	RemoveAccount,
	/// Shared-device mode query.
	GetDeviceMode,
	/// Current account lookup.
	GetCurrentAccount,
	/// Current account sign-out.
	RemoveCurrentAccount,
}
impl OperationKind {
	/// Returns a stable label; also the default public API id.
	pub const fn as_str(self) -> &'static str {
		match self {
			OperationKind::AcquireTokenInteractive => "acquire_token_interactive",
			OperationKind::AcquireTokenSilent => "acquire_token_silent",
			OperationKind::GetAccounts => "get_accounts",
			OperationKind::RemoveAccount => "remove_account",
			OperationKind::GetDeviceMode => "get_device_mode",
			OperationKind::GetCurrentAccount => "get_current_account",
			OperationKind::RemoveCurrentAccount => "remove_current_account",
		}
	}

	/// Returns true for operations that need the interactive lane.
	pub const fn is_interactive(self) -> bool {
		matches!(self, OperationKind::AcquireTokenInteractive)
	}

	/// Returns true for idempotent reads whose results may be de-duplicated and cached.
	pub const fn is_eligible_for_caching(self) -> bool {
		matches!(
			self,
			OperationKind::AcquireTokenSilent
				| OperationKind::GetAccounts
				| OperationKind::GetCurrentAccount
				| OperationKind::GetDeviceMode
		)
	}
}
impl Display for OperationKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Terminal notifications for one command; exactly one method is called, once.
pub trait CommandCallback
where
	Self: Send + Sync,
{
	/// The command produced a value.
	fn on_task_completed(&self, output: CommandOutput);

	/// The user cancelled the flow.
	fn on_cancel(&self);

	/// The command failed.
	fn on_error(&self, error: Error);
}

/// Identity of a command: its kind and parameters, without controllers or callback.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommandKey {
	/// Operation kind.
	pub kind: OperationKind,
	/// Operation parameters (correlation id excluded from equality).
	pub parameters: OperationParameters,
}

/// Errors raised while building a [`Command`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CommandBuildError {
	/// A command needs at least one controller to run.
	#[error("A command requires at least one controller.")]
	NoControllers,
}

/// Raw value produced by running a command.
#[derive(Clone, Debug)]
pub enum CommandValue {
	/// Token operations, classified by the dispatcher.
	Token(AcquireTokenResult),
	/// Everything else, delivered as-is.
	Output(CommandOutput),
}

/// One submission to the dispatcher.
pub struct Command {
	kind: OperationKind,
	parameters: OperationParameters,
	controllers: Vec<Arc<dyn Controller>>,
	callback: Arc<dyn CommandCallback>,
	public_api_id: String,
	correlation_id: String,
}
impl Command {
	/// Creates a command; a missing correlation id is generated and written into the parameters.
	pub fn new(
		kind: OperationKind,
		mut parameters: OperationParameters,
		controllers: Vec<Arc<dyn Controller>>,
		callback: Arc<dyn CommandCallback>,
	) -> Result<Self, CommandBuildError> {
		if controllers.is_empty() {
			return Err(CommandBuildError::NoControllers);
		}

		let correlation_id =
			parameters.correlation_id.get_or_insert_with(|| Uuid::new_v4().to_string()).clone();

		Ok(Self {
			kind,
			parameters,
			controllers,
			callback,
			public_api_id: kind.as_str().into(),
			correlation_id,
		})
	}

	/// Overrides the telemetry API id.
	pub fn with_public_api_id(mut self, api_id: impl Into<String>) -> Self {
		self.public_api_id = api_id.into();

		self
	}

	/// Operation kind.
	pub fn kind(&self) -> OperationKind {
		self.kind
	}

	/// Operation parameters.
	pub fn parameters(&self) -> &OperationParameters {
		&self.parameters
	}

	/// Controllers in the order they are tried.
	pub fn controllers(&self) -> &[Arc<dyn Controller>] {
		&self.controllers
	}

	/// Terminal callback.
	pub fn callback(&self) -> &Arc<dyn CommandCallback> {
		&self.callback
	}

	/// Telemetry API id.
	pub fn public_api_id(&self) -> &str {
		&self.public_api_id
	}

	/// Correlation id shared by logs, telemetry, and the produced result.
	pub fn correlation_id(&self) -> &str {
		&self.correlation_id
	}

	/// Whether identical commands may share executions and cached results.
	pub fn is_eligible_for_caching(&self) -> bool {
		self.kind.is_eligible_for_caching()
	}

	/// Identity used for de-duplication and the result cache.
	pub fn key(&self) -> CommandKey {
		CommandKey { kind: self.kind, parameters: self.parameters.clone() }
	}

	/// Runs the operation across the controllers.
	///
	/// Interactive commands require `session`.
	pub fn execute(&self, session: Option<&InteractiveSession>) -> Result<CommandValue> {
		let params = &self.parameters;

		match self.kind {
			OperationKind::AcquireTokenInteractive => {
				let session = session.ok_or_else(|| {
					Error::client(
						codes::MISSING_INTERACTIVE_SESSION,
						"Interactive commands must run on the interactive lane.",
					)
				})?;

				self.run_with_fallback(|c| c.acquire_token_interactive(params, session))
					.map(CommandValue::Token)
			},
			OperationKind::AcquireTokenSilent =>
				self.run_with_fallback(|c| c.acquire_token_silent(params)).map(CommandValue::Token),
			OperationKind::GetAccounts => self
				.run_with_fallback(|c| c.get_accounts(params))
				.map(|accounts| CommandValue::Output(CommandOutput::Accounts(accounts))),
			OperationKind::RemoveAccount => self
				.run_with_fallback(|c| c.remove_account(params))
				.map(|removed| CommandValue::Output(CommandOutput::Removed(removed))),
			OperationKind::GetDeviceMode => self
				.run_with_fallback(|c| c.get_device_mode(params))
				.map(|shared| CommandValue::Output(CommandOutput::SharedDeviceMode(shared))),
			OperationKind::GetCurrentAccount => self
				.run_with_fallback(|c| c.get_current_account(params))
				.map(|accounts| CommandValue::Output(CommandOutput::Accounts(accounts))),
			OperationKind::RemoveCurrentAccount => self
				.run_with_fallback(|c| c.remove_current_account(params))
				.map(|removed| CommandValue::Output(CommandOutput::Removed(removed))),
		}
	}

	/// Tries each controller in order until one returns a non-retryable outcome.
	pub fn run_with_fallback<T>(&self, mut operation: impl FnMut(&dyn Controller) -> Result<T>) -> Result<T>
	where
		T: FallbackValue,
	{
		let last = self.controllers.len() - 1;

		for (index, controller) in self.controllers.iter().enumerate() {
			match classify_attempt(operation(controller.as_ref()), index == last) {
				ControllerOutcome::Success(value) => return Ok(value),
				ControllerOutcome::FatalFailure(e) => return Err(e),
				ControllerOutcome::RetryableFailure(kind) => {
					tracing::info!(
						controller = controller.name(),
						reason = kind.as_str(),
						correlation_id = %self.correlation_id,
						"Controller failed with a retryable error; trying the next one."
					);
				},
			}
		}

		Err(Error::client(codes::UNKNOWN_ERROR, "Every controller asked to fall through."))
	}
}
impl PartialEq for Command {
	fn eq(&self, other: &Self) -> bool {
		self.kind == other.kind && self.parameters == other.parameters
	}
}
impl Eq for Command {}
impl Hash for Command {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.kind.hash(state);
		self.parameters.hash(state);
	}
}
impl Debug for Command {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Command")
			.field("kind", &self.kind)
			.field("public_api_id", &self.public_api_id)
			.field("correlation_id", &self.correlation_id)
			.field("controllers", &self.controllers.iter().map(|c| c.name()).collect::<Vec<_>>())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{
		ControllerReply, RecordingCallback, ScriptedController, controllers, fixture_params,
		success_token,
	};

	fn command(kind: OperationKind, controllers: Vec<Arc<dyn Controller>>) -> Command {
		Command::new(kind, fixture_params(), controllers, Arc::new(RecordingCallback::default()))
			.expect("Command fixture should build.")
	}

	#[test]
	fn empty_controller_list_is_rejected() {
		let result = Command::new(
			OperationKind::AcquireTokenSilent,
			fixture_params(),
			Vec::new(),
			Arc::new(RecordingCallback::default()),
		);

		assert_eq!(result.err(), Some(CommandBuildError::NoControllers));
	}

	#[test]
	fn correlation_id_is_generated_or_preserved() {
		let listing = ScriptedController::new("c1", [ControllerReply::Accounts(Vec::new())]);
		let generated = command(OperationKind::GetAccounts, controllers([&listing]));

		assert!(Uuid::parse_str(generated.correlation_id()).is_ok());
		assert_eq!(generated.parameters().correlation_id.as_deref(), Some(generated.correlation_id()));

		let preserved = Command::new(
			OperationKind::GetAccounts,
			fixture_params().with_correlation_id("corr-1"),
			controllers([&listing]),
			Arc::new(RecordingCallback::default()),
		)
		.expect("Command fixture should build.");

		assert_eq!(preserved.correlation_id(), "corr-1");
	}

	#[test]
	fn identity_ignores_controllers_callback_and_correlation() {
		let c1 = ScriptedController::new("c1", [ControllerReply::Token(success_token("a"))]);
		let c2 = ScriptedController::new("c2", [ControllerReply::Fail(Error::client("x", ""))]);
		let lhs = command(OperationKind::AcquireTokenSilent, controllers([&c1]));
		let rhs = command(OperationKind::AcquireTokenSilent, controllers([&c2]));

		assert_ne!(lhs.correlation_id(), rhs.correlation_id());
		assert_eq!(lhs, rhs);
		assert_eq!(lhs.key(), rhs.key());
		assert_ne!(lhs.key(), command(OperationKind::GetAccounts, controllers([&c1])).key());
	}

	#[test]
	fn no_account_found_falls_through_to_next_controller() {
		let first = ScriptedController::new(
			"c1",
			[ControllerReply::Fail(Error::client(codes::NO_ACCOUNT_FOUND, "missing"))],
		);
		let second = ScriptedController::new("c2", [ControllerReply::Token(success_token("c2"))]);
		let command = command(OperationKind::AcquireTokenSilent, controllers([&first, &second]));
		let CommandValue::Token(result) = command.execute(None).expect("Second controller should win.")
		else {
			panic!("Silent acquisition should produce a token value.");
		};

		assert!(result.succeeded());
		assert_eq!(result.local.map(|l| l.access_token.expose().to_owned()).as_deref(), Some("c2"));
		assert_eq!((first.calls(), second.calls()), (1, 1));
	}

	#[test]
	fn fatal_error_skips_remaining_controllers() {
		let first =
			ScriptedController::new("c1", [ControllerReply::Fail(Error::client(codes::IO_ERROR, "disk"))]);
		let second = ScriptedController::new("c2", [ControllerReply::Token(success_token("c2"))]);
		let error = command(OperationKind::AcquireTokenSilent, controllers([&first, &second]))
			.execute(None)
			.expect_err("I/O failures are fatal.");

		assert_eq!(error.code(), codes::IO_ERROR);
		assert_eq!(second.calls(), 0);
	}

	#[test]
	fn last_controller_reports_retryable_errors() {
		let only = ScriptedController::new(
			"c1",
			[ControllerReply::Fail(Error::client(codes::NO_TOKENS_FOUND, "empty"))],
		);
		let error = command(OperationKind::AcquireTokenSilent, controllers([&only]))
			.execute(None)
			.expect_err("The final controller's failure must surface.");

		assert_eq!(error.code(), codes::NO_TOKENS_FOUND);
	}

	#[test]
	fn interactive_command_requires_a_session() {
		let controller = ScriptedController::new("c1", [ControllerReply::Token(success_token("a"))]);
		let error = command(OperationKind::AcquireTokenInteractive, controllers([&controller]))
			.execute(None)
			.expect_err("Interactive commands need a session.");

		assert_eq!(error.code(), codes::MISSING_INTERACTIVE_SESSION);
		assert_eq!(controller.calls(), 0);
	}

	#[test]
	fn caching_eligibility_follows_kind() {
		assert!(OperationKind::AcquireTokenSilent.is_eligible_for_caching());
		assert!(OperationKind::GetDeviceMode.is_eligible_for_caching());
		assert!(!OperationKind::AcquireTokenInteractive.is_eligible_for_caching());
		assert!(!OperationKind::RemoveAccount.is_eligible_for_caching());
	}
}
