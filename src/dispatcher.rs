//! Command dispatch across the interactive and silent lanes.
//!
//! Interactive commands run one at a time on a single-worker lane and hold the
//! [`SessionRegistry`] slot while they execute. Silent commands run concurrently on a pooled lane,
//! share executions with identical in-flight commands, and may be answered from the
//! [`ResultCache`]. Every command ends with exactly one callback, posted through the configured
//! [`ResultPoster`], followed by a telemetry flush.

pub mod future;
pub mod lane;
pub mod result_cache;
pub mod session;
pub mod stats;

pub use future::*;
pub use lane::*;
pub use result_cache::*;
pub use session::*;
pub use stats::*;

// std
use std::{
	io,
	panic::{self, AssertUnwindSafe},
};
// self
use crate::{
	_prelude::*,
	command::{Command, CommandKey, CommandValue},
	config::DispatcherConfig,
	error::{ClientError, ConfigError, codes},
	ipc::Bundle,
	normalize,
	obs::{self, CommandOutcome, DispatchSpan, LaneKind, NoopTelemetry, TelemetryEvent, TelemetrySink},
	result::{CommandOutput, CommandResult, CommandStatus},
	strategy::AuthorizationContinuation,
};

/// Marshals terminal callbacks onto the caller's thread.
pub trait ResultPoster
where
	Self: Send + Sync,
{
	/// Schedules `task`; it must run exactly once.
	fn post(&self, task: Box<dyn FnOnce() + Send>);
}

/// Runs callbacks on whichever thread finished the command.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlinePoster;
impl ResultPoster for InlinePoster {
	fn post(&self, task: Box<dyn FnOnce() + Send>) {
		task();
	}
}

/// Errors raised while building a [`CommandDispatcher`].
#[derive(Debug, ThisError)]
pub enum DispatcherBuildError {
	/// The configuration failed validation.
	#[error("Dispatcher configuration is invalid.")]
	Config(#[from] ConfigError),
	/// Lane workers could not be spawned.
	#[error("Failed to spawn lane workers.")]
	Spawn(#[from] io::Error),
}

/// Builder for [`CommandDispatcher`].
pub struct CommandDispatcherBuilder {
	config: DispatcherConfig,
	telemetry: Arc<dyn TelemetrySink>,
	poster: Arc<dyn ResultPoster>,
	sessions: Option<SessionRegistry>,
}
impl CommandDispatcherBuilder {
	/// Replaces the configuration.
	pub fn config(mut self, config: DispatcherConfig) -> Self {
		self.config = config;

		self
	}

	/// Sets the telemetry sink.
	pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
		self.telemetry = telemetry;

		self
	}

	/// Sets how callbacks reach the caller's thread.
	pub fn result_poster(mut self, poster: Arc<dyn ResultPoster>) -> Self {
		self.poster = poster;

		self
	}

	/// Shares an existing session registry instead of creating one.
	pub fn session_registry(mut self, sessions: SessionRegistry) -> Self {
		self.sessions = Some(sessions);

		self
	}

	/// Validates the configuration and spawns both lanes.
	pub fn build(self) -> Result<CommandDispatcher, DispatcherBuildError> {
		self.config.validate()?;

		let silent = Lane::spawn(LaneKind::Silent, self.config.silent_workers)?;
		let interactive = Lane::spawn(LaneKind::Interactive, 1)?;
		let sessions =
			self.sessions.unwrap_or_else(|| SessionRegistry::new(self.config.interactive_timeout));
		let result_cache =
			ResultCache::new(self.config.result_cache_capacity, self.config.result_cache_ttl);

		Ok(CommandDispatcher(Arc::new(DispatcherInner {
			config: self.config,
			silent,
			interactive,
			interactive_lock: Mutex::new(()),
			sessions,
			executing: Mutex::new(HashMap::new()),
			result_cache,
			telemetry: self.telemetry,
			poster: self.poster,
			stats: DispatchStats::default(),
		})))
	}
}
impl Debug for CommandDispatcherBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CommandDispatcherBuilder").field("config", &self.config).finish()
	}
}

struct DispatcherInner {
	config: DispatcherConfig,
	silent: Lane,
	interactive: Lane,
	interactive_lock: Mutex<()>,
	sessions: SessionRegistry,
	executing: Mutex<HashMap<CommandKey, ResultFuture<CommandResult>>>,
	result_cache: ResultCache<CommandKey, CommandResult>,
	telemetry: Arc<dyn TelemetrySink>,
	poster: Arc<dyn ResultPoster>,
	stats: DispatchStats,
}

/// Routes commands to lanes and delivers their results; clones share the same lanes.
#[derive(Clone)]
pub struct CommandDispatcher(Arc<DispatcherInner>);
impl CommandDispatcher {
	/// Starts a builder with default configuration, no-op telemetry, and inline delivery.
	pub fn builder() -> CommandDispatcherBuilder {
		CommandDispatcherBuilder {
			config: DispatcherConfig::default(),
			telemetry: Arc::new(NoopTelemetry),
			poster: Arc::new(InlinePoster),
			sessions: None,
		}
	}

	/// Runs `command` on the silent lane.
	///
	/// Cache-eligible commands are answered from the result cache when possible and otherwise
	/// share the execution of an identical in-flight command. The returned future resolves with
	/// the same result the callback receives.
	pub fn submit_silent(&self, command: Command) -> ResultFuture<CommandResult> {
		self.start(&command, LaneKind::Silent);

		if !command.is_eligible_for_caching() {
			let future = ResultFuture::new();

			self.spawn_silent(Arc::new(command), None, future.clone());

			return future;
		}

		let key = command.key();

		if let Some(cached) = self.0.result_cache.get(&key) {
			self.0.stats.record_cache_hit();
			self.0.telemetry.emit(TelemetryEvent::CacheHit {
				api_id: command.public_api_id().to_owned(),
				correlation_id: command.correlation_id().to_owned(),
			});

			tracing::debug!(kind = %command.kind(), "Serving command result from the cache.");

			let cached = cached.attributed_to(command.correlation_id());

			self.deliver(&command, LaneKind::Silent, &cached);

			return ResultFuture::completed(cached);
		}

		let mut executing = self.0.executing.lock();
		let running = executing.get(&key).cloned();

		if let Some(running) = running {
			drop(executing);

			self.0.stats.record_deduplicated();

			tracing::debug!(kind = %command.kind(), "Attaching to an identical in-flight command.");

			let dispatcher = self.clone();

			running.when_complete(move |result| dispatcher.deliver(&command, LaneKind::Silent, &result));

			return running;
		}

		let future = ResultFuture::new();

		executing.insert(key.clone(), future.clone());
		drop(executing);

		self.spawn_silent(Arc::new(command), Some(key), future.clone());

		future
	}

	/// Submits `command` to the silent lane and blocks for its result.
	///
	/// The command's callback still fires. Waiting longer than `silent_sync_timeout` fails with
	/// `timed_out`; a cancelled command becomes [`Error::UserCancel`].
	pub fn submit_silent_sync(&self, command: Command) -> Result<CommandOutput> {
		let timeout = self.0.config.silent_sync_timeout.unsigned_abs();
		let correlation_id = command.correlation_id().to_owned();

		match self.submit_silent(command).wait_timeout(timeout) {
			Ok(result) => result.attributed_to(&correlation_id).into_result(),
			Err(e) => Err(ClientError::new(
				codes::TIMED_OUT,
				"Silent command did not finish within the synchronous timeout.",
			)
			.with_source(e)
			.into()),
		}
	}

	/// Runs `command` on the silent lane without de-duplication or result caching.
	pub fn submit_and_forget(&self, command: Command) {
		self.start(&command, LaneKind::Silent);
		self.spawn_silent(Arc::new(command), None, ResultFuture::new());
	}

	/// Cancels any in-flight interactive session, then queues `command` on the interactive lane.
	pub fn begin_interactive(&self, command: Command) {
		self.start(&command, LaneKind::Interactive);

		let command = Arc::new(command);
		let submitted = {
			let _lock = self.0.interactive_lock.lock();

			if self.0.sessions.cancel_active() {
				self.0.stats.record_cancellation_broadcast();
				self.0.telemetry.emit(TelemetryEvent::InteractiveCancelBroadcast {
					correlation_id: command.correlation_id().to_owned(),
				});

				tracing::info!(
					correlation_id = %command.correlation_id(),
					"Cancelled the in-flight interactive session for a newer request."
				);
			}

			let dispatcher = self.clone();
			let job_command = command.clone();

			self.0.interactive.submit(Box::new(move || dispatcher.run_interactive(&job_command)))
		};

		// Rejection runs the callback, which may re-enter `begin_interactive`.
		if submitted.is_err() {
			self.reject(&command, LaneKind::Interactive);
		}
	}

	/// Resumes the in-flight interactive command with an out-of-band UI result.
	///
	/// Returns false, after logging, when no interactive command is in flight.
	pub fn complete_interactive(&self, request_code: i32, result_code: i32, data: Bundle) -> bool {
		self.0.sessions.deliver(AuthorizationContinuation::new(request_code, result_code, data))
	}

	/// Stops the silent lane after draining queued work; later submissions fail with
	/// `executor_shutdown`.
	pub fn stop_silent_lane(&self) {
		self.0.silent.shutdown();
	}

	/// Starts a fresh silent lane.
	pub fn reset_silent_lane(&self) -> io::Result<()> {
		self.0.silent.restart()
	}

	/// Cancels the interactive session and stops both lanes.
	pub fn shutdown(&self) {
		self.0.sessions.cancel_active();
		self.0.interactive.shutdown();
		self.0.silent.shutdown();
	}

	/// Number of cache-eligible silent commands currently executing.
	pub fn outstanding_commands(&self) -> usize {
		self.0.executing.lock().len()
	}

	/// Number of cached results, expired ones included until looked up.
	pub fn cached_result_count(&self) -> usize {
		self.0.result_cache.len()
	}

	/// Drops every cached result.
	pub fn clear_result_cache(&self) {
		self.0.result_cache.clear();
	}

	/// Returns true while an interactive command holds the session slot.
	pub fn is_interactive_in_flight(&self) -> bool {
		self.0.sessions.is_active()
	}

	/// Session registry shared with the interactive lane.
	pub fn sessions(&self) -> &SessionRegistry {
		&self.0.sessions
	}

	/// Active configuration.
	pub fn config(&self) -> &DispatcherConfig {
		&self.0.config
	}

	/// Activity counters.
	pub fn stats(&self) -> &DispatchStats {
		&self.0.stats
	}

	fn start(&self, command: &Command, lane: LaneKind) {
		self.0.stats.record_submitted();
		obs::record_command_outcome(lane, CommandOutcome::Attempt);
		self.0.telemetry.emit(TelemetryEvent::ApiStart {
			api_id: command.public_api_id().to_owned(),
			correlation_id: command.correlation_id().to_owned(),
			lane,
		});
	}

	fn spawn_silent(
		&self,
		command: Arc<Command>,
		key: Option<CommandKey>,
		future: ResultFuture<CommandResult>,
	) {
		let dispatcher = self.clone();
		let job_command = command.clone();
		let job_key = key.clone();
		let job_future = future.clone();
		let job = Box::new(move || dispatcher.run_silent(&job_command, job_key, &job_future));

		if self.0.silent.submit(job).is_err() {
			let result = self.reject(&command, LaneKind::Silent);

			if let Some(key) = key {
				self.0.executing.lock().remove(&key);
			}

			future.set(result);
		}
	}

	fn run_silent(
		&self,
		command: &Command,
		key: Option<CommandKey>,
		future: &ResultFuture<CommandResult>,
	) {
		let result = {
			let _span = DispatchSpan::command(LaneKind::Silent, "execute").entered();

			CommandResult::new(execute(command, None), command.correlation_id())
		};

		if let Some(key) = key {
			if is_cacheable(&result) {
				self.0.result_cache.put(key.clone(), result.clone());
			}

			self.0.executing.lock().remove(&key);
		}

		future.set(result.clone());
		self.deliver(command, LaneKind::Silent, &result);
	}

	fn run_interactive(&self, command: &Command) {
		let status = {
			let _span = DispatchSpan::command(LaneKind::Interactive, "execute").entered();
			let guard = self.0.sessions.acquire(command.correlation_id());

			execute(command, Some(guard.session()))
		};

		self.deliver(command, LaneKind::Interactive, &CommandResult::new(status, command.correlation_id()));
	}

	fn reject(&self, command: &Command, lane: LaneKind) -> CommandResult {
		tracing::warn!(lane = %lane, kind = %command.kind(), "Lane is stopped; rejecting the command.");

		let result = CommandResult::new(
			CommandStatus::Failed(Error::client(
				codes::EXECUTOR_SHUTDOWN,
				format!("The {lane} lane is not accepting commands."),
			)),
			command.correlation_id(),
		);

		self.deliver(command, lane, &result);

		result
	}

	fn deliver(&self, command: &Command, lane: LaneKind, result: &CommandResult) {
		let status = result.attributed_to(command.correlation_id()).status;
		let outcome = match &status {
			CommandStatus::Completed(_) => {
				self.0.stats.record_completed();

				CommandOutcome::Success
			},
			CommandStatus::Cancelled => {
				self.0.stats.record_cancelled();

				CommandOutcome::Cancel
			},
			CommandStatus::Failed(e) => {
				self.0.stats.record_failed();

				tracing::debug!(lane = %lane, code = e.code(), kind = %e.kind(), "Command failed.");

				CommandOutcome::Failure
			},
		};

		obs::record_command_outcome(lane, outcome);
		self.0.telemetry.emit(TelemetryEvent::ApiEnd {
			api_id: command.public_api_id().to_owned(),
			correlation_id: command.correlation_id().to_owned(),
			status: status.as_str(),
		});

		let callback = command.callback().clone();
		let telemetry = self.0.telemetry.clone();
		let correlation_id = command.correlation_id().to_owned();

		self.0.poster.post(Box::new(move || {
			let error = match status {
				CommandStatus::Completed(output) => {
					callback.on_task_completed(output);

					None
				},
				CommandStatus::Cancelled => {
					callback.on_cancel();

					None
				},
				CommandStatus::Failed(e) => {
					callback.on_error(e.clone());

					Some(e)
				},
			};

			telemetry.flush(&correlation_id, error.as_ref());
		}));
	}
}
impl Debug for CommandDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CommandDispatcher")
			.field("config", &self.0.config)
			.field("silent", &self.0.silent)
			.field("interactive", &self.0.interactive)
			.field("sessions", &self.0.sessions)
			.finish()
	}
}

/// Maps a command's raw value onto its terminal status.
///
/// Errors and failed token results that normalize to a user cancellation become
/// [`CommandStatus::Cancelled`]; successful token results carry `correlation_id`.
pub fn classify(value: Result<CommandValue>, correlation_id: &str) -> CommandStatus {
	let error = match value {
		Ok(CommandValue::Output(output)) => return CommandStatus::Completed(output),
		Ok(CommandValue::Token(result)) => match result.local.clone().filter(|_| result.succeeded()) {
			Some(mut local) => {
				local.correlation_id = Some(correlation_id.to_owned());

				return CommandStatus::Completed(CommandOutput::Token(local));
			},
			None => normalize::error_from_acquire_token_result(&result),
		},
		Err(e) => e,
	};

	if error.is_user_cancel() { CommandStatus::Cancelled } else { CommandStatus::Failed(error) }
}

fn execute(command: &Command, session: Option<&InteractiveSession>) -> CommandStatus {
	match panic::catch_unwind(AssertUnwindSafe(|| command.execute(session))) {
		Ok(value) => classify(value, command.correlation_id()),
		Err(payload) => {
			tracing::error!(kind = %command.kind(), "Command execution panicked.");

			CommandStatus::Failed(normalize::error_from_panic(payload))
		},
	}
}

fn is_cacheable(result: &CommandResult) -> bool {
	match &result.status {
		CommandStatus::Completed(_) => true,
		CommandStatus::Cancelled => false,
		CommandStatus::Failed(e) => e.is_cacheable(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::success_token,
		error::ErrorKind,
		result::{
			AcquireTokenResult, AuthorizationResult, AuthorizationStatus, TokenErrorResponse,
			TokenResult,
		},
	};

	#[test]
	fn successful_token_result_carries_correlation_id() {
		let status = classify(Ok(CommandValue::Token(success_token("at"))), "corr-1");
		let CommandStatus::Completed(CommandOutput::Token(local)) = status else {
			panic!("Successful token results should complete.");
		};

		assert_eq!(local.correlation_id.as_deref(), Some("corr-1"));
	}

	#[test]
	fn user_cancel_is_never_reported_as_error() {
		let cancelled = AcquireTokenResult::from_authorization(AuthorizationResult::failure(
			AuthorizationStatus::UserCancel,
			None,
		));

		assert!(matches!(classify(Ok(CommandValue::Token(cancelled)), "c"), CommandStatus::Cancelled));
		assert!(matches!(classify(Err(Error::user_cancel("closed")), "c"), CommandStatus::Cancelled));
	}

	#[test]
	fn failed_token_results_are_normalized() {
		let failed = AcquireTokenResult::from_token(TokenResult::failure(TokenErrorResponse::new(
			"interaction_required",
		)));
		let CommandStatus::Failed(error) = classify(Ok(CommandValue::Token(failed)), "c") else {
			panic!("Failed token results should fail.");
		};

		assert_eq!(error.kind(), ErrorKind::UiRequired);

		let sdk_cancel = AcquireTokenResult::from_authorization(AuthorizationResult::sdk_cancel());
		let CommandStatus::Failed(error) = classify(Ok(CommandValue::Token(sdk_cancel)), "c") else {
			panic!("SDK cancellation is a client error.");
		};

		assert_eq!(error.code(), codes::AUTHORIZATION_CANCELLED_BY_SDK);
	}

	#[test]
	fn transient_failures_are_not_cached() {
		let io = CommandResult::new(CommandStatus::Failed(Error::client(codes::IO_ERROR, "")), "c");
		let missing_account = CommandResult::new(
			CommandStatus::Failed(Error::client(codes::NO_ACCOUNT_FOUND, "")),
			"c",
		);

		assert!(!is_cacheable(&io));
		assert!(is_cacheable(&missing_account));
		assert!(!is_cacheable(&CommandResult::new(CommandStatus::Cancelled, "c")));
	}
}
