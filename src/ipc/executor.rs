//! Ordered-fallback execution of one broker operation across IPC strategies.

// self
use crate::{
	_prelude::*,
	error::{BrokerCommunicationError, ClientError, codes},
	ipc::{ActiveBrokerCache, Bundle, IpcStrategy, OperationBundle},
	obs::{self, DispatchSpan, NoopTelemetry, StrategyOutcome, TelemetryEvent, TelemetrySink},
};

/// Failure raised while preparing or running one strategy attempt.
#[derive(Debug, ThisError)]
pub enum StrategyError {
	/// The transport could not reach the broker; the next strategy is tried.
	#[error(transparent)]
	Communication(#[from] BrokerCommunicationError),
	/// Any other failure; iteration stops.
	#[error(transparent)]
	Fatal(#[from] Error),
}
impl From<ClientError> for StrategyError {
	fn from(e: ClientError) -> Self {
		Self::Fatal(e.into())
	}
}

/// Step reached by a strategy attempt; used as the `stage` span field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutorStage {
	/// Strategy-specific prerequisites such as the hello handshake.
	Prerequisites,
	/// Building the request payload.
	BundleBuild,
	/// Calling the transport.
	IpcCall,
	/// Parsing the result bundle.
	Extract,
}
impl ExecutorStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ExecutorStage::Prerequisites => "prerequisites",
			ExecutorStage::BundleBuild => "bundle_build",
			ExecutorStage::IpcCall => "ipc_call",
			ExecutorStage::Extract => "extract",
		}
	}
}

/// Terminal state of one strategy attempt.
#[derive(Debug)]
pub enum StrategyAttempt<T> {
	/// The broker answered and the result was extracted.
	Success(T),
	/// The transport failed; move on.
	RetryNextStrategy(BrokerCommunicationError),
	/// Stop and propagate.
	Fatal(Error),
}

/// One broker call, expressed as the steps the executor drives per strategy.
pub trait BrokerOperation {
	/// Typed result.
	type Output;

	/// Broker method name used in logs and telemetry.
	fn method_name(&self) -> &'static str;

	/// Public API id of the originating command, when known.
	fn telemetry_api_id(&self) -> Option<&str> {
		None
	}

	/// Runs strategy-specific prerequisites (typically the hello handshake).
	fn perform_prerequisites(&mut self, strategy: &dyn IpcStrategy) -> Result<(), StrategyError>;

	/// Builds the request.
	fn bundle(&self) -> Result<OperationBundle>;

	/// Parses the raw result; broker-reported errors come back as `Err`.
	fn extract_result(&self, bundle: &Bundle) -> Result<Self::Output>;
}

/// Runs [`BrokerOperation`]s over a priority-ordered strategy list.
#[derive(Clone)]
pub struct BrokerOperationExecutor {
	strategies: Vec<Arc<dyn IpcStrategy>>,
	active_broker: ActiveBrokerCache,
	telemetry: Arc<dyn TelemetrySink>,
}
impl BrokerOperationExecutor {
	/// Creates an executor over `strategies`, highest priority first.
	pub fn new(strategies: Vec<Arc<dyn IpcStrategy>>) -> Self {
		Self { strategies, active_broker: ActiveBrokerCache::default(), telemetry: Arc::new(NoopTelemetry) }
	}

	/// Shares an active broker cache with other executors.
	pub fn with_active_broker_cache(mut self, cache: ActiveBrokerCache) -> Self {
		self.active_broker = cache;

		self
	}

	/// Routes strategy events to `telemetry`.
	pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
		self.telemetry = telemetry;

		self
	}

	/// Configured strategies in priority order.
	pub fn strategies(&self) -> &[Arc<dyn IpcStrategy>] {
		&self.strategies
	}

	/// Active broker cache updated after every answered call.
	pub fn active_broker(&self) -> &ActiveBrokerCache {
		&self.active_broker
	}

	/// Runs `operation`, falling back across strategies on communication failures only.
	///
	/// A business error from any strategy stops iteration immediately. When every strategy fails
	/// to connect the result is `broker_bind_service_failed` carrying the per-strategy failures as
	/// suppressed diagnostics. An empty strategy list fails immediately.
	pub fn execute<O>(&self, operation: &mut O) -> Result<O::Output>
	where
		O: BrokerOperation,
	{
		let method = operation.method_name();

		if self.strategies.is_empty() {
			return Err(Error::client(
				codes::BROKER_BIND_SERVICE_FAILED,
				format!("No IPC strategy is configured for {method}."),
			));
		}

		let mut suppressed = Vec::new();

		for strategy in &self.strategies {
			let kind = strategy.kind();
			let (attempt, outcome) = match self.attempt(strategy.as_ref(), operation) {
				StrategyAttempt::Success(value) => (Ok(value), StrategyOutcome::Success),
				StrategyAttempt::RetryNextStrategy(e) => {
					tracing::warn!(method, strategy = %kind, error = %e, "IPC strategy failed; trying the next one.");

					suppressed.push(e);

					(Err(None), StrategyOutcome::CommunicationFailure)
				},
				StrategyAttempt::Fatal(e) => (Err(Some(e)), StrategyOutcome::Fatal),
			};

			obs::record_strategy_outcome(kind, outcome);
			self.telemetry.emit(TelemetryEvent::BrokerStrategy { method, strategy: kind, outcome });

			match attempt {
				Ok(value) => return Ok(value),
				Err(Some(e)) => return Err(e),
				Err(None) => continue,
			}
		}

		Err(ClientError::new(
			codes::BROKER_BIND_SERVICE_FAILED,
			format!("Unable to reach the broker for {method} through any IPC strategy."),
		)
		.with_suppressed(suppressed)
		.into())
	}

	fn attempt<O>(&self, strategy: &dyn IpcStrategy, operation: &mut O) -> StrategyAttempt<O::Output>
	where
		O: BrokerOperation,
	{
		let method = operation.method_name();

		if let Err(e) = DispatchSpan::broker(method, ExecutorStage::Prerequisites.as_str())
			.in_scope(|| operation.perform_prerequisites(strategy))
		{
			return match e {
				StrategyError::Communication(e) => StrategyAttempt::RetryNextStrategy(e),
				StrategyError::Fatal(e) => StrategyAttempt::Fatal(e),
			};
		}

		let request = match operation.bundle() {
			Ok(request) => request,
			Err(e) => return StrategyAttempt::Fatal(e),
		};
		let raw = match DispatchSpan::broker(method, ExecutorStage::IpcCall.as_str())
			.in_scope(|| strategy.communicate_to_broker(&request))
		{
			Ok(raw) => raw,
			Err(e) => return StrategyAttempt::RetryNextStrategy(e),
		};

		self.active_broker.update_from_result_bundle(&raw);

		match DispatchSpan::broker(method, ExecutorStage::Extract.as_str())
			.in_scope(|| operation.extract_result(&raw))
		{
			Ok(value) => StrategyAttempt::Success(value),
			Err(e) => StrategyAttempt::Fatal(e),
		}
	}
}
impl Debug for BrokerOperationExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerOperationExecutor")
			.field("strategies", &self.strategies.iter().map(|s| s.kind()).collect::<Vec<_>>())
			.field("active_broker", &self.active_broker)
			.finish()
	}
}
