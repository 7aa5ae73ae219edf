// self
use crate::{
	_prelude::*,
	ipc::IpcStrategyKind,
	obs::{LaneKind, StrategyOutcome},
};

/// Product telemetry events emitted by the dispatcher and the broker executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelemetryEvent {
	/// A command was accepted.
	ApiStart {
		/// Public API id of the command.
		api_id: String,
		/// Correlation id of the command.
		correlation_id: String,
		/// Lane the command was routed to.
		lane: LaneKind,
	},
	/// A command reached its terminal status.
	ApiEnd {
		/// Public API id of the command.
		api_id: String,
		/// Correlation id of the command.
		correlation_id: String,
		/// Terminal status label.
		status: &'static str,
	},
	/// A command was answered from the result cache.
	CacheHit {
		/// Public API id of the command.
		api_id: String,
		/// Correlation id of the command.
		correlation_id: String,
	},
	/// A new interactive command cancelled the one in flight.
	InteractiveCancelBroadcast {
		/// Correlation id of the new command.
		correlation_id: String,
	},
	/// One IPC strategy attempt finished.
	BrokerStrategy {
		/// Broker method name.
		method: &'static str,
		/// Strategy that ran.
		strategy: IpcStrategyKind,
		/// Attempt outcome.
		outcome: StrategyOutcome,
	},
}

/// Fire-and-forget telemetry sink. Implementations must not block.
pub trait TelemetrySink
where
	Self: Send + Sync,
{
	/// Records one event.
	fn emit(&self, event: TelemetryEvent);

	/// Flushes everything recorded for `correlation_id`, attaching the terminal error if any.
	fn flush(&self, correlation_id: &str, error: Option<&Error>);
}

/// Sink that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;
impl TelemetrySink for NoopTelemetry {
	fn emit(&self, _: TelemetryEvent) {}

	fn flush(&self, _: &str, _: Option<&Error>) {}
}
