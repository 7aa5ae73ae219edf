// self
use crate::{
	ipc::IpcStrategyKind,
	obs::{CommandOutcome, LaneKind, StrategyOutcome},
};

/// Records a command outcome via the global metrics recorder (when enabled).
pub fn record_command_outcome(lane: LaneKind, outcome: CommandOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"identity_dispatch_command_total",
			"lane" => lane.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (lane, outcome);
	}
}

/// Records an IPC strategy attempt via the global metrics recorder (when enabled).
pub fn record_strategy_outcome(strategy: IpcStrategyKind, outcome: StrategyOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"identity_dispatch_ipc_strategy_total",
			"strategy" => strategy.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (strategy, outcome);
	}
}
