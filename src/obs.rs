//! Observability helpers for command dispatch and broker IPC.
//!
//! - Structured spans: `identity_dispatch.command` (fields `lane`, `stage`) around command
//!   execution and `identity_dispatch.broker` (fields `method`, `stage`) around broker calls.
//! - Enable `metrics` to increment `identity_dispatch_command_total` (labels `lane` + `outcome`)
//!   and `identity_dispatch_ipc_strategy_total` (labels `strategy` + `outcome`).
//! - [`TelemetrySink`] receives product telemetry events and the per-command flush.

mod counters;
mod span;
mod telemetry;

pub use counters::*;
pub use span::*;
pub use telemetry::*;

// self
use crate::_prelude::*;

/// Execution lanes of the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LaneKind {
	/// Single-worker FIFO lane for commands that show UI.
	Interactive,
	/// Multi-worker lane for cache and refresh work.
	Silent,
}
impl LaneKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			LaneKind::Interactive => "interactive",
			LaneKind::Silent => "silent",
		}
	}
}
impl Display for LaneKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandOutcome {
	/// Command accepted by a lane.
	Attempt,
	/// `on_task_completed` delivered.
	Success,
	/// `on_cancel` delivered.
	Cancel,
	/// `on_error` delivered.
	Failure,
}
impl CommandOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CommandOutcome::Attempt => "attempt",
			CommandOutcome::Success => "success",
			CommandOutcome::Cancel => "cancel",
			CommandOutcome::Failure => "failure",
		}
	}
}
impl Display for CommandOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded per IPC strategy attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StrategyOutcome {
	/// The broker answered and the result was extracted.
	Success,
	/// The transport could not reach the broker; the next strategy is tried.
	CommunicationFailure,
	/// The broker answered with an error, or the request could not be built.
	Fatal,
}
impl StrategyOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StrategyOutcome::Success => "success",
			StrategyOutcome::CommunicationFailure => "communication_failure",
			StrategyOutcome::Fatal => "fatal",
		}
	}
}
impl Display for StrategyOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
