// self
use crate::{_prelude::*, obs::LaneKind};

/// Span wrapper used around command execution and broker calls.
#[derive(Clone, Debug)]
pub struct DispatchSpan {
	span: tracing::Span,
}
impl DispatchSpan {
	/// Span for a command running on `lane`.
	pub fn command(lane: LaneKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("identity_dispatch.command", lane = lane.as_str(), stage) }
	}

	/// Span for a broker operation.
	pub fn broker(method: &'static str, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("identity_dispatch.broker", method, stage) }
	}

	/// Enters the span until the guard drops.
	pub fn entered(self) -> DispatchSpanGuard {
		DispatchSpanGuard { _guard: self.span.entered() }
	}

	/// Runs `f` inside the span.
	pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
		self.span.in_scope(f)
	}
}

/// RAII guard returned by [`DispatchSpan::entered`].
pub struct DispatchSpanGuard {
	_guard: tracing::span::EnteredSpan,
}
impl Debug for DispatchSpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("DispatchSpanGuard(..)")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn spans_work_without_a_subscriber() {
		let _guard = DispatchSpan::command(LaneKind::Silent, "test").entered();
		let value = DispatchSpan::broker("hello", "test").in_scope(|| 42);

		assert_eq!(value, 42);
	}
}
