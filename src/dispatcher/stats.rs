//! Dispatcher activity counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for dispatcher activity.
#[derive(Debug, Default)]
pub struct DispatchStats {
	submitted: AtomicU64,
	completed: AtomicU64,
	cancelled: AtomicU64,
	failed: AtomicU64,
	deduplicated: AtomicU64,
	cache_hits: AtomicU64,
	cancellations_broadcast: AtomicU64,
}
impl DispatchStats {
	/// Returns the number of commands handed to the dispatcher.
	pub fn submitted(&self) -> u64 {
		self.submitted.load(Ordering::Relaxed)
	}

	/// Returns the number of commands delivered through `on_task_completed`.
	pub fn completed(&self) -> u64 {
		self.completed.load(Ordering::Relaxed)
	}

	/// Returns the number of commands delivered through `on_cancel`.
	pub fn cancelled(&self) -> u64 {
		self.cancelled.load(Ordering::Relaxed)
	}

	/// Returns the number of commands delivered through `on_error`.
	pub fn failed(&self) -> u64 {
		self.failed.load(Ordering::Relaxed)
	}

	/// Returns the number of silent commands attached to an identical running command.
	pub fn deduplicated(&self) -> u64 {
		self.deduplicated.load(Ordering::Relaxed)
	}

	/// Returns the number of silent commands answered from the result cache.
	pub fn cache_hits(&self) -> u64 {
		self.cache_hits.load(Ordering::Relaxed)
	}

	/// Returns how many interactive submissions cancelled an in-flight session.
	pub fn cancellations_broadcast(&self) -> u64 {
		self.cancellations_broadcast.load(Ordering::Relaxed)
	}

	pub(crate) fn record_submitted(&self) {
		self.submitted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_completed(&self) {
		self.completed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cancelled(&self) {
		self.cancelled.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failed(&self) {
		self.failed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_deduplicated(&self) {
		self.deduplicated.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cache_hit(&self) {
		self.cache_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_cancellation_broadcast(&self) {
		self.cancellations_broadcast.fetch_add(1, Ordering::Relaxed);
	}
}
