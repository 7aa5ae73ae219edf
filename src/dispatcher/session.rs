//! Registry for the single in-flight interactive session.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	dispatcher::ResultFuture,
	error::{ClientError, codes},
	strategy::AuthorizationContinuation,
};

/// How an interactive session ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionSignal {
	/// The UI host delivered a continuation.
	Completed(AuthorizationContinuation),
	/// A newer interactive request replaced this one.
	Cancelled,
}

/// One interactive execution window; its controller blocks on [`wait`](Self::wait).
#[derive(Debug)]
pub struct InteractiveSession {
	id: u64,
	correlation_id: String,
	timeout: Option<Duration>,
	signal: ResultFuture<SessionSignal>,
}
impl InteractiveSession {
	/// Creates a standalone session; the dispatcher creates them through [`SessionRegistry`].
	pub fn new(correlation_id: impl Into<String>, timeout: Option<Duration>) -> Self {
		Self { id: 0, correlation_id: correlation_id.into(), timeout, signal: ResultFuture::new() }
	}

	/// Correlation id of the command that owns the session.
	pub fn correlation_id(&self) -> &str {
		&self.correlation_id
	}

	/// Resolves the session with a continuation; false when already resolved.
	pub fn deliver(&self, continuation: AuthorizationContinuation) -> bool {
		self.signal.set(SessionSignal::Completed(continuation))
	}

	/// Resolves the session as cancelled; false when already resolved.
	pub fn cancel(&self) -> bool {
		self.signal.set(SessionSignal::Cancelled)
	}

	/// Returns true once delivered or cancelled.
	pub fn is_resolved(&self) -> bool {
		self.signal.is_done()
	}

	/// Blocks until the session resolves.
	///
	/// With a timeout configured, an unresolved session fails with `timed_out` and is marked
	/// cancelled so late continuations are ignored.
	pub fn wait(&self) -> Result<SessionSignal> {
		let Some(timeout) = self.timeout else {
			return Ok(self.signal.wait());
		};

		match self.signal.wait_timeout(timeout.unsigned_abs()) {
			Ok(signal) => Ok(signal),
			Err(e) => {
				self.signal.set(SessionSignal::Cancelled);

				tracing::warn!(
					correlation_id = %self.correlation_id,
					"Interactive session timed out waiting for the UI host."
				);

				Err(ClientError::new(codes::TIMED_OUT, "No interactive result arrived in time.")
					.with_source(e)
					.into())
			},
		}
	}
}

struct RegistryInner {
	active: Mutex<Option<Arc<InteractiveSession>>>,
	next_id: AtomicU64,
	timeout: Option<Duration>,
}

/// Holds at most one active [`InteractiveSession`].
#[derive(Clone)]
pub struct SessionRegistry(Arc<RegistryInner>);
impl SessionRegistry {
	/// Creates an empty registry whose sessions wait at most `timeout`.
	pub fn new(timeout: Option<Duration>) -> Self {
		Self(Arc::new(RegistryInner {
			active: Mutex::new(None),
			next_id: AtomicU64::new(1),
			timeout,
		}))
	}

	/// Claims the slot; `None` while another session holds it.
	pub fn try_acquire(&self, correlation_id: &str) -> Option<SessionGuard> {
		let mut active = self.0.active.lock();

		if active.is_some() {
			return None;
		}

		let session = self.open(correlation_id);

		*active = Some(session.clone());

		Some(SessionGuard { registry: self.clone(), session })
	}

	/// Claims the slot, cancelling whatever session still holds it.
	pub fn acquire(&self, correlation_id: &str) -> SessionGuard {
		let session = self.open(correlation_id);

		if let Some(stale) = self.0.active.lock().replace(session.clone()) {
			stale.cancel();

			tracing::debug!(
				correlation_id = %stale.correlation_id,
				"Replaced a stale interactive session."
			);
		}

		SessionGuard { registry: self.clone(), session }
	}

	/// Cancels the active session; returns whether one was active.
	pub fn cancel_active(&self) -> bool {
		match self.0.active.lock().as_ref() {
			Some(session) => {
				session.cancel();

				true
			},
			None => false,
		}
	}

	/// Delivers a continuation to the active session; logs and returns false when none is active.
	pub fn deliver(&self, continuation: AuthorizationContinuation) -> bool {
		let Some(session) = self.active() else {
			tracing::warn!(
				request_code = continuation.request_code,
				result_code = continuation.result_code,
				"No interactive session is in flight; dropping the continuation."
			);

			return false;
		};

		session.deliver(continuation)
	}

	/// Returns the active session.
	pub fn active(&self) -> Option<Arc<InteractiveSession>> {
		self.0.active.lock().clone()
	}

	/// Returns true while a session holds the slot.
	pub fn is_active(&self) -> bool {
		self.0.active.lock().is_some()
	}

	fn open(&self, correlation_id: &str) -> Arc<InteractiveSession> {
		Arc::new(InteractiveSession {
			id: self.0.next_id.fetch_add(1, Ordering::Relaxed),
			correlation_id: correlation_id.to_owned(),
			timeout: self.0.timeout,
			signal: ResultFuture::new(),
		})
	}

	fn release(&self, id: u64) {
		let mut active = self.0.active.lock();

		if active.as_ref().is_some_and(|session| session.id == id) {
			active.take();
		}
	}
}
impl Debug for SessionRegistry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionRegistry")
			.field("active", &self.active().map(|s| s.correlation_id.clone()))
			.field("timeout", &self.0.timeout)
			.finish()
	}
}

/// Owns the registry slot until dropped.
#[derive(Debug)]
pub struct SessionGuard {
	registry: SessionRegistry,
	session: Arc<InteractiveSession>,
}
impl SessionGuard {
	/// Session held by this guard.
	pub fn session(&self) -> &InteractiveSession {
		&self.session
	}
}
impl Drop for SessionGuard {
	fn drop(&mut self) {
		self.registry.release(self.session.id);
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::thread;
	// self
	use super::*;
	use crate::{ipc::Bundle, strategy::request_code};

	fn continuation() -> AuthorizationContinuation {
		AuthorizationContinuation::new(request_code::BROWSER_FLOW, 0, Bundle::new())
	}

	#[test]
	fn slot_holds_one_session_and_releases_on_drop() {
		let registry = SessionRegistry::new(None);
		let guard = registry.try_acquire("a").expect("Empty registry should grant the slot.");

		assert!(registry.try_acquire("b").is_none());
		assert!(registry.is_active());

		drop(guard);

		assert!(!registry.is_active());
		assert!(registry.try_acquire("b").is_some());
	}

	#[test]
	fn stale_guard_does_not_release_its_replacement() {
		let registry = SessionRegistry::new(None);
		let stale = registry.acquire("a");
		let fresh = registry.acquire("b");

		assert!(stale.session().is_resolved(), "Replaced sessions must be cancelled.");

		drop(stale);

		assert_eq!(
			registry.active().map(|s| s.correlation_id().to_owned()).as_deref(),
			Some("b")
		);

		drop(fresh);

		assert!(!registry.is_active());
	}

	#[test]
	fn deliver_wakes_the_waiting_session() {
		let registry = SessionRegistry::new(Some(Duration::seconds(5)));
		let guard = registry.try_acquire("a").expect("Empty registry should grant the slot.");
		let deliverer = registry.clone();
		let handle = thread::spawn(move || deliverer.deliver(continuation()));
		let signal = guard.session().wait().expect("Delivered sessions should not time out.");

		assert_eq!(signal, SessionSignal::Completed(continuation()));
		assert!(handle.join().expect("Delivering thread should not panic."));
	}

	#[test]
	fn cancel_and_timeout_resolve_waiters() {
		let registry = SessionRegistry::new(Some(Duration::milliseconds(10)));

		assert!(!registry.cancel_active());
		assert!(!registry.deliver(continuation()));

		let guard = registry.try_acquire("a").expect("Empty registry should grant the slot.");

		assert!(registry.cancel_active());
		assert_eq!(guard.session().wait().expect("Cancelled sessions resolve."), SessionSignal::Cancelled);

		drop(guard);

		let guard = registry.try_acquire("b").expect("Released slot should be free.");
		let error = guard.session().wait().expect_err("Unresolved sessions must time out.");

		assert_eq!(error.code(), codes::TIMED_OUT);
		assert!(!guard.session().deliver(continuation()), "Timed out sessions ignore late results.");
	}
}
