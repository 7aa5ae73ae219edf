//! Single-resolution future a lane worker resolves and any number of threads wait on.

// std
use std::{mem, time::Instant};
// self
use crate::_prelude::*;

/// Failure of a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum WaitError {
	/// No value arrived before the deadline.
	#[error("Timed out waiting for the result.")]
	TimedOut,
}

type Listener<T> = Box<dyn FnOnce(T) + Send>;

struct FutureState<T> {
	value: Option<T>,
	listeners: Vec<Listener<T>>,
}

struct FutureInner<T> {
	state: Mutex<FutureState<T>>,
	ready: Condvar,
}

/// Value that is set at most once; later `set` calls are ignored.
pub struct ResultFuture<T>(Arc<FutureInner<T>>);
impl<T> ResultFuture<T>
where
	T: 'static + Clone + Send,
{
	/// Creates an unresolved future.
	pub fn new() -> Self {
		Self(Arc::new(FutureInner {
			state: Mutex::new(FutureState { value: None, listeners: Vec::new() }),
			ready: Condvar::new(),
		}))
	}

	/// Creates an already resolved future.
	pub fn completed(value: T) -> Self {
		let future = Self::new();

		future.set(value);

		future
	}

	/// Resolves the future; returns false if it was already resolved.
	///
	/// Waiters wake up and listeners run on the calling thread, outside the internal lock.
	pub fn set(&self, value: T) -> bool {
		let listeners = {
			let mut state = self.0.state.lock();

			if state.value.is_some() {
				return false;
			}

			state.value = Some(value.clone());

			mem::take(&mut state.listeners)
		};

		self.0.ready.notify_all();

		for listener in listeners {
			listener(value.clone());
		}

		true
	}

	/// Runs `listener` with the value once resolved; immediately if it already is.
	pub fn when_complete(&self, listener: impl 'static + FnOnce(T) + Send) {
		let mut state = self.0.state.lock();

		match state.value.clone() {
			Some(value) => {
				drop(state);
				listener(value);
			},
			None => state.listeners.push(Box::new(listener)),
		}
	}

	/// Returns true once resolved.
	pub fn is_done(&self) -> bool {
		self.0.state.lock().value.is_some()
	}

	/// Returns the value without blocking.
	pub fn try_get(&self) -> Option<T> {
		self.0.state.lock().value.clone()
	}

	/// Blocks until resolved.
	pub fn wait(&self) -> T {
		let mut state = self.0.state.lock();

		loop {
			if let Some(value) = state.value.as_ref() {
				return value.clone();
			}

			self.0.ready.wait(&mut state);
		}
	}

	/// Blocks until resolved or until `timeout` elapses.
	pub fn wait_timeout(&self, timeout: std::time::Duration) -> Result<T, WaitError> {
		let deadline = Instant::now() + timeout;
		let mut state = self.0.state.lock();

		loop {
			if let Some(value) = state.value.as_ref() {
				return Ok(value.clone());
			}
			if self.0.ready.wait_until(&mut state, deadline).timed_out() {
				return state.value.clone().ok_or(WaitError::TimedOut);
			}
		}
	}
}
impl<T> Clone for ResultFuture<T> {
	fn clone(&self) -> Self {
		Self(self.0.clone())
	}
}
impl<T> Default for ResultFuture<T>
where
	T: 'static + Clone + Send,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<T> Debug for ResultFuture<T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.0.state.lock();

		f.debug_struct("ResultFuture")
			.field("done", &state.value.is_some())
			.field("listeners", &state.listeners.len())
			.finish()
	}
}
