//! Fixed-size worker pools backing the interactive and silent lanes.

// std
use std::{
	io,
	panic::{self, AssertUnwindSafe},
	sync::mpsc::{self, Receiver, Sender},
	thread::{self, JoinHandle},
};
// self
use crate::{_prelude::*, obs::LaneKind};

/// Unit of work executed by a lane worker.
pub type Job = Box<dyn FnOnce() + Send>;

/// FIFO queue drained by `workers` native threads.
pub struct Lane {
	kind: LaneKind,
	workers: usize,
	pool: Mutex<Option<WorkerPool>>,
}
impl Lane {
	/// Spawns the lane's workers.
	pub fn spawn(kind: LaneKind, workers: usize) -> io::Result<Self> {
		let pool = WorkerPool::spawn(kind, workers)?;

		Ok(Self { kind, workers, pool: Mutex::new(Some(pool)) })
	}

	/// Lane label.
	pub fn kind(&self) -> LaneKind {
		self.kind
	}

	/// Enqueues `job`; hands it back when the lane is stopped.
	pub fn submit(&self, job: Job) -> Result<(), Job> {
		match self.pool.lock().as_ref() {
			Some(pool) => pool.sender.send(job).map_err(|e| e.0),
			None => Err(job),
		}
	}

	/// Stops accepting work, lets queued jobs drain, and joins the workers.
	pub fn shutdown(&self) {
		let Some(pool) = self.pool.lock().take() else {
			return;
		};
		let WorkerPool { sender, handles } = pool;
		let current = thread::current().id();

		drop(sender);

		for handle in handles {
			if handle.thread().id() == current {
				continue;
			}
			if handle.join().is_err() {
				tracing::error!(lane = %self.kind, "Lane worker exited abnormally.");
			}
		}

		tracing::info!(lane = %self.kind, "Lane stopped.");
	}

	/// Shuts down the current pool, if any, and starts a fresh one.
	pub fn restart(&self) -> io::Result<()> {
		self.shutdown();

		let pool = WorkerPool::spawn(self.kind, self.workers)?;

		*self.pool.lock() = Some(pool);

		Ok(())
	}

	/// Returns true while the lane accepts work.
	pub fn is_running(&self) -> bool {
		self.pool.lock().is_some()
	}
}
impl Debug for Lane {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Lane")
			.field("kind", &self.kind)
			.field("workers", &self.workers)
			.field("running", &self.is_running())
			.finish()
	}
}

struct WorkerPool {
	sender: Sender<Job>,
	handles: Vec<JoinHandle<()>>,
}
impl WorkerPool {
	fn spawn(kind: LaneKind, workers: usize) -> io::Result<Self> {
		let (sender, receiver) = mpsc::channel::<Job>();
		let receiver = Arc::new(Mutex::new(receiver));
		let handles = (0..workers.max(1))
			.map(|index| {
				let receiver = receiver.clone();

				thread::Builder::new()
					.name(format!("identity-dispatch-{kind}-{index}"))
					.spawn(move || run_worker(kind, &receiver))
			})
			.collect::<io::Result<Vec<_>>>()?;

		Ok(Self { sender, handles })
	}
}

fn run_worker(kind: LaneKind, receiver: &Mutex<Receiver<Job>>) {
	loop {
		// The lock is released before the job runs so other workers keep draining.
		let job = receiver.lock().recv();
		let Ok(job) = job else {
			break;
		};

		if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
			tracing::error!(lane = %kind, "Lane job panicked; the worker keeps running.");
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::{
		atomic::{AtomicUsize, Ordering},
		mpsc,
	};
	// self
	use super::*;

	#[test]
	fn single_worker_lane_runs_jobs_in_submission_order() {
		let lane = Lane::spawn(LaneKind::Interactive, 1).expect("Lane should spawn.");
		let order = Arc::new(Mutex::new(Vec::new()));

		for i in 0..5 {
			let order = order.clone();

			assert!(lane.submit(Box::new(move || order.lock().push(i))).is_ok());
		}

		lane.shutdown();

		assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
	}

	#[test]
	fn panicking_job_does_not_kill_the_worker() {
		let lane = Lane::spawn(LaneKind::Silent, 1).expect("Lane should spawn.");
		let (tx, rx) = mpsc::channel();

		assert!(lane.submit(Box::new(|| panic!("job failure"))).is_ok());
		assert!(lane.submit(Box::new(move || tx.send(()).expect("Receiver should be alive."))).is_ok());

		rx.recv().expect("Second job should still run.");
		lane.shutdown();
	}

	#[test]
	fn stopped_lane_rejects_until_restarted() {
		let lane = Lane::spawn(LaneKind::Silent, 2).expect("Lane should spawn.");
		let ran = Arc::new(AtomicUsize::new(0));

		lane.shutdown();

		assert!(!lane.is_running());
		assert!(lane.submit(Box::new(|| {})).is_err());

		lane.restart().expect("Lane should restart.");

		let counter = ran.clone();

		assert!(lane.submit(Box::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
		}))
		.is_ok());

		lane.shutdown();

		assert_eq!(ran.load(Ordering::SeqCst), 1);
	}
}
