use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A dedicated single-threaded executor. Used by the timestamp oracle to
/// run its batch allocator off the hot path: the allocator is the sole
/// writer of `max_allocated`, so giving it its own thread rather than a
/// shared pool keeps that invariant trivially true.
#[derive(Debug)]
pub struct Background {
	tx: Sender<Job>,
	busy: Arc<AtomicBool>,
	handle: Option<JoinHandle<()>>,
}

impl Background {
	pub fn spawn(name: impl Into<String>) -> Self {
		let name = name.into();
		let (tx, rx) = bounded::<Job>(1);
		let busy = Arc::new(AtomicBool::new(false));
		let handle = thread::Builder::new()
			.name(name.clone())
			.spawn(move || {
				tracing::debug!(thread = %name, "background executor started");
				for job in rx {
					job();
				}
			})
			.expect("failed to spawn background executor thread");
		Self { tx, busy, handle: Some(handle) }
	}

	/// Requests that `job` run on the background thread. Returns `false`
	/// without blocking if a job is already running or queued — the
	/// caller (the oracle) only needs to know a batch allocation is in
	/// flight, not to queue a second one.
	pub fn try_submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
		if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
			tracing::trace!("background submission skipped, a job is already in flight");
			return false;
		}
		let busy = self.busy.clone();
		let wrapped: Job = Box::new(move || {
			job();
			busy.store(false, Ordering::Release);
		});
		match self.tx.try_send(wrapped) {
			Ok(()) => true,
			Err(_) => {
				tracing::warn!("background submission rejected, queue is full");
				self.busy.store(false, Ordering::Release);
				false
			}
		}
	}
}

impl Drop for Background {
	fn drop(&mut self) {
		drop(self.tx.clone());
		if let Some(handle) = self.handle.take() {
			let _ = handle.join();
		}
	}
}
