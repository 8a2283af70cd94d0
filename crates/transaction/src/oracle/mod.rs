mod storage;

pub use storage::{InMemoryTimestampStorage, StorageError, TimestampStorage};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::instrument;

use tso_core::{Panicker, ProcessPanicker, Timestamp, TsoConfig};
use tso_runtime::Background;

/// Produces a strictly increasing sequence of 64-bit timestamps.
/// Maintains three scalars — `last` (handed out), `max` (current
/// ceiling), `max_allocated` (latest ceiling durably stored) — and
/// amortizes durability cost over `batch` timestamps by pre-allocating
/// ceiling space on a dedicated background thread.
#[derive(Debug)]
pub struct TimestampOracle<S: TimestampStorage> {
	storage: Arc<S>,
	last: AtomicU64,
	max: AtomicU64,
	max_allocated: Arc<AtomicU64>,
	batch: u64,
	threshold: u64,
	background: Background,
	panicker: Arc<dyn Panicker>,
}

impl<S: TimestampStorage + 'static> TimestampOracle<S> {
	pub fn new(storage: S, batch: u64, threshold: u64) -> Self {
		Self::with_panicker(storage, batch, threshold, Arc::new(ProcessPanicker))
	}

	/// Builds an oracle from `config.timestamp_batch`/`timestamp_threshold`,
	/// validating the shape up front instead of the bare `assert!`
	/// `with_panicker` relies on. Prefer this constructor wherever a
	/// `TsoConfig` is already in hand.
	pub fn from_config(storage: S, config: &TsoConfig) -> tso_core::error::Result<Self> {
		config.validate()?;
		Ok(Self::with_panicker(storage, config.timestamp_batch, config.timestamp_threshold, Arc::new(ProcessPanicker)))
	}

	pub fn with_panicker(storage: S, batch: u64, threshold: u64, panicker: Arc<dyn Panicker>) -> Self {
		assert!(threshold < batch, "timestamp.threshold must be smaller than timestamp.batch");
		let storage = Arc::new(storage);
		let initial = storage.read().unwrap_or_else(|e| panicker.panic(&format!("initial timestamp read failed: {e}")));
		Self {
			storage,
			last: AtomicU64::new(initial),
			max: AtomicU64::new(initial),
			max_allocated: Arc::new(AtomicU64::new(initial)),
			batch,
			threshold,
			background: Background::spawn("tso-timestamp-allocator"),
			panicker,
		}
	}

	/// Returns the next `last + 1`. Never blocks except when the
	/// pre-allocated range is exhausted, in which case it spin-waits for
	/// the background allocator. The spin has no timeout by design.
	#[instrument(name = "oracle::next", level = "trace", skip(self))]
	pub fn next(&self) -> Timestamp {
		loop {
			let max = self.max.load(Ordering::Acquire);
			let last = self.last.load(Ordering::Acquire);

			if last >= max {
				self.trigger_allocation(max);
				self.wait_for_allocation(max);
				continue;
			}

			if self.last.compare_exchange(last, last + 1, Ordering::AcqRel, Ordering::Acquire).is_ok() {
				let remaining_headroom = max - (last + 1);
				if remaining_headroom == self.threshold {
					self.trigger_allocation(max);
				}
				return Timestamp(last + 1);
			}
		}
	}

	/// Read-only snapshot of the last timestamp handed out.
	pub fn last(&self) -> Timestamp {
		Timestamp(self.last.load(Ordering::Acquire))
	}

	fn trigger_allocation(&self, observed_max: u64) {
		// Someone already advanced the ceiling past what this caller
		// observed — nothing to allocate, and re-issuing the same
		// compare_and_update(observed_max, ..) would spuriously
		// mismatch against the storage value the prior allocation
		// already wrote.
		if self.max_allocated.load(Ordering::Acquire) != observed_max {
			return;
		}

		let storage = self.storage.clone();
		let max_allocated = self.max_allocated.clone();
		let panicker = self.panicker.clone();
		let batch = self.batch;
		self.background.try_submit(move || {
			let next_ceiling = observed_max + batch;
			match storage.compare_and_update(observed_max, next_ceiling) {
				Ok(()) => max_allocated.store(next_ceiling, Ordering::Release),
				Err(e) => panicker.panic(&format!(
					"timestamp storage durability failure advancing {observed_max} -> {next_ceiling}: {e}"
				)),
			}
		});
	}

	fn wait_for_allocation(&self, observed_max: u64) {
		while self.max_allocated.load(Ordering::Acquire) == observed_max {
			std::hint::spin_loop();
		}
		let allocated = self.max_allocated.load(Ordering::Acquire);
		let _ = self.max.compare_exchange(observed_max, allocated, Ordering::AcqRel, Ordering::Acquire);
	}
}
