use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_skiplist::SkipMap;
use thiserror::Error;

use tso_core::Timestamp;

/// Sentinel written in place of a real commit-ts to mark a start-ts as
/// invalidated (aborted). Safe because commit-ts never reaches
/// `u64::MAX` in practice and the oracle never hands out that value
/// either — it would have exhausted the entire 64-bit space first.
const INVALIDATED: u64 = u64::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitTableError {
	#[error("commit table io error: {0}")]
	Io(String),
}

/// Append-only durable map `start_ts -> commit_ts` with an invalidation
/// marker. An external collaborator — persistence is someone else's
/// concern, this crate depends only on the four operations.
pub trait CommitTable: fmt::Debug + Send + Sync {
	fn put(&self, start_ts: Timestamp, commit_ts: Timestamp) -> Result<(), CommitTableError>;
	fn get(&self, start_ts: Timestamp) -> Result<Option<Timestamp>, CommitTableError>;
	fn invalidate(&self, start_ts: Timestamp) -> Result<(), CommitTableError>;

	/// Called by the decider after an eviction advances the low
	/// watermark, so the store's GC can act on it.
	fn publish_low_watermark(&self, watermark: Timestamp);
	fn low_watermark_checkpoint(&self) -> Timestamp;
}

/// In-memory `CommitTable` for embedded use and tests. Lock-free reads
/// and writes via a skiplist.
#[derive(Debug, Default)]
pub struct InMemoryCommitTable {
	entries: SkipMap<u64, u64>,
	watermark: AtomicU64,
}

impl CommitTable for InMemoryCommitTable {
	fn put(&self, start_ts: Timestamp, commit_ts: Timestamp) -> Result<(), CommitTableError> {
		self.entries.insert(start_ts.0, commit_ts.0);
		Ok(())
	}

	fn get(&self, start_ts: Timestamp) -> Result<Option<Timestamp>, CommitTableError> {
		Ok(self
			.entries
			.get(&start_ts.0)
			.map(|entry| *entry.value())
			.filter(|&value| value != INVALIDATED)
			.map(Timestamp))
	}

	fn invalidate(&self, start_ts: Timestamp) -> Result<(), CommitTableError> {
		self.entries.insert(start_ts.0, INVALIDATED);
		Ok(())
	}

	fn publish_low_watermark(&self, watermark: Timestamp) {
		self.watermark.fetch_max(watermark.0, Ordering::AcqRel);
	}

	fn low_watermark_checkpoint(&self) -> Timestamp {
		Timestamp(self.watermark.load(Ordering::Acquire))
	}
}

impl<T: CommitTable + ?Sized> CommitTable for Arc<T> {
	fn put(&self, start_ts: Timestamp, commit_ts: Timestamp) -> Result<(), CommitTableError> {
		(**self).put(start_ts, commit_ts)
	}

	fn get(&self, start_ts: Timestamp) -> Result<Option<Timestamp>, CommitTableError> {
		(**self).get(start_ts)
	}

	fn invalidate(&self, start_ts: Timestamp) -> Result<(), CommitTableError> {
		(**self).invalidate(start_ts)
	}

	fn publish_low_watermark(&self, watermark: Timestamp) {
		(**self).publish_low_watermark(watermark)
	}

	fn low_watermark_checkpoint(&self) -> Timestamp {
		(**self).low_watermark_checkpoint()
	}
}

/// A test double whose `put` always fails, used to exercise the
/// durability-failure abort path.
#[derive(Debug, Default)]
pub struct FailingCommitTable {
	inner: InMemoryCommitTable,
}

impl CommitTable for FailingCommitTable {
	fn put(&self, _start_ts: Timestamp, _commit_ts: Timestamp) -> Result<(), CommitTableError> {
		Err(CommitTableError::Io("simulated durability failure".into()))
	}

	fn get(&self, start_ts: Timestamp) -> Result<Option<Timestamp>, CommitTableError> {
		self.inner.get(start_ts)
	}

	fn invalidate(&self, start_ts: Timestamp) -> Result<(), CommitTableError> {
		self.inner.invalidate(start_ts)
	}

	fn publish_low_watermark(&self, watermark: Timestamp) {
		self.inner.publish_low_watermark(watermark)
	}

	fn low_watermark_checkpoint(&self) -> Timestamp {
		self.inner.low_watermark_checkpoint()
	}
}
