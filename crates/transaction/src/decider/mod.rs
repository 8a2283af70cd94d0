mod commit_table;

pub use commit_table::{CommitTable, CommitTableError, FailingCommitTable, InMemoryCommitTable};

use std::sync::Arc;

use tracing::instrument;

use tso_core::{Panicker, ProcessPanicker, RowFingerprint, Timestamp, TsoConfig};
use tso_runtime::{QueueReceiver, QueueSender};

use crate::cache::ConflictCache;
use crate::oracle::{TimestampOracle, TimestampStorage};

/// Why a commit was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
	/// A read or written row's fingerprint was already written by a
	/// later-starting, already-committed transaction.
	Conflict(RowFingerprint),
	/// A read or written row's fingerprint was absent from the cache and
	/// the low watermark has already passed `start_ts` — its history is
	/// no longer resolvable locally.
	TooOld,
	/// The commit-table write failed; no cache mutation occurred.
	Durability(String),
}

/// The decider's answer to a commit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
	Committed {
		commit_ts: Timestamp,
		/// True if a written row's cache entry had already been
		/// evicted by the time of admission. The client must reincarnate
		/// `conflicted_rows` at `commit_ts`.
		elder: bool,
		conflicted_rows: Vec<RowFingerprint>,
	},
	Aborted {
		reason: AbortReason,
	},
}

impl CommitResult {
	pub fn is_committed(&self) -> bool {
		matches!(self, CommitResult::Committed { .. })
	}
}

/// The serialization point. Decides commit/abort for each
/// request using the conflict cache and the timestamp oracle, then
/// publishes the decision. Runs on exactly one thread — `commit` takes
/// `&mut self` rather than `&self` precisely to make that ownership
/// requirement visible in the type system.
#[derive(Debug)]
pub struct CommitDecider<S: TimestampStorage, C: CommitTable> {
	oracle: Arc<TimestampOracle<S>>,
	commit_table: C,
	cache: ConflictCache,
	low_watermark: Timestamp,
	panicker: Arc<dyn Panicker>,
}

impl<S: TimestampStorage + 'static, C: CommitTable> CommitDecider<S, C> {
	pub fn new(oracle: Arc<TimestampOracle<S>>, commit_table: C, cache_sets: usize, cache_associativity: usize) -> Self {
		Self::with_panicker(oracle, commit_table, cache_sets, cache_associativity, Arc::new(ProcessPanicker))
	}

	pub fn with_panicker(
		oracle: Arc<TimestampOracle<S>>,
		commit_table: C,
		cache_sets: usize,
		cache_associativity: usize,
		panicker: Arc<dyn Panicker>,
	) -> Self {
		Self {
			oracle,
			commit_table,
			cache: ConflictCache::new(cache_sets, cache_associativity),
			low_watermark: Timestamp(0),
			panicker,
		}
	}

	/// Builds a decider from `config.cache_sets`/`cache_associativity`,
	/// validating the shape via `TsoConfig::validate` instead of the bare
	/// `assert!`s `ConflictCache::new` relies on underneath `new`.
	pub fn from_config(oracle: Arc<TimestampOracle<S>>, commit_table: C, config: &TsoConfig) -> tso_core::error::Result<Self> {
		config.validate()?;
		Ok(Self::new(oracle, commit_table, config.cache_sets, config.cache_associativity))
	}

	pub fn low_watermark(&self) -> Timestamp {
		self.low_watermark
	}

	/// Reads are checked strictly: any cache-miss-while-too-old aborts
	/// the read, since there is no safe way to resolve its visibility.
	/// Writes get softer "elder" treatment instead: a written row whose
	/// cache entry was evicted before this admission still commits, but
	/// is flagged for client-side reincarnation.
	#[instrument(name = "decider::commit", level = "debug", skip(self, writes, reads), fields(start_ts = start_ts.0, writes = writes.len(), reads = reads.len()))]
	pub fn commit(&mut self, start_ts: Timestamp, writes: &[RowFingerprint], reads: &[RowFingerprint]) -> CommitResult {
		if writes.is_empty() && reads.is_empty() {
			// A read-only empty transaction has nothing to validate
			// and nothing to publish.
			return CommitResult::Committed { commit_ts: start_ts, elder: false, conflicted_rows: Vec::new() };
		}

		let (elder, conflicted_rows) = match self.check_admission(start_ts, writes, reads) {
			Ok(admitted) => admitted,
			Err(reason) => return CommitResult::Aborted { reason },
		};

		let commit_ts = self.oracle.next();
		self.assert_causal_order(start_ts, commit_ts);

		if let Err(reason) = self.install(start_ts, commit_ts, writes) {
			return CommitResult::Aborted { reason };
		}

		CommitResult::Committed { commit_ts, elder, conflicted_rows }
	}

	/// Vote-only half of the two-phase path a `GlobalCommitCoordinator`
	/// drives across partitions. Checks
	/// admission exactly as `commit` does but allocates no commit_ts and
	/// mutates nothing, so a `No` vote from a sibling partition costs this
	/// one nothing to walk back.
	#[instrument(name = "decider::prepare", level = "debug", skip(self, writes, reads), fields(start_ts = start_ts.0))]
	pub fn prepare(&self, start_ts: Timestamp, writes: &[RowFingerprint], reads: &[RowFingerprint]) -> Result<(bool, Vec<RowFingerprint>), AbortReason> {
		if writes.is_empty() && reads.is_empty() {
			return Ok((false, Vec::new()));
		}
		self.check_admission(start_ts, writes, reads)
	}

	/// Finalizing half of the two-phase path: installs `writes` into the
	/// cache at the coordinator-assigned `commit_ts` and publishes the
	/// commit-table entry. Only called after
	/// every partition has voted `Ready` in `prepare`.
	#[instrument(name = "decider::finalize", level = "debug", skip(self, writes), fields(start_ts = start_ts.0, commit_ts = commit_ts.0))]
	pub fn finalize(&mut self, start_ts: Timestamp, commit_ts: Timestamp, writes: &[RowFingerprint]) -> Result<(), AbortReason> {
		self.assert_causal_order(start_ts, commit_ts);
		self.install(start_ts, commit_ts, writes)
	}

	/// Releases a transaction this partition voted `Ready` for but the
	/// coordinator ultimately aborted. Invalidating
	/// the commit-table slot is enough: `prepare` never mutated the
	/// cache, so there is nothing there to undo.
	#[instrument(name = "decider::abort_prepared", level = "debug", skip(self), fields(start_ts = start_ts.0))]
	pub fn abort_prepared(&mut self, start_ts: Timestamp) {
		let _ = self.commit_table.invalidate(start_ts);
	}

	fn check_admission(&self, start_ts: Timestamp, writes: &[RowFingerprint], reads: &[RowFingerprint]) -> Result<(bool, Vec<RowFingerprint>), AbortReason> {
		for &f in reads {
			let cached = self.cache.get(f);
			if cached.0 > start_ts.0 {
				return Err(AbortReason::Conflict(f));
			}
			if cached.0 == 0 && self.low_watermark.0 > start_ts.0 {
				return Err(AbortReason::TooOld);
			}
		}

		let mut elder = false;
		let mut conflicted_rows = Vec::new();
		for &f in writes {
			let cached = self.cache.get(f);
			if cached.0 > start_ts.0 {
				return Err(AbortReason::Conflict(f));
			}
			if cached.0 == 0 && self.low_watermark.0 > start_ts.0 {
				elder = true;
				conflicted_rows.push(f);
			}
		}

		Ok((elder, conflicted_rows))
	}

	fn assert_causal_order(&self, start_ts: Timestamp, commit_ts: Timestamp) {
		if commit_ts.0 <= start_ts.0 {
			self.panicker.panic(&format!("causal order violated: commit_ts {commit_ts:?} <= start_ts {start_ts:?}"));
		}
	}

	fn install(&mut self, start_ts: Timestamp, commit_ts: Timestamp, writes: &[RowFingerprint]) -> Result<(), AbortReason> {
		if let Err(e) = self.commit_table.put(start_ts, commit_ts) {
			return Err(AbortReason::Durability(e.to_string()));
		}

		for &f in writes {
			let evicted = self.cache.set(f, commit_ts);
			if evicted.0 > self.low_watermark.0 {
				self.low_watermark = evicted;
				self.commit_table.publish_low_watermark(self.low_watermark);
			}
		}

		Ok(())
	}

	/// Drains `inbox` forever, answering each request on `respond_to`
	///. Intended to run as the body of the decider's
	/// dedicated thread.
	pub fn run(mut self, inbox: QueueReceiver<CommitRequest>) {
		for request in inbox {
			let result = self.commit(request.start_ts, &request.writes, &request.reads);
			let _ = request.respond_to.send(result);
		}
	}
}

/// A commit request as it arrives on the decider's serialized queue.
#[derive(Debug)]
pub struct CommitRequest {
	pub start_ts: Timestamp,
	pub writes: Vec<RowFingerprint>,
	pub reads: Vec<RowFingerprint>,
	pub respond_to: QueueSender<CommitResult>,
}
