//! Multi-partition two-phase commit (§4.G): commits a transaction whose
//! writes span more than one partition's `CommitDecider` by running the
//! ordinary admission/install split of a single decider across several,
//! under a sequencer that totally orders the cross-partition allocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::instrument;

use tso_core::{Panicker, ProcessPanicker, RowFingerprint, Timestamp};

use crate::decider::{AbortReason, CommitDecider, CommitTable};
use crate::oracle::{TimestampOracle, TimestampStorage};

/// Totally orders the vts/commit-ts allocation of every global transaction
/// against every other. The real collaborator is a standalone process
/// reached over the network; this crate depends only on the ordering
/// guarantee it provides.
pub trait Sequencer: fmt::Debug + Send + Sync {
	/// Allocates the next global sequence number and runs `body` while
	/// holding the ordering token, so two global transactions' vts and
	/// commit-ts allocations can never interleave.
	fn with_next_sequence<R>(&self, body: impl FnOnce(u64) -> R) -> R;
}

/// An in-process stand-in: a single mutex serializes every global commit's
/// allocation window, which is sufficient to prove the protocol's
/// linearization guarantee without a network round trip.
#[derive(Debug, Default)]
pub struct InMemorySequencer {
	next: Mutex<u64>,
}

impl Sequencer for InMemorySequencer {
	fn with_next_sequence<R>(&self, body: impl FnOnce(u64) -> R) -> R {
		let mut guard = self.next.lock().unwrap();
		let sequence = *guard;
		*guard += 1;
		body(sequence)
	}
}

/// One partition's oracle/decider pair, as the coordinator sees it.
#[derive(Debug)]
pub struct Partition<S: TimestampStorage, C: CommitTable> {
	pub oracle: Arc<TimestampOracle<S>>,
	pub decider: Mutex<CommitDecider<S, C>>,
}

impl<S: TimestampStorage + 'static, C: CommitTable> Partition<S, C> {
	pub fn new(oracle: Arc<TimestampOracle<S>>, decider: CommitDecider<S, C>) -> Self {
		Self { oracle, decider: Mutex::new(decider) }
	}
}

/// A transaction's writes and reads, scoped to one partition index into
/// `GlobalCommitCoordinator::partitions`.
#[derive(Debug, Clone)]
pub struct PartitionWrites {
	pub partition: usize,
	pub writes: Vec<RowFingerprint>,
	pub reads: Vec<RowFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalCommitResult {
	/// Per-partition start-timestamp vector assigned in the begin step.
	pub vts: HashMap<usize, Timestamp>,
	pub outcome: GlobalOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalOutcome {
	Committed {
		commit_ts: HashMap<usize, Timestamp>,
		elder_rows: Vec<(usize, RowFingerprint)>,
	},
	Aborted {
		partition: usize,
		reason: AbortReason,
	},
}

/// Commits a transaction that wrote rows mapped to multiple partitions by
/// driving each partition's `CommitDecider` through its `prepare`/`finalize`
/// vote-then-install split, per §4.G.
#[derive(Debug)]
pub struct GlobalCommitCoordinator<S: TimestampStorage, C: CommitTable, Sq: Sequencer> {
	partitions: Vec<Partition<S, C>>,
	sequencer: Sq,
	panicker: Arc<dyn Panicker>,
}

impl<S: TimestampStorage + 'static, C: CommitTable, Sq: Sequencer> GlobalCommitCoordinator<S, C, Sq> {
	pub fn new(partitions: Vec<Partition<S, C>>, sequencer: Sq) -> Self {
		Self::with_panicker(partitions, sequencer, Arc::new(ProcessPanicker))
	}

	pub fn with_panicker(partitions: Vec<Partition<S, C>>, sequencer: Sq, panicker: Arc<dyn Panicker>) -> Self {
		Self { partitions, sequencer, panicker }
	}

	pub fn partition_count(&self) -> usize {
		self.partitions.len()
	}

	/// Runs the full begin/prepare/commit (or abort) protocol for one
	/// global transaction's per-partition write/read sets.
	#[instrument(name = "global::commit", level = "debug", skip(self, request))]
	pub fn commit(&self, request: &[PartitionWrites]) -> GlobalCommitResult {
		self.sequencer.with_next_sequence(|_sequence| self.commit_under_order(request))
	}

	fn commit_under_order(&self, request: &[PartitionWrites]) -> GlobalCommitResult {
		// Begin: one timestamp per touched partition.
		let mut vts = HashMap::with_capacity(request.len());
		for part in request {
			let ts = self.partitions[part.partition].oracle.next();
			vts.insert(part.partition, ts);
		}

		// Prepare: every partition votes, without allocating a commit-ts
		// or mutating its cache.
		let mut elder_rows = Vec::new();
		for part in request {
			let decider = self.partitions[part.partition].decider.lock().unwrap();
			match decider.prepare(vts[&part.partition], &part.writes, &part.reads) {
				Ok((_elder, conflicted)) => {
					elder_rows.extend(conflicted.into_iter().map(|f| (part.partition, f)));
				}
				Err(reason) => {
					drop(decider);
					self.abort_all(request, &vts);
					return GlobalCommitResult { vts, outcome: GlobalOutcome::Aborted { partition: part.partition, reason } };
				}
			}
		}

		// Commit vector: every participant finalizes with its own
		// freshly allocated commit-ts, still under the sequencer's
		// ordering token so no other global transaction's allocation can
		// interleave with this one's.
		let mut commit_ts = HashMap::with_capacity(request.len());
		for part in request {
			let partition = &self.partitions[part.partition];
			let ts = partition.oracle.next();
			let mut decider = partition.decider.lock().unwrap();
			if let Err(reason) = decider.finalize(vts[&part.partition], ts, &part.writes) {
				// Every prior partition already finalized: there is no
				// sound local rollback for a partition that already
				// installed writes under I3's linearization guarantee.
				// This is a protocol violation, not an ordinary abort.
				self.panicker.panic(&format!(
					"global commit finalize failed on partition {} after other partitions already finalized: {reason:?}",
					part.partition
				));
			}
			commit_ts.insert(part.partition, ts);
		}

		GlobalCommitResult { vts, outcome: GlobalOutcome::Committed { commit_ts, elder_rows } }
	}

	fn abort_all(&self, request: &[PartitionWrites], vts: &HashMap<usize, Timestamp>) {
		for part in request {
			let mut decider = self.partitions[part.partition].decider.lock().unwrap();
			decider.abort_prepared(vts[&part.partition]);
		}
	}
}
