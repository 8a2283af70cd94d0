//! Multi-partition routing primitives layered over `ClientTxnManager`
//! (§4.F "locality policy" and the local/global escalation rule). These
//! compose with a per-partition `ClientTxnManager` plus a
//! `GlobalCommitCoordinator`; they do not themselves hold oracle or store
//! handles, so a caller can wire them together however its deployment's
//! partition discovery (out of scope, §1) hands out `KeyRange`s.

use indexmap::IndexMap;

use tso_core::KeyRange;

/// Per-client record of how often each partition has been used, so the
/// next `begin()` can prefer whichever partition this client talks to
/// most. Preserves insertion order for deterministic tie-breaking between
/// partitions used an equal number of times.
#[derive(Debug, Default)]
pub struct PartitionUsage {
	counts: IndexMap<usize, u64>,
}

impl PartitionUsage {
	pub fn record(&mut self, partition: usize) {
		*self.counts.entry(partition).or_insert(0) += 1;
	}

	/// The most-used partition, or `None` before any transaction has
	/// begun. Ties go to whichever partition was recorded first —
	/// `Iterator::max_by_key` would instead keep the last-seen tie, which
	/// makes `preferred()` depend on iteration order for no good reason.
	pub fn preferred(&self) -> Option<usize> {
		let mut best: Option<(usize, u64)> = None;
		for (&partition, &count) in &self.counts {
			let replace = match best {
				Some((_, best_count)) => count > best_count,
				None => true,
			};
			if replace {
				best = Some((partition, count));
			}
		}
		best.map(|(partition, _)| partition)
	}
}

/// Maps a row to the partition whose `KeyRange` contains it. A linear
/// scan: deployments have a handful of partitions, not thousands, so this
/// stays cheap relative to the network round trip every lookup is paired
/// with.
#[derive(Debug)]
pub struct PartitionTable {
	ranges: Vec<KeyRange>,
}

impl PartitionTable {
	pub fn new(ranges: Vec<KeyRange>) -> Self {
		Self { ranges }
	}

	pub fn locate(&self, row: &[u8]) -> Option<usize> {
		self.ranges.iter().position(|range| range.contains(row))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextBeginPolicy {
	/// Ordinary locality-preferring single-partition begin.
	Local,
	/// The previous local commit failed; escalate to a global transaction
	/// spanning whatever partitions the retried writes land on.
	Global,
}

/// Tracks whether the *next* `begin()` should be an ordinary
/// locality-preferring local transaction or a global one, per §4.F: "After
/// a failed local commit, the next begin() starts a global transaction
/// instead."
#[derive(Debug, Default)]
pub struct BeginEscalation {
	next: Option<NextBeginPolicy>,
}

impl BeginEscalation {
	pub fn policy(&self) -> NextBeginPolicy {
		self.next.unwrap_or(NextBeginPolicy::Local)
	}

	pub fn record_local_commit_failure(&mut self) {
		self.next = Some(NextBeginPolicy::Global);
	}

	pub fn reset_to_local(&mut self) {
		self.next = Some(NextBeginPolicy::Local);
	}
}
