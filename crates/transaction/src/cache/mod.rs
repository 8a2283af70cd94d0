use tracing::instrument;

use tso_core::{RowFingerprint, Timestamp, TsoConfig};

/// Fixed-memory, set-associative map from row fingerprint to the latest
/// commit-timestamp that wrote it.
///
/// The backing array holds `sets + associativity` slot-pairs rather than
/// exactly `sets * associativity`: a set's `associativity` ways always
/// occupy a contiguous run of slots starting at `fingerprint % sets`, and
/// the extra `associativity - 1` slot-pairs appended past the last real
/// set mean that run never needs to wrap around the array. Each slot-pair
/// is two `u64` words: `(fingerprint, commit_ts)`. A `commit_ts` of 0
/// marks the slot empty, since real commit timestamps are never zero.
#[derive(Debug)]
pub struct ConflictCache {
	sets: usize,
	associativity: usize,
	slots: Vec<u64>,
}

impl ConflictCache {
	pub fn new(sets: usize, associativity: usize) -> Self {
		assert!(sets > 0, "cache must have at least one set");
		assert!(associativity > 0, "cache must have at least one way per set");
		let slot_pairs = sets + associativity;
		Self { sets, associativity, slots: vec![0u64; slot_pairs * 2] }
	}

	/// Builds a cache from `config.cache_sets`/`cache_associativity`,
	/// validating the shape up front instead of the bare `assert!`s `new`
	/// relies on. Prefer this constructor wherever a `TsoConfig` is already
	/// in hand.
	pub fn from_config(config: &TsoConfig) -> tso_core::error::Result<Self> {
		config.validate()?;
		Ok(Self::new(config.cache_sets, config.cache_associativity))
	}

	fn set_index(&self, fingerprint: RowFingerprint) -> usize {
		(fingerprint.as_u64() as usize) % self.sets
	}

	fn slot(&self, pair_index: usize) -> (u64, u64) {
		(self.slots[pair_index * 2], self.slots[pair_index * 2 + 1])
	}

	fn write_slot(&mut self, pair_index: usize, fingerprint: u64, commit_ts: u64) {
		self.slots[pair_index * 2] = fingerprint;
		self.slots[pair_index * 2 + 1] = commit_ts;
	}

	/// Returns the stored commit-ts, or 0 if the fingerprint is absent.
	#[instrument(name = "cache::get", level = "trace", skip(self))]
	pub fn get(&self, fingerprint: RowFingerprint) -> Timestamp {
		let set_index = self.set_index(fingerprint);
		for way in 0..self.associativity {
			let (key, value) = self.slot(set_index + way);
			if key == fingerprint.as_u64() && value != 0 {
				return Timestamp(value);
			}
		}
		Timestamp(0)
	}

	/// Inserts `(fingerprint, commit_ts)`. Returns the commit-ts of
	/// whatever slot was displaced, or 0 if the key already occupied a
	/// slot — an overwrite is never an eviction.
	#[instrument(name = "cache::set", level = "trace", skip(self))]
	pub fn set(&mut self, fingerprint: RowFingerprint, commit_ts: Timestamp) -> Timestamp {
		let set_index = self.set_index(fingerprint);

		for way in 0..self.associativity {
			let pair = set_index + way;
			let (key, value) = self.slot(pair);
			if key == fingerprint.as_u64() && value != 0 {
				self.write_slot(pair, fingerprint.as_u64(), commit_ts.0);
				return Timestamp(0);
			}
		}

		// Smallest stored commit-ts is the eviction candidate: commit-ts
		// is monotonically increasing, so "smallest" approximates "least
		// recently updated" without a separate LRU counter per slot.
		let mut victim = set_index;
		let mut victim_value = u64::MAX;
		for way in 0..self.associativity {
			let pair = set_index + way;
			let (_, value) = self.slot(pair);
			if value < victim_value {
				victim_value = value;
				victim = pair;
			}
		}

		let (_, evicted) = self.slot(victim);
		self.write_slot(victim, fingerprint.as_u64(), commit_ts.0);
		Timestamp(evicted)
	}
}
