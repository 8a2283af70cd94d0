use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Why a durable counter write failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
	#[error("compare-and-update mismatch: expected {expected}, storage holds {actual}")]
	Mismatch { expected: u64, actual: u64 },
	#[error("timestamp storage io error: {0}")]
	Io(String),
}

/// Durable read/write of the single monotonically-advancing "max-allocated"
/// counter. An external collaborator — this crate only depends on the two
/// operations, never a concrete backend.
pub trait TimestampStorage: fmt::Debug + Send + Sync {
	/// The last durably-recorded ceiling.
	fn read(&self) -> Result<u64, StorageError>;

	/// Durably advance the ceiling from `prev` to `next`. Must fail with
	/// `Mismatch` if the stored value is not `prev` (someone else moved
	/// it), never silently overwrite.
	fn compare_and_update(&self, prev: u64, next: u64) -> Result<(), StorageError>;
}

/// An in-memory `TimestampStorage` for embedded use and tests. Surviving a
/// simulated "crash" means constructing a fresh `InMemoryTimestampStorage`
/// from the last value read out of the old one (see `tests::crash_restart`
/// in `oracle.rs`), mirroring how a real backend would be reopened after a
/// process restart.
#[derive(Debug, Default)]
pub struct InMemoryTimestampStorage {
	value: AtomicU64,
}

impl InMemoryTimestampStorage {
	pub fn new(initial: u64) -> Self {
		Self { value: AtomicU64::new(initial) }
	}
}

impl TimestampStorage for InMemoryTimestampStorage {
	fn read(&self) -> Result<u64, StorageError> {
		Ok(self.value.load(Ordering::Acquire))
	}

	fn compare_and_update(&self, prev: u64, next: u64) -> Result<(), StorageError> {
		match self.value.compare_exchange(prev, next, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => Ok(()),
			Err(actual) => Err(StorageError::Mismatch { expected: prev, actual }),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn compare_and_update_advances_on_match() {
		let storage = InMemoryTimestampStorage::new(10);
		storage.compare_and_update(10, 20).unwrap();
		assert_eq!(storage.read().unwrap(), 20);
	}

	#[test]
	fn compare_and_update_rejects_stale_prev() {
		let storage = InMemoryTimestampStorage::new(10);
		storage.compare_and_update(10, 20).unwrap();
		let err = storage.compare_and_update(10, 30).unwrap_err();
		assert_eq!(err, StorageError::Mismatch { expected: 10, actual: 20 });
		assert_eq!(storage.read().unwrap(), 20);
	}
}
