use thiserror::Error;

/// Errors surfaced by `tso-core` itself (configuration validation).
/// Component-specific failure modes (conflict, too-old, durability) live
/// in the crates that own those decisions — see `tso-transaction::decider`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
	#[error("cache must have at least one set and one way, got sets={sets} ways={ways}")]
	InvalidCacheShape { sets: usize, ways: usize },

	#[error("timestamp threshold ({threshold}) must be smaller than batch size ({batch})")]
	InvalidBatchShape { batch: u64, threshold: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;
