use serde::{Deserialize, Serialize};

/// An inclusive-lower, exclusive-upper row-key range owned by one
/// partition's oracle/decider pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
	pub lower: Vec<u8>,
	pub upper: Vec<u8>,
	/// Network endpoint of this partition's TSO. Opaque to this crate —
	/// wire framing is an external collaborator.
	pub endpoint: String,
}

impl KeyRange {
	pub fn contains(&self, row: &[u8]) -> bool {
		row >= self.lower.as_slice() && (self.upper.is_empty() || row < self.upper.as_slice())
	}
}

/// Tunables for a timestamp oracle, conflict cache and partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsoConfig {
	/// Batch size for durable counter advance. Default 10,000,000.
	pub timestamp_batch: u64,
	/// Remaining headroom that triggers the next allocation. Default
	/// 1,000,000.
	pub timestamp_threshold: u64,
	/// Number of sets in the conflict cache.
	pub cache_sets: usize,
	/// Number of ways per set in the conflict cache.
	pub cache_associativity: usize,
	/// Partitions this oracle instance is aware of, for global
	/// transactions.
	pub partition_ranges: Vec<KeyRange>,
	/// Endpoint of the sequencer used to order global commits.
	pub sequencer_endpoint: Option<String>,
}

impl Default for TsoConfig {
	fn default() -> Self {
		Self {
			timestamp_batch: 10_000_000,
			timestamp_threshold: 1_000_000,
			cache_sets: 1 << 20,
			cache_associativity: 4,
			partition_ranges: Vec::new(),
			sequencer_endpoint: None,
		}
	}
}

impl TsoConfig {
	pub fn validate(&self) -> crate::error::Result<()> {
		if self.cache_sets == 0 || self.cache_associativity == 0 {
			return Err(crate::error::Error::InvalidCacheShape {
				sets: self.cache_sets,
				ways: self.cache_associativity,
			});
		}
		if self.timestamp_threshold >= self.timestamp_batch {
			return Err(crate::error::Error::InvalidBatchShape {
				batch: self.timestamp_batch,
				threshold: self.timestamp_threshold,
			});
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_config_validates() {
		assert!(TsoConfig::default().validate().is_ok());
	}

	#[test]
	fn rejects_empty_cache() {
		let mut config = TsoConfig::default();
		config.cache_sets = 0;
		assert!(config.validate().is_err());
	}

	#[test]
	fn rejects_threshold_not_smaller_than_batch() {
		let mut config = TsoConfig::default();
		config.timestamp_threshold = config.timestamp_batch;
		assert!(config.validate().is_err());
	}

	#[test]
	fn key_range_contains_respects_bounds() {
		let range = KeyRange { lower: vec![10], upper: vec![20], endpoint: "a".into() };
		assert!(!range.contains(&[5]));
		assert!(range.contains(&[10]));
		assert!(range.contains(&[15]));
		assert!(!range.contains(&[20]));
	}

	#[test]
	fn key_range_with_empty_upper_is_unbounded() {
		let range = KeyRange { lower: vec![10], upper: vec![], endpoint: "a".into() };
		assert!(range.contains(&[255]));
	}
}
