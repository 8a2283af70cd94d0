use std::fmt;

/// A 64-bit hash of `(table_id, row_bytes, family)`.
///
/// Deliberately narrow: collisions across distinct rows are tolerated and
/// only cause spurious aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct RowFingerprint(pub u64);

impl RowFingerprint {
	pub fn as_u64(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RowFingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:016x}", self.0)
	}
}

impl From<u64> for RowFingerprint {
	fn from(value: u64) -> Self {
		RowFingerprint(value)
	}
}
