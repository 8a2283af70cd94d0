use std::fmt;

/// A strictly-increasing 64-bit logical clock value.
///
/// Zero is reserved as "never" / sentinel: it is never handed out by a
/// timestamp oracle, and its presence in a field such as `commit_ts` means
/// "not yet decided".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
	pub const NEVER: Timestamp = Timestamp(0);

	pub fn is_never(self) -> bool {
		self.0 == 0
	}

	pub fn next(self) -> Timestamp {
		Timestamp(self.0 + 1)
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<u64> for Timestamp {
	fn from(value: u64) -> Self {
		Timestamp(value)
	}
}

impl From<Timestamp> for u64 {
	fn from(value: Timestamp) -> Self {
		value.0
	}
}
