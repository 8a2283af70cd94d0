use crate::fingerprint::RowFingerprint;

/// Identifies the multi-versioned store table a row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TableId(pub u64);

/// A single qualifier/value pair staged within a column family write.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Qualifier {
	pub name: Vec<u8>,
	pub value: Vec<u8>,
}

/// A write entry: `(table-id, row-bytes, family, qualifiers, values)`.
/// Used by the client to reconstruct the in-store versions at `start_ts`
/// and, on commit, at `commit_ts`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RowKeyFamily {
	pub table: TableId,
	pub row: Vec<u8>,
	pub family: Vec<u8>,
	pub qualifiers: Vec<Qualifier>,
}

impl RowKeyFamily {
	pub fn new(table: TableId, row: impl Into<Vec<u8>>, family: impl Into<Vec<u8>>) -> Self {
		Self { table, row: row.into(), family: family.into(), qualifiers: Vec::new() }
	}

	pub fn with_qualifier(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
		self.qualifiers.push(Qualifier { name: name.into(), value: value.into() });
		self
	}

	/// The fingerprint this write contributes to admission checks.
	/// Computed by the caller's hasher (see `tso-hash`).
	pub fn fingerprint(&self, hasher: impl Fn(&TableId, &[u8], &[u8]) -> u64) -> RowFingerprint {
		RowFingerprint(hasher(&self.table, &self.row, &self.family))
	}
}
