use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

use thiserror::Error;

use tso_core::{RowKeyFamily, TableId, Timestamp};

/// Identifies a versioned cell location: table, row bytes, column family.
/// Distinct from `RowFingerprint`, which is a lossy hash of the same three
/// fields used only for admission checks.
pub type CellKey = (TableId, Vec<u8>, Vec<u8>);

pub fn cell_key(write: &RowKeyFamily) -> CellKey {
	(write.table, write.row.clone(), write.family.clone())
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShadowCellError {
	#[error("shadow cell write failed: {0}")]
	Io(String),
}

/// Storage of staged row versions and their shadow-cell commit markers.
/// A staged write is tagged by the transaction's `start_ts`; its
/// visibility to other readers depends on resolving that start_ts to a
/// commit_ts, either from the fast-path shadow marker this trait also
/// stores, or — if that marker was never written or was lost — by
/// falling back to the authoritative commit table.
pub trait VersionedStore: fmt::Debug + Send + Sync {
	/// Speculatively writes `write` at `start_ts`. Invisible to any reader
	/// until a shadow marker or commit-table entry resolves `start_ts` to
	/// a `commit_ts`.
	fn stage(&self, write: RowKeyFamily, start_ts: Timestamp);

	/// Best-effort fast-path marker recording that `start_ts` committed at
	/// `commit_ts`. May fail without endangering correctness — readers
	/// that find no marker fall back to the commit table.
	fn mark_committed(&self, key: &CellKey, start_ts: Timestamp, commit_ts: Timestamp) -> Result<(), ShadowCellError>;

	fn shadow(&self, key: &CellKey, start_ts: Timestamp) -> Option<Timestamp>;

	/// Removes a staged version and its shadow marker, if any (rollback).
	fn remove(&self, key: &CellKey, start_ts: Timestamp);

	/// All staged versions at `key`, each tagged by the start_ts of the
	/// transaction that wrote it.
	fn versions(&self, key: &CellKey) -> Vec<(Timestamp, RowKeyFamily)>;

	/// Distinct row keys present for `(table, family)`. Order is
	/// unspecified; callers that need a stable scan order sort the
	/// result themselves.
	fn rows(&self, table: TableId, family: &[u8]) -> Vec<Vec<u8>>;
}

#[derive(Debug, Default)]
struct Slot {
	cells: BTreeMap<u64, RowKeyFamily>,
	shadows: HashMap<u64, u64>,
}

/// In-memory `VersionedStore` for embedded use and tests.
#[derive(Debug, Default)]
pub struct InMemoryVersionedStore {
	slots: RwLock<HashMap<CellKey, Slot>>,
}

impl VersionedStore for InMemoryVersionedStore {
	fn stage(&self, write: RowKeyFamily, start_ts: Timestamp) {
		let key = cell_key(&write);
		let mut slots = self.slots.write().unwrap();
		slots.entry(key).or_default().cells.insert(start_ts.0, write);
	}

	fn mark_committed(&self, key: &CellKey, start_ts: Timestamp, commit_ts: Timestamp) -> Result<(), ShadowCellError> {
		let mut slots = self.slots.write().unwrap();
		slots.entry(key.clone()).or_default().shadows.insert(start_ts.0, commit_ts.0);
		Ok(())
	}

	fn shadow(&self, key: &CellKey, start_ts: Timestamp) -> Option<Timestamp> {
		let slots = self.slots.read().unwrap();
		slots.get(key).and_then(|slot| slot.shadows.get(&start_ts.0)).copied().map(Timestamp)
	}

	fn remove(&self, key: &CellKey, start_ts: Timestamp) {
		let mut slots = self.slots.write().unwrap();
		if let Some(slot) = slots.get_mut(key) {
			slot.cells.remove(&start_ts.0);
			slot.shadows.remove(&start_ts.0);
		}
	}

	fn versions(&self, key: &CellKey) -> Vec<(Timestamp, RowKeyFamily)> {
		let slots = self.slots.read().unwrap();
		slots
			.get(key)
			.map(|slot| slot.cells.iter().map(|(ts, write)| (Timestamp(*ts), write.clone())).collect())
			.unwrap_or_default()
	}

	fn rows(&self, table: TableId, family: &[u8]) -> Vec<Vec<u8>> {
		let slots = self.slots.read().unwrap();
		slots
			.keys()
			.filter(|(t, _, f)| *t == table && f.as_slice() == family)
			.map(|(_, row, _)| row.clone())
			.collect()
	}
}

/// A test double whose shadow-cell writes always fail, used to exercise the
/// commit-table fallback path.
#[derive(Debug, Default)]
pub struct FlakyShadowStore {
	inner: InMemoryVersionedStore,
}

impl VersionedStore for FlakyShadowStore {
	fn stage(&self, write: RowKeyFamily, start_ts: Timestamp) {
		self.inner.stage(write, start_ts);
	}

	fn mark_committed(&self, _key: &CellKey, _start_ts: Timestamp, _commit_ts: Timestamp) -> Result<(), ShadowCellError> {
		Err(ShadowCellError::Io("simulated shadow cell write failure".into()))
	}

	fn shadow(&self, key: &CellKey, start_ts: Timestamp) -> Option<Timestamp> {
		self.inner.shadow(key, start_ts)
	}

	fn remove(&self, key: &CellKey, start_ts: Timestamp) {
		self.inner.remove(key, start_ts);
	}

	fn versions(&self, key: &CellKey) -> Vec<(Timestamp, RowKeyFamily)> {
		self.inner.versions(key)
	}

	fn rows(&self, table: TableId, family: &[u8]) -> Vec<Vec<u8>> {
		self.inner.rows(table, family)
	}
}
