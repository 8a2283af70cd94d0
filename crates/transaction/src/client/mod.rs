mod router;
mod store;

pub use router::{BeginEscalation, NextBeginPolicy, PartitionTable, PartitionUsage};
pub use store::{cell_key, CellKey, FlakyShadowStore, InMemoryVersionedStore, ShadowCellError, VersionedStore};

use std::sync::{Arc, Mutex};

use tracing::instrument;

use tso_core::{KeyRange, RowFingerprint, RowKeyFamily, TableId, Timestamp, TsoConfig};

use crate::decider::{CommitDecider, CommitResult, CommitTable};
use crate::oracle::TimestampOracle;
use crate::oracle::TimestampStorage;

/// A fingerprinting function: `(table, row, family) -> u64`.
/// Kept as a plain function pointer rather than a trait object since every
/// client in a deployment must agree on the same hash to interoperate with
/// the conflict cache.
pub type Hasher = fn(&TableId, &[u8], &[u8]) -> u64;

/// The xxh3 hasher every deployment should use unless it has a specific
/// reason to diverge (the reason must be shared by every client talking to
/// the same cache, or fingerprints stop lining up across clients). Tests in
/// this module use their own hand-rolled hasher instead so a change to
/// `tso-hash`'s hash function can't mask a bug in admission logic that
/// happens to depend on xxh3's specific distribution.
pub const DEFAULT_HASHER: Hasher = tso_hash::fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnStatus {
	Active,
	Committed,
	Aborted,
}

/// A live transaction's client-side state: its snapshot timestamp, the
/// writes it has staged, and the read/write fingerprints it has
/// accumulated for admission.
#[derive(Debug)]
pub struct TxnHandle {
	start_ts: Timestamp,
	writes: Vec<RowKeyFamily>,
	write_fingerprints: Vec<RowFingerprint>,
	read_fingerprints: Vec<RowFingerprint>,
	status: TxnStatus,
}

impl TxnHandle {
	pub fn start_ts(&self) -> Timestamp {
		self.start_ts
	}

	pub fn is_active(&self) -> bool {
		self.status == TxnStatus::Active
	}
}

/// Drives a transaction's lifecycle against a `TimestampOracle`, a
/// `CommitDecider` and a `VersionedStore`. The decider is
/// wrapped in a `Mutex` here rather than handed its own dedicated thread —
/// embedding it directly keeps a single process's admission checks
/// correctly serialized without requiring callers to stand up the queue
/// plumbing in `decider::run` themselves; `decider::run` remains the path
/// for an out-of-process decider reached over the wire.
#[derive(Debug)]
pub struct ClientTxnManager<S, C, St>
where
	S: TimestampStorage + 'static,
	C: CommitTable,
	St: VersionedStore,
{
	oracle: Arc<TimestampOracle<S>>,
	decider: Mutex<CommitDecider<S, Arc<C>>>,
	commit_table: Arc<C>,
	store: Arc<St>,
	hasher: Hasher,
	/// Identifies this client on the wire (`wire::TimestampRequest`,
	/// `wire::CommitRequest` correlation); has no bearing on admission.
	client_id: uuid::Uuid,
}

impl<S, C, St> ClientTxnManager<S, C, St>
where
	S: TimestampStorage + 'static,
	C: CommitTable + 'static,
	St: VersionedStore,
{
	pub fn new(
		oracle: Arc<TimestampOracle<S>>,
		commit_table: Arc<C>,
		store: Arc<St>,
		cache_sets: usize,
		cache_associativity: usize,
		hasher: Hasher,
	) -> Self {
		let decider = CommitDecider::new(oracle.clone(), commit_table.clone(), cache_sets, cache_associativity);
		Self { oracle, decider: Mutex::new(decider), commit_table, store, hasher, client_id: uuid::Uuid::new_v4() }
	}

	/// Convenience constructor for deployments with no reason to diverge
	/// from the standard xxh3 fingerprint (see [`DEFAULT_HASHER`]).
	pub fn with_default_hasher(oracle: Arc<TimestampOracle<S>>, commit_table: Arc<C>, store: Arc<St>, cache_sets: usize, cache_associativity: usize) -> Self {
		Self::new(oracle, commit_table, store, cache_sets, cache_associativity, DEFAULT_HASHER)
	}

	/// Builds a manager from `config.cache_sets`/`cache_associativity`
	/// with the standard xxh3 hasher, validating the cache shape via
	/// `TsoConfig::validate` rather than the bare `assert!`s `new`
	/// relies on underneath `ConflictCache::new`.
	pub fn from_config(oracle: Arc<TimestampOracle<S>>, commit_table: Arc<C>, store: Arc<St>, config: &TsoConfig) -> tso_core::error::Result<Self> {
		config.validate()?;
		Ok(Self::with_default_hasher(oracle, commit_table, store, config.cache_sets, config.cache_associativity))
	}

	pub fn client_id(&self) -> uuid::Uuid {
		self.client_id
	}

	#[instrument(name = "client::begin", level = "debug", skip(self))]
	pub fn begin(&self) -> TxnHandle {
		TxnHandle {
			start_ts: self.oracle.next(),
			writes: Vec::new(),
			write_fingerprints: Vec::new(),
			read_fingerprints: Vec::new(),
			status: TxnStatus::Active,
		}
	}

	/// Stages `write` against `txn`'s snapshot. The value is invisible to
	/// other transactions until `commit` succeeds.
	pub fn put(&self, txn: &mut TxnHandle, write: RowKeyFamily) {
		let fingerprint = write.fingerprint(self.hasher);
		self.store.stage(write.clone(), txn.start_ts);
		txn.writes.push(write);
		txn.write_fingerprints.push(fingerprint);
	}

	/// Reads the version of `(table, row, family)` visible as of `txn`'s
	/// start_ts. Registers the row's
	/// fingerprint in the transaction's read set for commit-time admission.
	pub fn get(&self, txn: &mut TxnHandle, table: TableId, row: impl Into<Vec<u8>>, family: impl Into<Vec<u8>>) -> Option<RowKeyFamily> {
		let row = row.into();
		let family = family.into();
		let key: CellKey = (table, row.clone(), family.clone());
		let fingerprint = RowFingerprint((self.hasher)(&table, &row, &family));
		if !txn.read_fingerprints.contains(&fingerprint) {
			txn.read_fingerprints.push(fingerprint);
		}

		let mut visible: Option<(Timestamp, RowKeyFamily)> = None;
		for (version_start_ts, write) in self.store.versions(&key) {
			let commit_ts = self.resolve_commit_ts(&key, version_start_ts);
			let Some(commit_ts) = commit_ts else { continue };
			if commit_ts.0 > txn.start_ts.0 {
				continue;
			}
			let is_newer = match &visible {
				Some((best, _)) => commit_ts.0 > best.0,
				None => true,
			};
			if is_newer {
				visible = Some((commit_ts, write));
			}
		}
		visible.map(|(_, write)| write)
	}

	/// Reads every row of `(table, family)` within `range`, visible as of
	/// `txn`'s snapshot. Row order is lexicographic, not insertion order.
	pub fn scan(&self, txn: &mut TxnHandle, table: TableId, family: impl Into<Vec<u8>>, range: &KeyRange) -> Vec<RowKeyFamily> {
		let family = family.into();
		let mut rows: Vec<Vec<u8>> = self.store.rows(table, &family).into_iter().filter(|row| range.contains(row)).collect();
		rows.sort();
		rows.into_iter().filter_map(|row| self.get(txn, table, row, family.clone())).collect()
	}

	/// Fast path: an already-published shadow marker. Slow path: the
	/// commit table is authoritative, consulted whenever the marker is
	/// absent — whether because the writer hasn't published it yet, or
	/// because the publish itself failed.
	fn resolve_commit_ts(&self, key: &CellKey, start_ts: Timestamp) -> Option<Timestamp> {
		if let Some(commit_ts) = self.store.shadow(key, start_ts) {
			return Some(commit_ts);
		}
		self.commit_table.get(start_ts).ok().flatten()
	}

	/// Submits `txn` to the decider. On commit, publishes shadow markers
	/// for every staged write and consumes the handle; on abort, rolls
	/// back every staged write.
	#[instrument(name = "client::commit", level = "debug", skip(self, txn), fields(start_ts = txn.start_ts.0))]
	pub fn commit(&self, mut txn: TxnHandle) -> CommitResult {
		let result = {
			let mut decider = self.decider.lock().unwrap();
			decider.commit(txn.start_ts, &txn.write_fingerprints, &txn.read_fingerprints)
		};

		match &result {
			CommitResult::Committed { commit_ts, elder, conflicted_rows } => {
				if *elder {
					self.reincarnate(&txn, conflicted_rows, *commit_ts);
				}
				for write in &txn.writes {
					let key = cell_key(write);
					if let Err(err) = self.store.mark_committed(&key, txn.start_ts, *commit_ts) {
						tracing::warn!(error = %err, "shadow cell publish failed, readers will fall back to the commit table");
					}
				}
				txn.status = TxnStatus::Committed;
			}
			CommitResult::Aborted { .. } => {
				self.rollback(&txn);
				txn.status = TxnStatus::Aborted;
			}
		}
		result
	}

	/// Rewrites `conflicted_rows` at `commit_ts` so they are visible under
	/// the commit-order snapshot rule even though their original entry in
	/// the conflict cache was evicted before this transaction's admission
	/// (§4.D "Elder detection"). A plain shadow-cell publish at the
	/// original `start_ts` is not enough here: it still leaves the row's
	/// *only* version tagged at `start_ts`, so a reader has to trust that
	/// tag survived whatever evicted the cache entry. Staging a second
	/// copy directly at `commit_ts` needs no such trust.
	fn reincarnate(&self, txn: &TxnHandle, conflicted_rows: &[RowFingerprint], commit_ts: Timestamp) {
		for fingerprint in conflicted_rows {
			let Some(write) = txn
				.writes
				.iter()
				.zip(&txn.write_fingerprints)
				.find(|(_, f)| *f == fingerprint)
				.map(|(write, _)| write)
			else {
				continue;
			};
			tracing::debug!(
				fingerprint = %fingerprint,
				commit_ts = commit_ts.0,
				"reincarnating row whose prior version was evicted from the conflict cache before commit"
			);
			self.store.stage(write.clone(), commit_ts);
			let key = cell_key(write);
			if let Err(err) = self.store.mark_committed(&key, commit_ts, commit_ts) {
				tracing::warn!(error = %err, "reincarnation shadow cell publish failed, readers will fall back to the commit table");
			}
		}
	}

	/// Client-initiated abort: discards every staged write.
	pub fn abort(&self, mut txn: TxnHandle) {
		self.rollback(&txn);
		txn.status = TxnStatus::Aborted;
	}

	fn rollback(&self, txn: &TxnHandle) {
		for write in &txn.writes {
			let key = cell_key(write);
			self.store.remove(&key, txn.start_ts);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::decider::InMemoryCommitTable;
	use crate::oracle::InMemoryTimestampStorage;

	fn hash(table: &TableId, row: &[u8], family: &[u8]) -> u64 {
		let mut acc = table.0;
		for b in row.iter().chain(family.iter()) {
			acc = acc.wrapping_mul(1099511628211).wrapping_add(*b as u64);
		}
		acc
	}

	#[test]
	fn default_hasher_commits_a_transaction_end_to_end() {
		let oracle = Arc::new(TimestampOracle::new(InMemoryTimestampStorage::new(0), 1000, 100));
		let m = ClientTxnManager::with_default_hasher(oracle, Arc::new(InMemoryCommitTable::default()), Arc::new(InMemoryVersionedStore::default()), 64, 4);
		let mut txn = m.begin();
		m.put(&mut txn, RowKeyFamily::new(TableId(1), b"row".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
		assert!(m.commit(txn).is_committed());
	}

	#[test]
	fn from_config_rejects_an_invalid_cache_shape_instead_of_panicking() {
		let oracle = Arc::new(TimestampOracle::new(InMemoryTimestampStorage::new(0), 1000, 100));
		let mut config = tso_core::TsoConfig::default();
		config.cache_associativity = 0;
		let result = ClientTxnManager::from_config(oracle, Arc::new(InMemoryCommitTable::default()), Arc::new(InMemoryVersionedStore::default()), &config);
		assert!(result.is_err());
	}

	fn manager() -> ClientTxnManager<InMemoryTimestampStorage, InMemoryCommitTable, InMemoryVersionedStore> {
		let oracle = Arc::new(TimestampOracle::new(InMemoryTimestampStorage::new(0), 1000, 100));
		ClientTxnManager::new(oracle, Arc::new(InMemoryCommitTable::default()), Arc::new(InMemoryVersionedStore::default()), 64, 4, hash)
	}

	/// Scenario 1 and P5: a simple commit is visible to a transaction that
	/// begins afterward, but not to one already in flight (read-your-start
	/// snapshot isolation).
	#[test]
	fn commit_is_visible_only_after_it_completes() {
		let m = manager();
		let mut reader_before = m.begin();

		let mut writer = m.begin();
		m.put(&mut writer, RowKeyFamily::new(TableId(1), b"alice".to_vec(), b"cf".to_vec()).with_qualifier(b"balance".to_vec(), b"100".to_vec()));
		assert!(m.commit(writer).is_committed());

		assert!(m.get(&mut reader_before, TableId(1), b"alice".to_vec(), b"cf".to_vec()).is_none());

		let mut reader_after = m.begin();
		let seen = m.get(&mut reader_after, TableId(1), b"alice".to_vec(), b"cf".to_vec()).unwrap();
		assert_eq!(seen.qualifiers[0].value, b"100".to_vec());
	}

	#[test]
	fn write_write_conflict_rolls_back_the_loser() {
		let m = manager();
		let mut t1 = m.begin();
		let mut t2 = m.begin();

		m.put(&mut t1, RowKeyFamily::new(TableId(1), b"row".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"t1".to_vec()));
		m.put(&mut t2, RowKeyFamily::new(TableId(1), b"row".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"t2".to_vec()));

		assert!(m.commit(t1).is_committed());
		let t2_result = m.commit(t2);
		assert!(!t2_result.is_committed());

		let mut reader = m.begin();
		let seen = m.get(&mut reader, TableId(1), b"row".to_vec(), b"cf".to_vec()).unwrap();
		assert_eq!(seen.qualifiers[0].value, b"t1".to_vec());
	}

	#[test]
	fn client_abort_discards_staged_writes() {
		let m = manager();
		let mut t1 = m.begin();
		m.put(&mut t1, RowKeyFamily::new(TableId(1), b"row".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
		m.abort(t1);

		let mut reader = m.begin();
		assert!(m.get(&mut reader, TableId(1), b"row".to_vec(), b"cf".to_vec()).is_none());
	}

	/// Scenario 5: a shadow-cell publish failure does not hide a commit;
	/// the reader falls back to the commit table.
	#[test]
	fn read_recovers_via_commit_table_when_shadow_cell_publish_fails() {
		let oracle = Arc::new(TimestampOracle::new(InMemoryTimestampStorage::new(0), 1000, 100));
		let commit_table = Arc::new(InMemoryCommitTable::default());
		let store = Arc::new(FlakyShadowStore::default());
		let m = ClientTxnManager::new(oracle, commit_table, store, 64, 4, hash);

		let mut writer = m.begin();
		m.put(&mut writer, RowKeyFamily::new(TableId(1), b"row".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
		assert!(m.commit(writer).is_committed());

		let mut reader = m.begin();
		let seen = m.get(&mut reader, TableId(1), b"row".to_vec(), b"cf".to_vec());
		assert!(seen.is_some());
	}

	#[test]
	fn scan_returns_rows_within_range_in_lexicographic_order() {
		let m = manager();
		for row in [b"bob".to_vec(), b"alice".to_vec(), b"zelda".to_vec(), b"carol".to_vec()] {
			let mut txn = m.begin();
			m.put(&mut txn, RowKeyFamily::new(TableId(1), row, b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
			assert!(m.commit(txn).is_committed());
		}

		let mut reader = m.begin();
		let range = KeyRange { lower: b"a".to_vec(), upper: b"d".to_vec(), endpoint: "p0".into() };
		let seen: Vec<Vec<u8>> = m.scan(&mut reader, TableId(1), b"cf".to_vec(), &range).into_iter().map(|w| w.row).collect();
		assert_eq!(seen, vec![b"alice".to_vec(), b"bob".to_vec(), b"carol".to_vec()]);
	}

	/// Scenario 4: elder / reincarnation. A cache too small to hold the
	/// row's entry past one intervening commit forces an elder commit;
	/// the client must rewrite the row at commit_ts so readers see it
	/// without relying on the (possibly evicted) start_ts-tagged version.
	#[test]
	fn elder_commit_reincarnates_the_row_at_commit_ts() {
		let oracle = Arc::new(TimestampOracle::new(InMemoryTimestampStorage::new(0), 1000, 100));
		let commit_table = Arc::new(InMemoryCommitTable::default());
		let store = Arc::new(InMemoryVersionedStore::default());
		// One set, one way: any second distinct fingerprint evicts the
		// first, which is exactly the pressure needed to produce an
		// elder commit deterministically.
		let m = ClientTxnManager::new(oracle, commit_table, store, 1, 1, hash);

		let mut t0 = m.begin();
		m.put(&mut t0, RowKeyFamily::new(TableId(1), b"row-a".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"first".to_vec()));
		assert!(m.commit(t0).is_committed());

		// Begin the eventual elder transaction now, before any eviction
		// pressure, and stage its write — but do not commit yet.
		let mut elder_txn = m.begin();
		m.put(&mut elder_txn, RowKeyFamily::new(TableId(1), b"row-a".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"second".to_vec()));

		// Two further commits, each landing in the cache's one set: the
		// first evicts row-a's entry (an old, already-low value), the
		// second evicts *that* entry with one allocated after elder_txn
		// began, which is what pushes low_watermark past elder_txn's
		// start_ts.
		let mut evictor1 = m.begin();
		m.put(&mut evictor1, RowKeyFamily::new(TableId(1), b"row-b".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
		assert!(m.commit(evictor1).is_committed());

		let mut evictor2 = m.begin();
		m.put(&mut evictor2, RowKeyFamily::new(TableId(1), b"row-c".to_vec(), b"cf".to_vec()).with_qualifier(b"q".to_vec(), b"v".to_vec()));
		assert!(m.commit(evictor2).is_committed());

		// Admission now finds row-a's fingerprint absent from the cache,
		// with the low watermark past elder_txn's start_ts — exactly the
		// elder condition.
		let result = m.commit(elder_txn);
		let CommitResult::Committed { elder, commit_ts, .. } = &result else { panic!("expected elder commit, got {result:?}") };
		assert!(*elder);

		let mut reader = m.begin();
		let seen = m.get(&mut reader, TableId(1), b"row-a".to_vec(), b"cf".to_vec()).unwrap();
		assert_eq!(seen.qualifiers[0].value, b"second".to_vec());

		// The reincarnated copy is keyed directly at commit_ts: a reader
		// whose snapshot starts exactly at commit_ts must already see it.
		let key: CellKey = (TableId(1), b"row-a".to_vec(), b"cf".to_vec());
		assert!(m.store.versions(&key).iter().any(|(ts, _)| ts == commit_ts));
	}
}
