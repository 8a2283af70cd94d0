//! Row fingerprint hashing.
//!
//! The native feature hashes with xxh3. Only full row bytes ever reach
//! this function; the result (a 64-bit fingerprint) is what crosses the
//! wire to the TSO.

use tso_core::TableId;

#[cfg(feature = "native")]
pub fn fingerprint(table: &TableId, row: &[u8], family: &[u8]) -> u64 {
	use xxhash_rust::xxh3::Xxh3;
	use std::hash::Hasher;

	let mut hasher = Xxh3::new();
	hasher.write_u64(table.0);
	hasher.write(row);
	hasher.write(family);
	hasher.finish()
}

#[cfg(not(feature = "native"))]
pub fn fingerprint(_table: &TableId, _row: &[u8], _family: &[u8]) -> u64 {
	compile_error!("tso-hash requires the `native` feature; a wasm-native hashing path is not implemented yet");
}

#[cfg(all(test, feature = "native"))]
mod tests {
	use super::*;

	#[test]
	fn same_inputs_hash_identically() {
		let table = TableId(1);
		assert_eq!(fingerprint(&table, b"row", b"cf"), fingerprint(&table, b"row", b"cf"));
	}

	#[test]
	fn different_rows_usually_differ() {
		let table = TableId(1);
		assert_ne!(fingerprint(&table, b"row-a", b"cf"), fingerprint(&table, b"row-b", b"cf"));
	}

	#[test]
	fn different_tables_usually_differ() {
		assert_ne!(
			fingerprint(&TableId(1), b"row", b"cf"),
			fingerprint(&TableId(2), b"row", b"cf"),
		);
	}

	#[test]
	fn different_families_usually_differ() {
		let table = TableId(1);
		assert_ne!(fingerprint(&table, b"row", b"cf1"), fingerprint(&table, b"row", b"cf2"));
	}
}
