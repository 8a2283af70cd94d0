//! Logical TSO wire messages.
//!
//! These types are the payloads a network transport would serialize; the
//! transport itself (framing, RPC correlation, retries) is an external
//! collaborator and out of scope here. Rows and reads cross the wire only
//! as 64-bit fingerprints — full row bytes never reach the TSO.

use serde::{Deserialize, Serialize};

use tso_core::{RowFingerprint, Timestamp};

use crate::decider::AbortReason;

/// Requests the next timestamp from a partition's oracle. `sequence` is
/// set only for global transactions, where a sequencer orders the
/// per-partition requests that make up one `vts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampRequest {
	pub client_id: u64,
	pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampResponse {
	pub ts: Timestamp,
}

/// A single-partition commit request as it would arrive over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
	pub start_ts: Timestamp,
	pub writes: Vec<RowFingerprint>,
	pub reads: Vec<RowFingerprint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
	pub committed: bool,
	pub commit_ts: Timestamp,
	pub elder: bool,
	pub conflict_rows: Vec<RowFingerprint>,
	/// Present only when `committed` is false.
	pub abort_reason: Option<WireAbortReason>,
}

/// Wire-safe projection of `AbortReason`: the durability message is
/// flattened to a string since the underlying I/O error type is not
/// required to be serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireAbortReason {
	Conflict(RowFingerprint),
	TooOld,
	Durability(String),
}

impl From<&AbortReason> for WireAbortReason {
	fn from(reason: &AbortReason) -> Self {
		match reason {
			AbortReason::Conflict(f) => WireAbortReason::Conflict(*f),
			AbortReason::TooOld => WireAbortReason::TooOld,
			AbortReason::Durability(msg) => WireAbortReason::Durability(msg.clone()),
		}
	}
}

/// The vote-only half of the global two-phase commit: a participant's
/// writes/reads plus the commit-timestamp vector the sequencer assigned to
/// every partition the transaction touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareCommit {
	pub start_ts: Timestamp,
	pub writes: Vec<RowFingerprint>,
	pub reads: Vec<RowFingerprint>,
	pub vts: Vec<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
	pub committed: bool,
	pub conflict_rows: Vec<RowFingerprint>,
}

/// Broadcast by the sequencer once every partition has voted `Ready`: the
/// commit-timestamp vector to finalize with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiCommitRequest {
	pub vts: Vec<Timestamp>,
}

/// Idempotent bookkeeping: a partition acknowledges it has finished
/// rolling back `start_ts`'s speculative versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteAbort {
	pub start_ts: Timestamp,
}

/// Idempotent bookkeeping: a client acknowledges it has finished rewriting
/// `start_ts`'s elder rows at their commit-ts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteReincarnation {
	pub start_ts: Timestamp,
}
