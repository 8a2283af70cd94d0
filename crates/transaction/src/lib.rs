//! Snapshot-isolation transaction core: timestamp oracle, conflict cache,
//! commit decider, client-side transaction manager, and the multi-partition
//! two-phase-commit layer over a sequencer.
//!
//! Module boundaries follow the serialization boundary in the system: only
//! `decider` and `oracle` mutate shared state, and only from one thread each.
//! Everything in `client` and `global` is caller-owned, per-transaction state.

pub mod cache;
pub mod client;
pub mod decider;
pub mod global;
pub mod oracle;
pub mod wire;

pub use cache::ConflictCache;
pub use client::{BeginEscalation, ClientTxnManager, NextBeginPolicy, PartitionTable, PartitionUsage, TxnHandle, VersionedStore};
pub use decider::{AbortReason, CommitDecider, CommitResult, CommitTable};
pub use global::{GlobalCommitCoordinator, GlobalCommitResult, GlobalOutcome, InMemorySequencer, Partition, PartitionWrites, Sequencer};
pub use oracle::{TimestampOracle, TimestampStorage};
