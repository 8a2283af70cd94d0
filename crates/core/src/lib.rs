//! Shared types for the snapshot-isolation transaction oracle: the logical
//! clock, row fingerprints, write entries, configuration and the fatal-path
//! capability boundary. No policy lives here — admission, eviction and
//! commit decisions belong to `tso-transaction`.

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod panicker;
pub mod row;
pub mod timestamp;

pub use config::{KeyRange, TsoConfig};
pub use error::{Error, Result};
pub use fingerprint::RowFingerprint;
pub use panicker::{CountingPanicker, Panicker, ProcessPanicker};
pub use row::{Qualifier, RowKeyFamily, TableId};
pub use timestamp::Timestamp;
