//! Threading primitives shared by the oracle's batch allocator and the
//! commit decider's serialized request queue. Deliberately thin: the
//! policy (when to allocate, how to decide a commit) belongs to
//! `tso-transaction`, not here.

pub mod background;
pub mod queue;

pub use background::Background;
pub use queue::{QueueReceiver, QueueRecvError, QueueSender, serialized_queue};
