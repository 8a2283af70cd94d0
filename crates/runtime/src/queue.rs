use crossbeam_channel::{Receiver, RecvError, Sender, unbounded};

/// The decider's sole contended resource. Every commit request funnels
/// through one `Sender`; exactly one consumer drains the matching
/// `Receiver` on the decider's dedicated thread, which is what lets
/// `CommitDecider` mutate the conflict cache and `low_watermark` without
/// locks.
pub fn serialized_queue<T>() -> (Sender<T>, Receiver<T>) {
	unbounded()
}

/// Convenience alias used by callers that just want to name the
/// producer-facing half of the queue.
pub type QueueSender<T> = Sender<T>;
pub type QueueReceiver<T> = Receiver<T>;
pub type QueueRecvError = RecvError;
