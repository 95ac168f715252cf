//! In-process async execution queue.
//!
//! Fire-and-poll: the HTTP handler enqueues a `(execution_id, envelope)`
//! pair and returns immediately; a single worker drains the channel and
//! re-enters the synchronous invocation path. The queue is bounded —
//! admission control surfaces as a refusal, not unbounded memory.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::Envelope;

/// One queued execution.
#[derive(Debug)]
pub struct QueueItem {
    /// Ledger row created at enqueue time.
    pub execution_id: String,
    /// The envelope to execute.
    pub envelope: Envelope,
}

/// The queue rejected the item because it is at capacity or shut down.
#[derive(Debug, Error)]
#[error("async execution queue is full or closed")]
pub struct QueueFull;

/// Bounded sender half of the execution queue.
#[derive(Debug, Clone)]
pub struct ExecutionQueue {
    tx: mpsc::Sender<QueueItem>,
}

impl ExecutionQueue {
    /// Create a queue with the given capacity, returning the sender and
    /// the receiver the worker drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueueItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueFull`] when the channel is at capacity or closed.
    pub fn enqueue(&self, item: QueueItem) -> Result<(), QueueFull> {
        self.tx.try_send(item).map_err(|_| QueueFull)
    }
}
