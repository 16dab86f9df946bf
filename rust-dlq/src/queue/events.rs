//! Queue change notifications.
//!
//! Every store mutation fans out a [`QueueEvent`] over a broadcast channel.
//! The presentation layer subscribes and re-renders; the core never depends
//! on any particular consumer being present.

use tokio::sync::broadcast;

use super::job::{Job, JobId};

/// Broadcast channel capacity for queue events.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change to the job store.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A job was inserted at the tail of the queue.
    JobAdded(Job),
    /// A job's status, message, attempt count, or URL changed.
    JobUpdated(Job),
    /// A job was removed.
    JobRemoved(JobId),
    /// Queue order changed.
    Reordered,
    /// Completed jobs were cleared.
    CompletedCleared(usize),
}

/// Fan-out sender for queue events.
#[derive(Debug)]
pub(crate) struct QueueEventSender {
    tx: broadcast::Sender<QueueEvent>,
}

impl QueueEventSender {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    /// Send errors just mean no subscribers are currently listening.
    pub(crate) fn emit(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }
}
