//! Broadcast dispatcher for stream events
//!
//! A device link owns one dispatcher. Consumers subscribe before starting an
//! operation so they observe every event it produces.

use super::events::StreamEvent;
use tokio::sync::broadcast;

/// Event dispatcher for publishing stream events to subscribers
#[derive(Debug, Clone)]
pub struct StreamDispatcher {
    tx: broadcast::Sender<StreamEvent>,
}

impl StreamDispatcher {
    /// Create a new dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all subscribers.
    ///
    /// Having no subscribers is not an error for a stream; the event is
    /// dropped.
    pub fn publish(&self, event: StreamEvent) {
        tracing::trace!("{}", event.description());
        let _ = self.tx.send(event);
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StreamDispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}
