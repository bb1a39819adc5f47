//! Event delivery to the embedding application.
//!
//! Events go through a bounded channel. Emitting never blocks: when the
//! receiver falls behind the event is dropped and a warning is logged.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

use ovsup_core::DaemonEvent;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 10;

/// Sending side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<DaemonEvent>,
}

impl EventSink {
    /// Creates a sink and its receiver.
    ///
    /// A zero capacity is bumped to one, since tokio channels need room
    /// for at least one message.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DaemonEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Emits an event without waiting.
    ///
    /// Returns false if the event was dropped.
    pub fn emit(&self, event: DaemonEvent) -> bool {
        trace!(event = %event, "Emitting event");

        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(event = %event, "Event channel full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event = %event, "No event receiver, dropping event");
                false
            }
        }
    }
}
