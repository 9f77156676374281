//! Broadcast event bus for execution lifecycle notifications.
//!
//! Built on `tokio::sync::broadcast`. Publishing never blocks the engine
//! and is a no-op when nobody is subscribed; slow subscribers observe
//! `Lagged` instead of back-pressuring the run.

use stepwise_types::event::EngineEvent;
use tokio::sync::broadcast;

/// Multi-consumer bus for `EngineEvent`s.
///
/// Cloning the bus clones the sender, so the engine and any number of
/// producers share one channel.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
