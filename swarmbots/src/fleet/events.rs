//! Broadcast of fleet events to observers.

use tokio::sync::broadcast;
use tracing::debug;

use crate::actor::FleetEvent;

/// Default capacity of the fleet event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Cloneable sender side of the fleet event channel.
#[derive(Debug, Clone)]
pub struct FleetEvents {
    sender: broadcast::Sender<FleetEvent>,
}

impl FleetEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that will see it.
    pub fn publish(&self, event: FleetEvent) -> usize {
        debug!(?event, "Publishing fleet event");
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FleetEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let events = FleetEvents::new();
        assert_eq!(events.publish(FleetEvent::InitReady), 0);

        let mut first = events.subscribe();
        let mut second = events.subscribe();
        assert_eq!(events.subscriber_count(), 2);
        assert_eq!(events.publish(FleetEvent::ModeReady), 2);

        assert_eq!(first.recv().await.unwrap(), FleetEvent::ModeReady);
        assert_eq!(second.recv().await.unwrap(), FleetEvent::ModeReady);
    }
}
