//! Broadcast event bus connecting the orchestrator to any number of observers.
//!
//! Uses `tokio::sync::broadcast`: publishing never blocks, and a slow
//! subscriber that falls behind sees `RecvError::Lagged` instead of stalling
//! the run.

use tokio::sync::broadcast;
use tracing::trace;

use super::types::AgentEvent;

/// Default channel capacity; text deltas dominate the traffic.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out channel for `AgentEvent`s.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Create a new bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped: no subscribers");
        }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(AgentEvent::warning("careful"));

        assert_eq!(a.recv().await.unwrap(), AgentEvent::warning("careful"));
        assert_eq!(b.recv().await.unwrap(), AgentEvent::warning("careful"));
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(AgentEvent::error("nobody listening"));
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        for i in 0..3 {
            bus.publish(AgentEvent::TextDelta {
                text: i.to_string(),
            });
        }
        for i in 0..3 {
            match rx.recv().await.unwrap() {
                AgentEvent::TextDelta { text } => assert_eq!(text, i.to_string()),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
