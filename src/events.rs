//! Event bus for entrainment lifecycle events
//!
//! One-to-many broadcast over `tokio::sync::broadcast`. Emission never waits on
//! subscribers; a subscriber that falls more than `capacity` events behind sees
//! `RecvError::Lagged` and resumes from the oldest retained event. Order is
//! preserved for every subscriber.

use crate::types::EntrainmentEvent;
use tokio::sync::broadcast;

/// Default number of buffered events per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EntrainmentEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            capacity: capacity.max(1),
        }
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EntrainmentEvent> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers. Returns how many received it; zero
    /// subscribers is not an error.
    pub fn emit(&self, event: EntrainmentEvent) -> usize {
        match self.tx.send(event) {
            Ok(count) => count,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(?event, "No subscribers for event");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AbortReason, TriggerReason};
    use chrono::Utc;
    use std::time::Duration;

    fn triggered() -> EntrainmentEvent {
        EntrainmentEvent::Triggered {
            at: Utc::now(),
            reason: TriggerReason::HrSpike,
            hr_value: 120,
            hrv_value: 45.0,
        }
    }

    fn aborted() -> EntrainmentEvent {
        EntrainmentEvent::Aborted {
            at: Utc::now(),
            reason: AbortReason::MaxDuration,
            session_duration: Duration::from_secs(600),
        }
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(16);
        assert_eq!(bus.subscriber_count(), 0);

        let _rx = bus.subscribe();
        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
        assert_eq!(bus.capacity(), 16);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(16);
        assert_eq!(bus.emit(triggered()), 0);
    }

    #[tokio::test]
    async fn test_all_subscribers_see_events_in_order() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.emit(triggered()), 2);
        assert_eq!(bus.emit(aborted()), 2);

        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                EntrainmentEvent::Triggered { .. }
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                EntrainmentEvent::Aborted { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_block_emit() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for _ in 0..10 {
            bus.emit(triggered());
        }

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(8))
        ));
        assert!(rx.recv().await.is_ok());
    }
}
