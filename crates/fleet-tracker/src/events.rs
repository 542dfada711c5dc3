//! Dispatch and emergency event distribution

use fleet_core::Event;

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Events kept for late joiners
const DEFAULT_HISTORY: usize = 256;

/// Event bus carrying assignment, release and emergency events to stream clients
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    history: Arc<RwLock<VecDeque<Event>>>,
    max_history: usize,
    event_count: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));

        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(DEFAULT_HISTORY))),
            max_history: DEFAULT_HISTORY,
            event_count: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) {
        {
            let mut history = self.history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let total = self.event_count.fetch_add(1, Ordering::Relaxed) + 1;

        // No receivers is fine
        let _ = self.sender.send(event);
        debug!("Event published, total: {}", total);
    }

    /// Most recent `count` events, oldest first
    pub fn recent(&self, count: usize) -> Vec<Event> {
        let history = self.history.read();
        let start = history.len().saturating_sub(count);
        history.iter().skip(start).cloned().collect()
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{DroneId, OrderId};

    #[test]
    fn test_event_history_is_bounded() {
        let bus = EventBus::new(16);

        for i in 0..(DEFAULT_HISTORY + 10) {
            bus.publish(Event::drone_assigned(
                OrderId::new(format!("o-{}", i)),
                DroneId::new("A"),
            ));
        }

        assert_eq!(bus.event_count(), (DEFAULT_HISTORY + 10) as u64);
        assert_eq!(bus.recent(usize::MAX).len(), DEFAULT_HISTORY);
        assert_eq!(bus.recent(3).len(), 3);
    }

    #[tokio::test]
    async fn test_subscription() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(Event::drone_released(OrderId::new("o-1"), DroneId::new("A")));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, fleet_core::EventType::DroneReleased);
    }
}
