//! Subscriber fan-out
//!
//! Every subscriber owns a bounded channel. Publishing never blocks and never
//! runs subscriber code, so a subscriber may drop its handle at any time,
//! including while a publish is in progress.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

/// Default per-subscriber channel capacity
pub const SUBSCRIBER_CAPACITY: usize = 16;

type Clients<T> = DashMap<Uuid, mpsc::Sender<Arc<T>>>;

/// Fan-out of shared values to any number of subscribers
pub struct Broadcaster<T> {
    name: &'static str,
    clients: Arc<Clients<T>>,
    /// Last published value, replayed to new subscribers
    latest: RwLock<Option<Arc<T>>>,
    capacity: usize,
    message_count: AtomicUsize,
}

impl<T: Send + Sync + 'static> Broadcaster<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            clients: Arc::new(DashMap::new()),
            latest: RwLock::new(None),
            capacity: capacity.max(1),
            message_count: AtomicUsize::new(0),
        }
    }

    /// Register a subscriber; it receives the latest value at once if there is one
    pub fn subscribe(&self) -> Subscription<T> {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.capacity);

        // Holding `latest` orders the replay before any later publish.
        let latest = self.latest.read();
        if let Some(value) = latest.as_ref() {
            let _ = tx.try_send(Arc::clone(value));
        }
        self.clients.insert(id, tx);
        drop(latest);

        debug!("{} subscriber {} registered ({} total)", self.name, id, self.clients.len());

        Subscription {
            id,
            rx,
            clients: Arc::downgrade(&self.clients),
        }
    }

    /// Send a value to every subscriber; full subscribers miss this value
    pub fn publish(&self, value: Arc<T>) {
        let mut latest = self.latest.write();
        *latest = Some(Arc::clone(&value));
        self.message_count.fetch_add(1, Ordering::Relaxed);

        let mut closed = Vec::new();
        for client in self.clients.iter() {
            match client.value().try_send(Arc::clone(&value)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("{} subscriber {} is lagging, dropping update", self.name, client.key());
                }
                Err(TrySendError::Closed(_)) => closed.push(*client.key()),
            }
        }
        drop(latest);

        for id in closed {
            self.clients.remove(&id);
            debug!("{} subscriber {} removed (receiver closed)", self.name, id);
        }
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.latest.read().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.len()
    }

    /// Total values published
    pub fn message_count(&self) -> usize {
        self.message_count.load(Ordering::Relaxed)
    }
}

/// Handle to a registered subscriber; dropping it unsubscribes
pub struct Subscription<T> {
    id: Uuid,
    rx: mpsc::Receiver<Arc<T>>,
    clients: Weak<Clients<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next value; `None` once the broadcaster is gone
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.rx.recv().await
    }

    /// Next value if one is already queued
    pub fn try_recv(&mut self) -> Option<Arc<T>> {
        self.rx.try_recv().ok()
    }

    /// Stop receiving; equivalent to dropping the handle
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(clients) = self.clients.upgrade() {
            clients.remove(&self.id);
        }
        self.rx.close();
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let hub: Broadcaster<u32> = Broadcaster::new("test");
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(Arc::new(7));

        assert_eq!(*a.recv().await.unwrap(), 7);
        assert_eq!(*b.recv().await.unwrap(), 7);
        assert_eq!(hub.message_count(), 1);
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_latest_immediately() {
        let hub: Broadcaster<u32> = Broadcaster::new("test");
        hub.publish(Arc::new(1));
        hub.publish(Arc::new(2));

        let mut late = hub.subscribe();
        assert_eq!(*late.try_recv().unwrap(), 2);
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_no_replay_before_first_publish() {
        let hub: Broadcaster<u32> = Broadcaster::new("test");
        let mut sub = hub.subscribe();
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub: Broadcaster<u32> = Broadcaster::new("test");
        let sub = hub.subscribe();
        let other = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);

        other.unsubscribe();
        assert_eq!(hub.subscriber_count(), 0);

        hub.publish(Arc::new(3));
    }

    #[test]
    fn test_lagging_subscriber_does_not_block() {
        let hub: Broadcaster<u32> = Broadcaster::with_capacity("test", 1);
        let mut slow = hub.subscribe();

        hub.publish(Arc::new(1));
        hub.publish(Arc::new(2));

        assert_eq!(*slow.try_recv().unwrap(), 1);
        assert!(slow.try_recv().is_none());
        assert_eq!(hub.latest().map(|v| *v), Some(2));
    }

    #[tokio::test]
    async fn test_subscriber_outlives_broadcaster() {
        let hub: Broadcaster<u32> = Broadcaster::new("test");
        let mut sub = hub.subscribe();
        drop(hub);

        assert!(sub.recv().await.is_none());
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_subscriber_churn_is_not_logged_at_info() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || writer.clone())
            .finish();
        let hub: Broadcaster<u32> = Broadcaster::new("test");

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                let sub = hub.subscribe();
                drop(sub);
            }
            hub.publish(Arc::new(1));
        });

        assert!(log.0.lock().is_empty());
    }
}
