//! Recurring fleet fetch

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::FleetCache;
use crate::schedule::RecurringTask;

/// Drives fetch, enrich, store and notify on a fixed period
pub struct FleetPoller {
    cache: Arc<FleetCache>,
    task: RecurringTask,
    ticks: Arc<AtomicU64>,
}

impl FleetPoller {
    pub fn new(cache: Arc<FleetCache>) -> Self {
        Self {
            cache,
            task: RecurringTask::new("fleet poller"),
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start polling; a no-op returning `false` while already polling
    pub fn start_polling(&self, interval: Duration) -> bool {
        let cache = Arc::clone(&self.cache);
        let ticks = Arc::clone(&self.ticks);

        self.task.start(interval, move || {
            let cache = Arc::clone(&cache);
            let ticks = Arc::clone(&ticks);
            async move {
                let snapshot = cache.refresh().await;
                let tick = ticks.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Poll tick {}: {} drones", tick, snapshot.drones.len());
            }
        })
    }

    /// Stop polling; a no-op returning `false` when not polling
    pub async fn stop_polling(&self) -> bool {
        self.task.stop().await
    }

    pub fn is_polling(&self) -> bool {
        self.task.is_running()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use fleet_core::RestaurantDirectory;
    use fleet_source::{DroneRecord, InMemoryTelemetrySource};

    fn setup() -> (Arc<InMemoryTelemetrySource>, Arc<FleetCache>) {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(vec![DroneRecord::new("A")]));
        let cache = Arc::new(FleetCache::new(
            source.clone(),
            Arc::new(RestaurantDirectory::storefront()),
            CacheConfig::default(),
        ));
        (source, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_and_notifies_subscribers() {
        let (source, cache) = setup();
        let mut sub = cache.subscribe();
        let poller = FleetPoller::new(cache);

        assert!(poller.start_polling(Duration::from_secs(3)));
        tokio::time::sleep(Duration::from_millis(6_500)).await;

        assert_eq!(source.fetch_count(), 3);
        assert_eq!(poller.tick_count(), 3);
        assert!(sub.try_recv().is_some());

        assert!(poller.stop_polling().await);
        assert!(!poller.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_twice() {
        let (source, cache) = setup();
        let poller = FleetPoller::new(cache);

        assert!(poller.start_polling(Duration::from_secs(3)));
        assert!(!poller.start_polling(Duration::from_secs(3)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.fetch_count(), 1);

        assert!(poller.stop_polling().await);
        assert!(!poller.stop_polling().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_never_overlaps_fetches() {
        let (source, cache) = setup();
        source.set_latency(Some(Duration::from_secs(4)));
        let poller = FleetPoller::new(cache);

        poller.start_polling(Duration::from_secs(3));
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        poller.stop_polling().await;

        // Fetches start at 0s, 4s and 8s; missed ticks are skipped
        assert_eq!(source.fetch_count(), 3);
    }
}
