//! Fleet snapshot cache
//!
//! Holds the last good enriched snapshot. Reads inside the freshness window
//! are served from memory; a failed or timed-out fetch falls back to the last
//! good snapshot and is only logged.

use chrono::{DateTime, Utc};
use fleet_core::{Drone, DroneId, FleetSnapshot, RestaurantDirectory};
use fleet_source::TelemetrySource;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::enrich::enrich_fleet;
use crate::hub::{Broadcaster, Subscription};

/// Cache timing settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Snapshots younger than this are served without fetching
    pub window: Duration,
    /// Upper bound on a single fetch
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<FleetSnapshot>>,
    fetched_at: Option<Instant>,
}

/// Owner of the shared fleet snapshot
pub struct FleetCache {
    source: Arc<dyn TelemetrySource>,
    directory: Arc<RestaurantDirectory>,
    config: CacheConfig,
    state: RwLock<CacheState>,
    /// Serializes fetches so at most one is in flight
    fetch_lock: Mutex<()>,
    hub: Broadcaster<FleetSnapshot>,
    fetches: AtomicU64,
    failures: AtomicU64,
}

impl FleetCache {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        directory: Arc<RestaurantDirectory>,
        config: CacheConfig,
    ) -> Self {
        Self {
            source,
            directory,
            config,
            state: RwLock::new(CacheState::default()),
            fetch_lock: Mutex::new(()),
            hub: Broadcaster::new("fleet"),
            fetches: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &Arc<dyn TelemetrySource> {
        &self.source
    }

    pub fn directory(&self) -> &Arc<RestaurantDirectory> {
        &self.directory
    }

    /// Cached snapshot if still inside the window, otherwise a fresh fetch
    pub async fn fetch_snapshot(&self) -> Arc<FleetSnapshot> {
        if let Some(snapshot) = self.fresh() {
            return snapshot;
        }

        let _guard = self.fetch_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(snapshot) = self.fresh() {
            return snapshot;
        }
        self.fetch_locked().await
    }

    /// Fetch regardless of the window; used by the poller
    pub async fn refresh(&self) -> Arc<FleetSnapshot> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_locked().await
    }

    /// Current snapshot without fetching
    pub fn current(&self) -> Option<Arc<FleetSnapshot>> {
        self.state.read().snapshot.clone()
    }

    pub fn drone(&self, id: &DroneId) -> Option<Drone> {
        self.current()?.drone(id).cloned()
    }

    /// When the current snapshot was fetched
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.current().map(|s| s.fetched_at)
    }

    /// Subscribe to new snapshots; the current one is delivered at once
    pub fn subscribe(&self) -> Subscription<FleetSnapshot> {
        self.hub.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Apply a local change to one drone and notify subscribers.
    ///
    /// Copy-on-write: readers holding the previous snapshot keep seeing it.
    /// The freshness window is not reset. Returns `false` if the drone is not
    /// in the current snapshot.
    pub fn update_drone<F>(&self, id: &DroneId, apply: F) -> bool
    where
        F: FnOnce(&mut Drone),
    {
        let updated = {
            let mut state = self.state.write();
            let Some(current) = state.snapshot.as_ref() else {
                return false;
            };

            let mut next = FleetSnapshot::clone(current);
            let Some(drone) = next.drones.iter_mut().find(|d| &d.id == id) else {
                return false;
            };
            apply(drone);
            drone.refresh_health();

            let next = Arc::new(next);
            state.snapshot = Some(Arc::clone(&next));
            next
        };

        debug!("Optimistic update applied to drone {}", id);
        self.hub.publish(updated);
        true
    }

    fn fresh(&self) -> Option<Arc<FleetSnapshot>> {
        let state = self.state.read();
        let fetched_at = state.fetched_at?;
        if fetched_at.elapsed() < self.config.window {
            state.snapshot.clone()
        } else {
            None
        }
    }

    fn last_good(&self) -> Arc<FleetSnapshot> {
        self.current()
            .unwrap_or_else(|| Arc::new(FleetSnapshot::empty()))
    }

    async fn fetch_locked(&self) -> Arc<FleetSnapshot> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let requested_at = Utc::now();

        let records =
            match tokio::time::timeout(self.config.fetch_timeout, self.source.fetch_drones()).await
            {
                Ok(Ok(records)) => records,
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Fleet fetch failed, serving last good snapshot: {}", e);
                    return self.last_good();
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Fleet fetch timed out after {:?}, serving last good snapshot",
                        self.config.fetch_timeout
                    );
                    return self.last_good();
                }
            };

        let now = Utc::now();
        let snapshot = Arc::new(FleetSnapshot {
            drones: enrich_fleet(records, &self.directory, now),
            fetched_at: requested_at,
        });

        {
            let mut state = self.state.write();
            state.snapshot = Some(Arc::clone(&snapshot));
            state.fetched_at = Some(Instant::now());
        }

        debug!("Fleet snapshot refreshed: {} drones", snapshot.drones.len());
        self.hub.publish(Arc::clone(&snapshot));
        snapshot
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::{DroneStatus, Order, OrderId, RestaurantId};
    use fleet_source::{
        DroneNotice, DronePatch, DroneRecord, InMemoryTelemetrySource, NoticeBody, OrderPatch,
        RestaurantPatch, SourceError, SourceResult,
    };
    use mockall::mock;

    mock! {
        pub Source {}

        #[async_trait]
        impl TelemetrySource for Source {
            async fn fetch_drones(&self) -> SourceResult<Vec<DroneRecord>>;
            async fn fetch_orders(&self) -> SourceResult<Vec<Order>>;
            async fn fetch_order(&self, id: &OrderId) -> SourceResult<Option<Order>>;
            async fn patch_drone(&self, id: &DroneId, patch: &DronePatch) -> SourceResult<()>;
            async fn patch_order(&self, id: &OrderId, patch: &OrderPatch) -> SourceResult<()>;
            async fn patch_restaurant(&self, id: &RestaurantId, patch: &RestaurantPatch) -> SourceResult<()>;
            async fn notify_drone(&self, id: &DroneId, notice: DroneNotice, body: &NoticeBody) -> SourceResult<()>;
        }
    }

    fn cache_over(source: Arc<dyn TelemetrySource>) -> FleetCache {
        FleetCache::new(
            source,
            Arc::new(RestaurantDirectory::storefront()),
            CacheConfig::default(),
        )
    }

    fn two_drones() -> Vec<DroneRecord> {
        vec![DroneRecord::new("A"), DroneRecord::new("B")]
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_serves_identical_snapshot_without_second_fetch() {
        let mut source = MockSource::new();
        source
            .expect_fetch_drones()
            .times(1)
            .returning(|| Ok(two_drones()));
        let cache = cache_over(Arc::new(source));

        let first = cache.fetch_snapshot().await;
        tokio::time::advance(Duration::from_millis(1_500)).await;
        let second = cache.fetch_snapshot().await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.drones.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_window_fetches_again() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        let cache = cache_over(source.clone());

        cache.fetch_snapshot().await;
        tokio::time::advance(Duration::from_millis(2_100)).await;
        cache.fetch_snapshot().await;

        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_preserves_last_good_snapshot() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        let cache = cache_over(source.clone());

        let good = cache.fetch_snapshot().await;
        source.set_failing(true);
        tokio::time::advance(Duration::from_secs(3)).await;

        let after_failure = cache.fetch_snapshot().await;
        assert!(Arc::ptr_eq(&good, &after_failure));
        assert_eq!(cache.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_before_any_success_yields_empty() {
        let mut source = MockSource::new();
        source
            .expect_fetch_drones()
            .returning(|| Err(SourceError::unavailable("down")));
        let cache = cache_over(Arc::new(source));

        assert!(cache.fetch_snapshot().await.is_empty());
        assert!(cache.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        let cache = cache_over(source.clone());
        let good = cache.fetch_snapshot().await;

        source.set_latency(Some(Duration::from_secs(60)));
        tokio::time::advance(Duration::from_secs(3)).await;

        let served = cache.fetch_snapshot().await;
        assert!(Arc::ptr_eq(&good, &served));
        assert_eq!(cache.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        source.set_latency(Some(Duration::from_millis(200)));
        let cache = cache_over(source.clone());

        let (a, b) = tokio::join!(cache.fetch_snapshot(), cache.fetch_snapshot());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_gets_current_then_updates() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        let cache = cache_over(source);
        cache.fetch_snapshot().await;

        let mut sub = cache.subscribe();
        assert_eq!(sub.try_recv().unwrap().drones.len(), 2);

        assert!(cache.update_drone(&DroneId::new("A"), |d| d.status = DroneStatus::Returning));
        let updated = sub.recv().await.unwrap();
        assert_eq!(updated.drone(&DroneId::new("A")).unwrap().status, DroneStatus::Returning);
    }

    #[tokio::test]
    async fn test_update_is_copy_on_write() {
        let source = Arc::new(InMemoryTelemetrySource::with_drones(two_drones()));
        let cache = cache_over(source);
        let before = cache.fetch_snapshot().await;

        cache.update_drone(&DroneId::new("B"), |d| d.battery = 5);

        assert_eq!(before.drone(&DroneId::new("B")).unwrap().battery, 100);
        assert_eq!(cache.drone(&DroneId::new("B")).unwrap().battery, 5);
        assert!(!cache.update_drone(&DroneId::new("missing"), |d| d.battery = 1));
    }
}
