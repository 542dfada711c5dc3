//! # Fleet Tracker
//!
//! Live view of the delivery fleet shared by every observer.
//!
//! ## Features
//! - Snapshot cache with a short freshness window and last-good fallback
//! - Recurring polling with non-overlapping fetches
//! - Subscriber fan-out with immediate replay of the current state
//! - Threshold alerting with acknowledgement
//! - Event bus for dispatch and emergency events

pub mod alerts;
pub mod cache;
pub mod enrich;
pub mod error;
pub mod events;
pub mod hub;
pub mod poller;
pub mod schedule;

pub use alerts::{AlertEngine, AlertThresholds};
pub use cache::{CacheConfig, FleetCache};
pub use error::{TrackerError, TrackerResult};
pub use events::EventBus;
pub use hub::{Broadcaster, Subscription};
pub use poller::FleetPoller;
pub use schedule::RecurringTask;

use chrono::{DateTime, SecondsFormat, Utc};
use fleet_core::{Alert, AlertType, DroneId, FleetSnapshot, Position, RestaurantDirectory};
use fleet_source::{DronePatch, TelemetrySource};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tracking configuration
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Snapshot freshness window
    pub cache_window: Duration,
    /// Upper bound on a single fetch
    pub fetch_timeout: Duration,
    /// Fleet polling period
    pub poll_interval: Duration,
    /// Alert evaluation period
    pub alert_interval: Duration,
    pub thresholds: AlertThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cache_window: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(3),
            alert_interval: Duration::from_secs(5),
            thresholds: AlertThresholds::default(),
        }
    }
}

/// Facade over cache, poller and alert engine
pub struct FleetTracker {
    config: TrackerConfig,
    cache: Arc<FleetCache>,
    poller: FleetPoller,
    alerts: Arc<AlertEngine>,
    events: EventBus,
}

impl FleetTracker {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        directory: Arc<RestaurantDirectory>,
        config: TrackerConfig,
    ) -> Self {
        let cache = Arc::new(FleetCache::new(
            source,
            directory,
            CacheConfig {
                window: config.cache_window,
                fetch_timeout: config.fetch_timeout,
            },
        ));
        let poller = FleetPoller::new(Arc::clone(&cache));
        let alerts = Arc::new(AlertEngine::new(
            Arc::clone(&cache),
            config.thresholds.clone(),
        ));

        Self {
            config,
            cache,
            poller,
            alerts,
            events: EventBus::default(),
        }
    }

    /// Start polling and alert evaluation; returns `false` if already tracking
    pub fn start_tracking(&self) -> bool {
        let polling = self.poller.start_polling(self.config.poll_interval);
        let alerting = self.alerts.start(self.config.alert_interval);
        if polling || alerting {
            info!(
                "Fleet tracking started (poll {:?}, alerts {:?})",
                self.config.poll_interval, self.config.alert_interval
            );
        }
        polling || alerting
    }

    /// Stop polling and alert evaluation; returns `false` if nothing was running
    pub async fn stop_tracking(&self) -> bool {
        let polling = self.poller.stop_polling().await;
        let alerting = self.alerts.stop().await;
        if polling || alerting {
            info!("Fleet tracking stopped");
        }
        polling || alerting
    }

    pub fn is_tracking(&self) -> bool {
        self.poller.is_polling()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FleetCache> {
        &self.cache
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn poll_count(&self) -> u64 {
        self.poller.tick_count()
    }

    pub async fn fetch_snapshot(&self) -> Arc<FleetSnapshot> {
        self.cache.fetch_snapshot().await
    }

    pub fn subscribe_fleet(&self) -> Subscription<FleetSnapshot> {
        self.cache.subscribe()
    }

    pub fn subscribe_alerts(&self) -> Subscription<Vec<Alert>> {
        self.alerts.subscribe()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.active_alerts()
    }

    pub fn drone_alerts(&self, drone_id: &DroneId) -> Vec<Alert> {
        self.alerts.drone_alerts(drone_id)
    }

    pub fn acknowledge_alert(&self, drone_id: &DroneId, alert_type: AlertType) -> bool {
        self.alerts.acknowledge(drone_id, alert_type)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.cache.last_update()
    }

    /// ISO-8601 time of the current snapshot, e.g. `2026-10-19T10:00:00.000Z`
    pub fn last_update_timestamp(&self) -> Option<String> {
        self.last_update()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    /// Report a new position to the backend, then show it locally
    pub async fn update_drone_position(
        &self,
        drone_id: &DroneId,
        position: Position,
    ) -> TrackerResult<()> {
        if self.cache.current().is_none() {
            self.cache.fetch_snapshot().await;
        }
        if self.cache.drone(drone_id).is_none() {
            return Err(TrackerError::DroneNotFound(drone_id.to_string()));
        }

        self.cache
            .source()
            .patch_drone(drone_id, &DronePatch::position(position))
            .await?;

        self.cache.update_drone(drone_id, |drone| {
            drone.position = Some(position);
            drone.last_update = Utc::now();
        });
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
