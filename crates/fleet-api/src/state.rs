//! Application state management

use crate::config::ApiConfig;
use fleet_core::RestaurantDirectory;
use fleet_dispatch::{AssignmentLedger, EmergencyCommandService, OrderSplitter};
use fleet_source::{HttpTelemetrySource, InMemoryTelemetrySource, TelemetrySource};
use fleet_telemetry::MetricsCollector;
use fleet_tracker::FleetTracker;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: ApiConfig,
    /// Canonical restaurant ids
    pub directory: Arc<RestaurantDirectory>,
    /// Live fleet view, polling and alerting
    pub tracker: Arc<FleetTracker>,
    /// Order-to-drone assignments
    pub ledger: Arc<AssignmentLedger>,
    /// Recall, emergency landing and overrides
    pub emergency: Arc<EmergencyCommandService>,
    /// Checkout splitting
    pub splitter: Arc<OrderSplitter>,
    /// Prometheus metrics
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    /// Create application state, choosing the telemetry source from the config
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let source: Arc<dyn TelemetrySource> = if config.simulation_mode {
            info!("Simulation mode: serving the seeded demo fleet");
            Arc::new(InMemoryTelemetrySource::seeded_demo())
        } else {
            Arc::new(HttpTelemetrySource::new(config.source_config())?)
        };

        Self::with_source(config, source)
    }

    /// Create application state over an explicit telemetry source
    pub fn with_source(config: ApiConfig, source: Arc<dyn TelemetrySource>) -> anyhow::Result<Self> {
        let directory = Arc::new(RestaurantDirectory::storefront());

        let tracker = Arc::new(FleetTracker::new(
            source,
            Arc::clone(&directory),
            config.tracker_config(),
        ));
        let ledger = Arc::new(AssignmentLedger::new(
            Arc::clone(tracker.cache()),
            tracker.events().clone(),
        ));
        let emergency = Arc::new(EmergencyCommandService::new(
            Arc::clone(tracker.cache()),
            Arc::clone(&ledger),
            tracker.events().clone(),
        ));
        let splitter =
            Arc::new(OrderSplitter::new(Arc::clone(&directory)).with_tax_rate(config.tax_rate));
        let metrics = Arc::new(MetricsCollector::new()?);

        info!(
            "Application state initialized ({} restaurants)",
            directory.entries().len()
        );

        Ok(Self {
            config,
            directory,
            tracker,
            ledger,
            emergency,
            splitter,
            metrics,
        })
    }

    /// Keep fleet and alert gauges in step with the tracker's fan-out
    pub fn spawn_metrics_updater(&self) -> JoinHandle<()> {
        let state = self.clone();

        tokio::spawn(async move {
            let mut fleet = state.tracker.subscribe_fleet();
            let mut alerts = state.tracker.subscribe_alerts();

            loop {
                tokio::select! {
                    Some(snapshot) = fleet.recv() => {
                        state.metrics.update_fleet(&snapshot);
                        let cache = state.tracker.cache();
                        state
                            .metrics
                            .set_source_counts(cache.fetch_count(), cache.failure_count());
                    }
                    Some(current) = alerts.recv() => {
                        state.metrics.update_alerts(&current);
                    }
                    else => break,
                }
            }

            debug!("Metrics updater stopped");
        })
    }
}
