//! # Fleet Telemetry - Metrics & Observability
//!
//! Prometheus metrics exporter for the delivery fleet.
//! Provides real-time metrics for:
//! - Drone status, battery and health
//! - Live alerts
//! - Assignments and emergency interventions
//! - WebSocket connections and API requests

use fleet_core::{Alert, DroneStatus, FleetSnapshot};
use prometheus::{
    Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use thiserror::Error;
use tracing::{debug, info};

/// Metrics export errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Outcome label for assignment counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentOutcome {
    Assigned,
    NoDrone,
    Failed,
    Released,
}

impl AssignmentOutcome {
    fn label(&self) -> &'static str {
        match self {
            AssignmentOutcome::Assigned => "assigned",
            AssignmentOutcome::NoDrone => "no_drone",
            AssignmentOutcome::Failed => "failed",
            AssignmentOutcome::Released => "released",
        }
    }
}

const STATUSES: [DroneStatus; 5] = [
    DroneStatus::Active,
    DroneStatus::Delivering,
    DroneStatus::Maintenance,
    DroneStatus::Offline,
    DroneStatus::Returning,
];

/// Metrics collector for the delivery fleet
pub struct MetricsCollector {
    registry: Registry,

    // Fleet metrics
    drone_count: IntGauge,
    drones_by_status: IntGaugeVec,
    drone_battery: GaugeVec,
    drone_health: GaugeVec,
    drone_speed: GaugeVec,
    average_health: Gauge,
    degraded_links: IntGauge,
    assigned_drones: IntGauge,

    // Alert metrics
    alerts_active: IntGaugeVec,

    // Dispatch metrics
    assignments_total: IntCounterVec,
    emergency_actions_total: IntCounterVec,

    // Source metrics
    source_fetches: IntGauge,
    source_failures: IntGauge,

    // WebSocket metrics
    ws_connections: IntGauge,
    ws_messages_sent: IntCounterVec,

    // API metrics
    api_requests_total: IntCounterVec,
    api_request_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        // Fleet metrics
        let drone_count = IntGauge::new("fleet_drones_total", "Total number of drones in the fleet")?;
        registry.register(Box::new(drone_count.clone()))?;

        let drones_by_status = IntGaugeVec::new(
            Opts::new("fleet_drones_by_status", "Drones per operational status"),
            &["status"],
        )?;
        registry.register(Box::new(drones_by_status.clone()))?;

        let drone_battery = GaugeVec::new(
            Opts::new("fleet_drone_battery_percent", "Drone battery level"),
            &["drone_id"],
        )?;
        registry.register(Box::new(drone_battery.clone()))?;

        let drone_health = GaugeVec::new(
            Opts::new("fleet_drone_health_score", "Drone health score"),
            &["drone_id"],
        )?;
        registry.register(Box::new(drone_health.clone()))?;

        let drone_speed = GaugeVec::new(
            Opts::new("fleet_drone_speed_kmh", "Drone speed in km/h"),
            &["drone_id"],
        )?;
        registry.register(Box::new(drone_speed.clone()))?;

        let average_health = Gauge::new("fleet_average_health_score", "Mean health score of the fleet")?;
        registry.register(Box::new(average_health.clone()))?;

        let degraded_links = IntGauge::new(
            "fleet_degraded_links",
            "Drones with lost signal or disconnected",
        )?;
        registry.register(Box::new(degraded_links.clone()))?;

        let assigned_drones = IntGauge::new("fleet_assigned_drones", "Drones currently serving an order")?;
        registry.register(Box::new(assigned_drones.clone()))?;

        // Alert metrics
        let alerts_active = IntGaugeVec::new(
            Opts::new("fleet_alerts_active", "Unacknowledged live alerts"),
            &["type", "severity"],
        )?;
        registry.register(Box::new(alerts_active.clone()))?;

        // Dispatch metrics
        let assignments_total = IntCounterVec::new(
            Opts::new("fleet_assignments_total", "Assignment ledger operations"),
            &["outcome"],
        )?;
        registry.register(Box::new(assignments_total.clone()))?;

        let emergency_actions_total = IntCounterVec::new(
            Opts::new("fleet_emergency_actions_total", "Audited emergency interventions"),
            &["target", "applied"],
        )?;
        registry.register(Box::new(emergency_actions_total.clone()))?;

        // Source metrics
        let source_fetches = IntGauge::new("fleet_source_fetches", "Telemetry fetches attempted")?;
        registry.register(Box::new(source_fetches.clone()))?;

        let source_failures = IntGauge::new("fleet_source_failures", "Telemetry fetches that failed")?;
        registry.register(Box::new(source_failures.clone()))?;

        // WebSocket metrics
        let ws_connections = IntGauge::new("fleet_ws_connections", "Active WebSocket connections")?;
        registry.register(Box::new(ws_connections.clone()))?;

        let ws_messages_sent = IntCounterVec::new(
            Opts::new("fleet_ws_messages_sent_total", "WebSocket messages sent"),
            &["kind"],
        )?;
        registry.register(Box::new(ws_messages_sent.clone()))?;

        // API metrics
        let api_requests_total = IntCounterVec::new(
            Opts::new("fleet_api_requests_total", "API requests"),
            &["method", "path", "status"],
        )?;
        registry.register(Box::new(api_requests_total.clone()))?;

        let api_request_duration = HistogramVec::new(
            HistogramOpts::new("fleet_api_request_duration_seconds", "API request duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method", "path"],
        )?;
        registry.register(Box::new(api_request_duration.clone()))?;

        info!("Metrics collector initialized");

        Ok(Self {
            registry,
            drone_count,
            drones_by_status,
            drone_battery,
            drone_health,
            drone_speed,
            average_health,
            degraded_links,
            assigned_drones,
            alerts_active,
            assignments_total,
            emergency_actions_total,
            source_fetches,
            source_failures,
            ws_connections,
            ws_messages_sent,
            api_requests_total,
            api_request_duration,
        })
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> TelemetryResult<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    // ========================================================================
    // FLEET METRICS
    // ========================================================================

    /// Replace every fleet gauge with the values of a snapshot
    pub fn update_fleet(&self, snapshot: &FleetSnapshot) {
        let stats = snapshot.stats();

        self.drone_count.set(stats.drone_count as i64);
        self.assigned_drones.set(stats.assigned as i64);
        self.average_health.set(stats.average_health);

        for status in STATUSES {
            let count = match status {
                DroneStatus::Active => stats.active,
                DroneStatus::Delivering => stats.delivering,
                DroneStatus::Maintenance => stats.maintenance,
                DroneStatus::Offline => stats.offline,
                DroneStatus::Returning => stats.returning,
            };
            self.drones_by_status
                .with_label_values(&[&status.to_string()])
                .set(count as i64);
        }

        // Drones that left the fleet must not linger as stale series
        self.drone_battery.reset();
        self.drone_health.reset();
        self.drone_speed.reset();

        let mut degraded = 0;
        for drone in &snapshot.drones {
            let id = drone.id.as_str();
            self.drone_battery
                .with_label_values(&[id])
                .set(f64::from(drone.battery));
            self.drone_health
                .with_label_values(&[id])
                .set(f64::from(drone.health_score));
            self.drone_speed.with_label_values(&[id]).set(drone.speed);

            if drone.connection_status.is_degraded() {
                degraded += 1;
            }
        }
        self.degraded_links.set(degraded);

        debug!("Fleet metrics updated for {} drones", stats.drone_count);
    }

    /// Record the cache's fetch counters
    pub fn set_source_counts(&self, fetches: u64, failures: u64) {
        self.source_fetches.set(fetches as i64);
        self.source_failures.set(failures as i64);
    }

    // ========================================================================
    // ALERT METRICS
    // ========================================================================

    /// Replace the live alert gauges
    pub fn update_alerts(&self, alerts: &[Alert]) {
        self.alerts_active.reset();

        for alert in alerts.iter().filter(|a| !a.acknowledged) {
            self.alerts_active
                .with_label_values(&[alert.alert_type.as_str(), &alert.severity.to_string()])
                .inc();
        }
    }

    // ========================================================================
    // DISPATCH METRICS
    // ========================================================================

    pub fn record_assignment(&self, outcome: AssignmentOutcome) {
        self.assignments_total
            .with_label_values(&[outcome.label()])
            .inc();
    }

    pub fn record_emergency(&self, target: &str, applied: bool) {
        self.emergency_actions_total
            .with_label_values(&[target, if applied { "true" } else { "false" }])
            .inc();
    }

    // ========================================================================
    // WEBSOCKET METRICS
    // ========================================================================

    pub fn ws_connected(&self) {
        self.ws_connections.inc();
    }

    pub fn ws_disconnected(&self) {
        self.ws_connections.dec();
    }

    /// Record WebSocket message sent
    pub fn record_ws_sent(&self, kind: &str) {
        self.ws_messages_sent.with_label_values(&[kind]).inc();
    }

    // ========================================================================
    // API METRICS
    // ========================================================================

    /// Record API request
    pub fn record_api_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.api_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.api_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_core::{AlertSeverity, AlertType, ConnectionStatus, Drone, OrderId};

    fn drone(id: &str, status: DroneStatus, battery: i64) -> Drone {
        let mut drone = Drone::new(id);
        drone.status = status;
        drone.set_battery(battery);
        drone.refresh_health();
        drone
    }

    #[test]
    fn test_metrics_creation() {
        let metrics = MetricsCollector::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_fleet_metrics_export() {
        let metrics = MetricsCollector::new().unwrap();

        let mut busy = drone("DRN-SD-02", DroneStatus::Delivering, 64);
        busy.order_id = Some(OrderId::new("1700000000000-1"));
        busy.connection_status = ConnectionStatus::LostSignal;
        let snapshot = FleetSnapshot::new(vec![
            drone("DRN-SD-01", DroneStatus::Active, 92),
            busy,
            drone("DRN-AK-02", DroneStatus::Maintenance, 12),
        ]);

        metrics.update_fleet(&snapshot);
        let export = metrics.export().unwrap();

        assert!(export.contains("fleet_drones_total 3"));
        assert!(export.contains("fleet_assigned_drones 1"));
        assert!(export.contains("fleet_degraded_links 1"));
        assert!(export.contains(r#"fleet_drones_by_status{status="maintenance"} 1"#));
        assert!(export.contains("DRN-SD-02"));
    }

    #[test]
    fn test_departed_drones_are_cleared() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.update_fleet(&FleetSnapshot::new(vec![drone("GONE-01", DroneStatus::Active, 50)]));
        metrics.update_fleet(&FleetSnapshot::new(vec![drone("KEPT-01", DroneStatus::Active, 50)]));

        let export = metrics.export().unwrap();
        assert!(!export.contains("GONE-01"));
        assert!(export.contains("KEPT-01"));
    }

    #[test]
    fn test_alert_metrics_skip_acknowledged() {
        let metrics = MetricsCollector::new().unwrap();
        let low = drone("DRN-AK-02", DroneStatus::Active, 5);

        let live = Alert::new(&low, AlertType::BatteryLow, AlertSeverity::High, "low", Utc::now());
        let mut acked = Alert::new(&low, AlertType::Stall, AlertSeverity::Medium, "stall", Utc::now());
        acked.acknowledged = true;

        metrics.update_alerts(&[live, acked]);
        let export = metrics.export().unwrap();

        assert!(export.contains(r#"fleet_alerts_active{severity="high",type="battery_low"} 1"#));
        assert!(!export.contains(r#"type="stall""#));
    }

    #[test]
    fn test_dispatch_counters() {
        let metrics = MetricsCollector::new().unwrap();

        metrics.record_assignment(AssignmentOutcome::Assigned);
        metrics.record_assignment(AssignmentOutcome::Assigned);
        metrics.record_assignment(AssignmentOutcome::NoDrone);
        metrics.record_emergency("drone", true);

        let export = metrics.export().unwrap();
        assert!(export.contains(r#"fleet_assignments_total{outcome="assigned"} 2"#));
        assert!(export.contains(r#"fleet_assignments_total{outcome="no_drone"} 1"#));
        assert!(export.contains(r#"fleet_emergency_actions_total{applied="true",target="drone"} 1"#));
    }
}
