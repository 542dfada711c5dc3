//! Threshold alerting over the cached fleet snapshot
//!
//! The engine keeps at most one alert per drone and alert type. Each
//! evaluation rebuilds the set from the current conditions: alerts whose
//! condition still holds keep their first-raised timestamp and acknowledged
//! flag with a refreshed severity, and alerts whose condition cleared are
//! dropped.

use chrono::{DateTime, Utc};
use fleet_core::{Alert, AlertSeverity, AlertType, Drone, DroneId, DroneStatus, FleetSnapshot};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::FleetCache;
use crate::hub::{Broadcaster, Subscription};
use crate::schedule::RecurringTask;

/// Alert trigger levels
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    /// Battery below this raises a medium alert
    pub battery_medium: u8,
    /// Battery below this raises a high alert
    pub battery_high: u8,
    pub silence_medium_secs: i64,
    pub silence_high_secs: i64,
    /// Delivering drones slower than this are considered stalled
    pub stall_speed_kmh: f64,
    pub maintenance_medium_days: f64,
    pub maintenance_high_days: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            battery_medium: 15,
            battery_high: 10,
            silence_medium_secs: 30,
            silence_high_secs: 60,
            stall_speed_kmh: 1.0,
            maintenance_medium_days: 30.0,
            maintenance_high_days: 60.0,
        }
    }
}

/// A condition found on one drone during evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
}

impl AlertThresholds {
    /// All conditions currently holding for a drone, in evaluation order
    pub fn conditions(&self, drone: &Drone, now: DateTime<Utc>) -> Vec<Condition> {
        let mut found = Vec::new();

        if drone.battery < self.battery_medium {
            let severity = if drone.battery < self.battery_high {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            found.push(Condition {
                alert_type: AlertType::BatteryLow,
                severity,
                message: format!("Battery low: {}%", drone.battery),
            });
        }

        let silent_for = drone.seconds_since_update(now);
        if drone.connection_status.is_degraded() && silent_for > self.silence_medium_secs {
            let severity = if silent_for > self.silence_high_secs {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            found.push(Condition {
                alert_type: AlertType::ConnectionLost,
                severity,
                message: format!("No signal for {}s", silent_for),
            });
        }

        if drone.status == DroneStatus::Delivering && drone.speed < self.stall_speed_kmh {
            found.push(Condition {
                alert_type: AlertType::Stall,
                severity: AlertSeverity::Medium,
                message: format!("Stalled while delivering ({:.1} km/h)", drone.speed),
            });
        }

        let days = drone.days_since_maintenance(now);
        if days > self.maintenance_medium_days {
            let severity = if days > self.maintenance_high_days {
                AlertSeverity::High
            } else {
                AlertSeverity::Medium
            };
            found.push(Condition {
                alert_type: AlertType::MaintenanceOverdue,
                severity,
                message: format!("Maintenance overdue: {} days", days.floor() as i64),
            });
        }

        found
    }
}

/// Owner of the live alert set
pub struct AlertEngine {
    cache: Arc<FleetCache>,
    thresholds: AlertThresholds,
    alerts: RwLock<Vec<Alert>>,
    hub: Broadcaster<Vec<Alert>>,
    task: RecurringTask,
}

impl AlertEngine {
    pub fn new(cache: Arc<FleetCache>, thresholds: AlertThresholds) -> Self {
        Self {
            cache,
            thresholds,
            alerts: RwLock::new(Vec::new()),
            hub: Broadcaster::new("alerts"),
            task: RecurringTask::new("alert engine"),
        }
    }

    /// Start periodic evaluation; a no-op returning `false` while running
    pub fn start(self: &Arc<Self>, interval: Duration) -> bool {
        let engine = Arc::downgrade(self);
        self.task.start(interval, move || {
            let engine = engine.clone();
            async move {
                if let Some(engine) = engine.upgrade() {
                    engine.tick().await;
                }
            }
        })
    }

    pub async fn stop(&self) -> bool {
        self.task.stop().await
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Evaluate whatever snapshot is cached, fetching only if there is none yet
    pub async fn tick(&self) {
        let snapshot = match self.cache.current() {
            Some(snapshot) => snapshot,
            None => self.cache.fetch_snapshot().await,
        };
        self.evaluate_at(&snapshot, Utc::now());
    }

    /// Rebuild the alert set from a snapshot and publish the active alerts
    pub fn evaluate_at(&self, snapshot: &FleetSnapshot, now: DateTime<Utc>) -> Vec<Alert> {
        let (raised, cleared) = {
            let mut alerts = self.alerts.write();
            let mut next = Vec::new();
            let mut raised = 0usize;

            for drone in &snapshot.drones {
                for condition in self.thresholds.conditions(drone, now) {
                    match alerts.iter().find(|a| a.is_for(&drone.id, condition.alert_type)) {
                        Some(existing) => {
                            let mut kept = existing.clone();
                            kept.severity = condition.severity;
                            kept.message = condition.message;
                            next.push(kept);
                        }
                        None => {
                            raised += 1;
                            next.push(Alert::new(
                                drone,
                                condition.alert_type,
                                condition.severity,
                                condition.message,
                                now,
                            ));
                        }
                    }
                }
            }

            let cleared = alerts.len() + raised - next.len();
            *alerts = next;
            (raised, cleared)
        };

        if raised > 0 || cleared > 0 {
            info!("Alerts evaluated: {} raised, {} cleared", raised, cleared);
        }

        let active = self.active_alerts();
        self.hub.publish(Arc::new(active.clone()));
        active
    }

    /// Mark an alert acknowledged; returns `false` if no such alert is live
    pub fn acknowledge(&self, drone_id: &DroneId, alert_type: AlertType) -> bool {
        let acknowledged = {
            let mut alerts = self.alerts.write();
            match alerts.iter_mut().find(|a| a.is_for(drone_id, alert_type)) {
                Some(alert) => {
                    alert.acknowledged = true;
                    true
                }
                None => false,
            }
        };

        if acknowledged {
            debug!("Alert {} acknowledged for drone {}", alert_type, drone_id);
            self.hub.publish(Arc::new(self.active_alerts()));
        }
        acknowledged
    }

    /// Live, unacknowledged alerts
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Live, unacknowledged alerts for one drone
    pub fn drone_alerts(&self, drone_id: &DroneId) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| !a.acknowledged && &a.drone_id == drone_id)
            .cloned()
            .collect()
    }

    /// Every live alert, acknowledged or not
    pub fn all_alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Subscribe to the active alert set; the current set is delivered at once
    pub fn subscribe(&self) -> Subscription<Vec<Alert>> {
        self.hub.subscribe()
    }
}

// ============================================================================
// TESTS
// ============================================================================
