//! Operator interventions with an append-only audit trail
//!
//! The local state change is the authoritative action. Backend writes and
//! drone notifications are best-effort and only logged when they fail. Every
//! intervention is audited, including ones whose target no longer exists.

use chrono::Utc;
use fleet_core::{
    Actor, DroneId, DroneStatus, EmergencyAuditRecord, Event, OrderId, OrderStatus,
    OverrideCommand, RestaurantId, TargetType,
};
use fleet_source::{DroneNotice, DronePatch, NoticeBody, OrderPatch, RestaurantPatch};
use fleet_tracker::{EventBus, FleetCache};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ledger::AssignmentLedger;

/// Append-only list of audit records
#[derive(Default)]
pub struct AuditTrail {
    records: RwLock<Vec<EmergencyAuditRecord>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: EmergencyAuditRecord) {
        info!(
            target: "fleet_dispatch::audit",
            "AUDIT {} {} '{}' action='{}' by {} ({}) applied={}",
            record.target_type,
            record.target_id,
            record.target_name,
            record.action,
            record.actor_name,
            record.actor_id,
            record.applied
        );
        self.records.write().push(record);
    }

    pub fn records(&self) -> Vec<EmergencyAuditRecord> {
        self.records.read().clone()
    }

    pub fn for_target(&self, target_type: TargetType, target_id: &str) -> Vec<EmergencyAuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.target_type == target_type && r.target_id == target_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Generic operator override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideRequest {
    pub target_type: TargetType,
    pub target_id: String,
    pub target_name: String,
    pub command: OverrideCommand,
    /// Operator's wording, recorded verbatim
    pub action: String,
    #[serde(flatten)]
    pub actor: Actor,
}

/// Issues recall, emergency-land and override commands
pub struct EmergencyCommandService {
    cache: Arc<FleetCache>,
    ledger: Arc<AssignmentLedger>,
    events: EventBus,
    audit: AuditTrail,
}

impl EmergencyCommandService {
    pub fn new(cache: Arc<FleetCache>, ledger: Arc<AssignmentLedger>, events: EventBus) -> Self {
        Self {
            cache,
            ledger,
            events,
            audit: AuditTrail::new(),
        }
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Send a drone back to base; `false` if the drone is unknown
    pub async fn recall(&self, drone_id: &DroneId, actor: &Actor) -> bool {
        let applied = self
            .transition_drone(drone_id, DroneStatus::Returning, Some(DroneNotice::Recall), actor)
            .await;
        self.write_audit(
            TargetType::Drone,
            drone_id.as_str(),
            self.drone_name(drone_id),
            "recall",
            Some(OverrideCommand::Recall),
            actor,
            applied,
        );
        applied
    }

    /// Land a drone where it is; `false` if the drone is unknown
    pub async fn emergency_land(&self, drone_id: &DroneId, actor: &Actor) -> bool {
        let applied = self
            .transition_drone(
                drone_id,
                DroneStatus::Offline,
                Some(DroneNotice::EmergencyLand),
                actor,
            )
            .await;
        self.write_audit(
            TargetType::Drone,
            drone_id.as_str(),
            self.drone_name(drone_id),
            "emergency-land",
            Some(OverrideCommand::Stop),
            actor,
            applied,
        );
        applied
    }

    /// Apply a typed command to an order, restaurant or drone.
    ///
    /// The audit record is written whether or not the target was found.
    pub async fn perform_override(&self, request: &OverrideRequest) -> bool {
        let applied = match request.target_type {
            TargetType::Drone => {
                let drone_id = DroneId::new(request.target_id.as_str());
                let notice = match request.command {
                    OverrideCommand::Recall => Some(DroneNotice::Recall),
                    OverrideCommand::Stop => Some(DroneNotice::EmergencyLand),
                    _ => None,
                };
                self.transition_drone(&drone_id, request.command.drone_status(), notice, &request.actor)
                    .await
            }
            TargetType::Order => {
                self.override_order(&OrderId::new(request.target_id.as_str()), request)
                    .await
            }
            TargetType::Restaurant => {
                self.override_restaurant(&RestaurantId::new(request.target_id.as_str()), request)
                    .await
            }
        };

        self.write_audit(
            request.target_type,
            &request.target_id,
            request.target_name.clone(),
            &request.action,
            Some(request.command),
            &request.actor,
            applied,
        );
        applied
    }

    async fn transition_drone(
        &self,
        drone_id: &DroneId,
        status: DroneStatus,
        notice: Option<DroneNotice>,
        actor: &Actor,
    ) -> bool {
        if self.cache.current().is_none() {
            self.cache.fetch_snapshot().await;
        }

        let mut previous = None;
        let found = self.cache.update_drone(drone_id, |drone| {
            previous = Some(drone.status);
            drone.status = status;
        });
        if !found {
            warn!("Emergency command for unknown drone {}", drone_id);
            return false;
        }

        let source = self.cache.source();
        if let Err(e) = source.patch_drone(drone_id, &DronePatch::status(status)).await {
            warn!("Backend did not record status {} for drone {}: {}", status, drone_id, e);
        }

        if let Some(notice) = notice {
            let body = NoticeBody {
                timestamp: Utc::now(),
                admin_id: actor.actor_id.clone(),
                admin_name: actor.actor_name.clone(),
            };
            match source.notify_drone(drone_id, notice, &body).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!("{} endpoint not available for drone {}", notice.path(), drone_id)
                }
                Err(e) => warn!("{} notification to drone {} failed: {}", notice.path(), drone_id, e),
            }
        }

        if let Some(previous) = previous {
            self.events
                .publish(Event::drone_status_changed(drone_id.clone(), previous, status));
        }
        true
    }

    async fn override_order(&self, order_id: &OrderId, request: &OverrideRequest) -> bool {
        let source = self.cache.source();
        let known_to_backend = match source.fetch_order(order_id).await {
            Ok(order) => order.is_some(),
            Err(e) => {
                warn!("Could not look up order {}: {}", order_id, e);
                false
            }
        };
        let serving_drone = self.ledger.drone_for_order(order_id);

        if !known_to_backend && serving_drone.is_none() {
            warn!("Override for unknown order {}", order_id);
            return false;
        }

        if let Some(status) = request.command.order_status() {
            let patch = OrderPatch {
                status: Some(status),
                ..Default::default()
            };
            if let Err(e) = source.patch_order(order_id, &patch).await {
                warn!("Backend did not record status {} for order {}: {}", status, order_id, e);
            }
            if status == OrderStatus::Cancelled {
                self.ledger.release(order_id).await;
            }
        }

        if matches!(request.command, OverrideCommand::Recall | OverrideCommand::Maintenance) {
            if let Some(drone_id) = serving_drone {
                let notice = (request.command == OverrideCommand::Recall).then_some(DroneNotice::Recall);
                self.transition_drone(&drone_id, request.command.drone_status(), notice, &request.actor)
                    .await;
            }
        }

        true
    }

    async fn override_restaurant(&self, restaurant_id: &RestaurantId, request: &OverrideRequest) -> bool {
        let restaurant_id = self.cache.directory().canonical(restaurant_id.as_str());
        let mut applied = false;

        if let Some(is_active) = request.command.restaurant_active() {
            match self
                .cache
                .source()
                .patch_restaurant(&restaurant_id, &RestaurantPatch { is_active })
                .await
            {
                Ok(()) => applied = true,
                Err(e) => warn!("Backend did not record restaurant {} active={}: {}", restaurant_id, is_active, e),
            }
        }

        if matches!(request.command, OverrideCommand::Recall | OverrideCommand::Maintenance) {
            let snapshot = self.cache.fetch_snapshot().await;
            let drones: Vec<DroneId> = snapshot
                .drones_for_restaurant(&restaurant_id)
                .map(|d| d.id.clone())
                .collect();
            let notice = (request.command == OverrideCommand::Recall).then_some(DroneNotice::Recall);

            for drone_id in drones {
                applied |= self
                    .transition_drone(&drone_id, request.command.drone_status(), notice, &request.actor)
                    .await;
            }
        }

        applied
    }

    fn drone_name(&self, drone_id: &DroneId) -> String {
        match self.cache.drone(drone_id) {
            Some(drone) => format!("Drone {}", drone.code),
            None => format!("Drone {}", drone_id),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn write_audit(
        &self,
        target_type: TargetType,
        target_id: &str,
        target_name: String,
        action: &str,
        command: Option<OverrideCommand>,
        actor: &Actor,
        applied: bool,
    ) {
        let record = EmergencyAuditRecord {
            id: Uuid::new_v4(),
            target_type,
            target_id: target_id.to_string(),
            target_name,
            action: action.to_string(),
            command,
            actor_id: actor.actor_id.clone(),
            actor_name: actor.actor_name.clone(),
            applied,
            timestamp: Utc::now(),
        };
        self.audit.append(record.clone());
        self.events.publish(Event::emergency(record));
    }
}

// ============================================================================
// TESTS
// ============================================================================
