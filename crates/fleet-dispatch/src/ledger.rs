//! Authoritative order-to-drone mapping
//!
//! The ledger keeps the mapping injective in both directions: a drone serves
//! at most one order and an order is served by at most one drone. Selection
//! and write-back run under one lock so two concurrent assignments can never
//! pick the same idle drone.

use chrono::{DateTime, Utc};
use fleet_core::{Drone, DroneId, DroneStatus, Event, FleetSnapshot, Order, OrderId, RestaurantId};
use fleet_source::{DronePatch, OrderPatch};
use fleet_tracker::{EventBus, FleetCache};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, DispatchResult};

/// Drones at or below this battery level are never assigned
pub const MIN_ASSIGN_BATTERY: u8 = 20;

/// Outcome of a linkage check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Validation {
    Valid,
    Invalid(InvalidReason),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

/// Why an order/drone pair does not match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidReason {
    DroneNotFound { drone_id: DroneId },
    NotAssigned { drone_id: DroneId },
    AssignedToOtherOrder { drone_id: DroneId, order_id: OrderId },
}

#[derive(Default)]
struct Links {
    by_order: HashMap<OrderId, DroneId>,
    by_drone: HashMap<DroneId, OrderId>,
    /// Released pairs the backend may still report, kept until a snapshot
    /// requested after the release shows the drone without that order
    released: HashMap<OrderId, ReleasedLink>,
}

struct ReleasedLink {
    drone_id: DroneId,
    released_at: DateTime<Utc>,
}

impl Links {
    fn link(&mut self, order_id: OrderId, drone_id: DroneId) {
        self.released.remove(&order_id);
        self.by_drone.insert(drone_id.clone(), order_id.clone());
        self.by_order.insert(order_id, drone_id);
    }

    fn unlink_order(&mut self, order_id: &OrderId) -> Option<DroneId> {
        let drone_id = self.by_order.remove(order_id)?;
        self.by_drone.remove(&drone_id);
        Some(drone_id)
    }

    fn is_released(&self, order_id: &OrderId, drone_id: &DroneId) -> bool {
        self.released
            .get(order_id)
            .is_some_and(|released| &released.drone_id == drone_id)
    }
}

/// Owner of the order-to-drone mapping
pub struct AssignmentLedger {
    cache: Arc<FleetCache>,
    events: EventBus,
    links: RwLock<Links>,
    /// Serializes selection and write-back
    write_lock: Mutex<()>,
}

impl AssignmentLedger {
    pub fn new(cache: Arc<FleetCache>, events: EventBus) -> Self {
        Self {
            cache,
            events,
            links: RwLock::new(Links::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// Bind an order to the first eligible drone of its restaurant.
    ///
    /// Eligible means: owned by the restaurant, carrying no order (per the
    /// ledger and per the backend), active or delivering, and battery above
    /// [`MIN_ASSIGN_BATTERY`]. Assigning an order that already has a drone
    /// returns that drone.
    pub async fn assign(
        &self,
        order_id: &OrderId,
        restaurant_id: &RestaurantId,
    ) -> DispatchResult<DroneId> {
        let _guard = self.write_lock.lock().await;

        let mut snapshot = self.cache.fetch_snapshot().await;
        self.reconcile(&snapshot);
        if self.retry_releases(&snapshot).await > 0 {
            if let Some(current) = self.cache.current() {
                snapshot = current;
            }
        }

        if let Some(existing) = self.drone_for_order(order_id) {
            debug!("Order {} already served by drone {}", order_id, existing);
            return Ok(existing);
        }

        let restaurant_id = self.cache.directory().canonical(restaurant_id.as_str());
        let drone_id = {
            let links = self.links.read();
            snapshot
                .drones
                .iter()
                .find(|d| is_eligible(d, &restaurant_id) && !links.by_drone.contains_key(&d.id))
                .map(|d| d.id.clone())
        };

        let Some(drone_id) = drone_id else {
            warn!(
                "No available drone for order {} at restaurant {}",
                order_id, restaurant_id
            );
            return Err(DispatchError::NoAvailableDrone {
                order_id: order_id.clone(),
                restaurant_id,
            });
        };

        self.links.write().link(order_id.clone(), drone_id.clone());

        let source = self.cache.source();
        if let Err(e) = source
            .patch_drone(&drone_id, &DronePatch::assign(order_id.clone()))
            .await
        {
            self.links.write().unlink_order(order_id);
            warn!(
                "Assignment of drone {} to order {} rolled back: {}",
                drone_id, order_id, e
            );
            return Err(DispatchError::WriteBack(e));
        }

        self.cache.update_drone(&drone_id, |drone| {
            drone.order_id = Some(order_id.clone());
            drone.status = DroneStatus::Delivering;
        });

        let mirror = OrderPatch {
            drone_id: Some(Some(drone_id.clone())),
            ..Default::default()
        };
        if let Err(e) = source.patch_order(order_id, &mirror).await {
            debug!("Could not mirror drone onto order {}: {}", order_id, e);
        }

        info!("Assigned drone {} to order {}", drone_id, order_id);
        self.events
            .publish(Event::drone_assigned(order_id.clone(), drone_id.clone()));
        Ok(drone_id)
    }

    /// Free the drone serving an order; `false` if no drone serves it.
    ///
    /// The pair is remembered as released until a snapshot shows the drone
    /// without the order, so a stale backend record is never adopted again.
    pub async fn release(&self, order_id: &OrderId) -> bool {
        let _guard = self.write_lock.lock().await;

        let unlinked = self.links.write().unlink_order(order_id);
        let drone_id = match unlinked {
            Some(drone_id) => drone_id,
            None => {
                let snapshot = self.cache.fetch_snapshot().await;
                let reported = snapshot
                    .drone_for_order(order_id)
                    .map(|drone| drone.id.clone())
                    .filter(|drone_id| !self.links.read().is_released(order_id, drone_id));
                match reported {
                    Some(drone_id) => drone_id,
                    None => {
                        debug!("Release of order {}: no drone assigned", order_id);
                        return false;
                    }
                }
            }
        };

        self.links.write().released.insert(
            order_id.clone(),
            ReleasedLink {
                drone_id: drone_id.clone(),
                released_at: Utc::now(),
            },
        );

        let source = self.cache.source();
        if let Err(e) = source.patch_drone(&drone_id, &DronePatch::release()).await {
            warn!(
                "Backend did not record release of drone {}, will retry: {}",
                drone_id, e
            );
        }

        self.cache.update_drone(&drone_id, |drone| {
            drone.order_id = None;
            drone.status = DroneStatus::Active;
        });

        let mirror = OrderPatch {
            drone_id: Some(None),
            ..Default::default()
        };
        if let Err(e) = source.patch_order(order_id, &mirror).await {
            debug!("Could not clear drone on order {}: {}", order_id, e);
        }

        info!("Released drone {} from order {}", drone_id, order_id);
        self.events
            .publish(Event::drone_released(order_id.clone(), drone_id));
        true
    }

    /// Check that `drone_id` exists and serves `order_id`. Never mutates.
    pub async fn validate(&self, order_id: &OrderId, drone_id: &DroneId) -> Validation {
        let snapshot = match self.cache.current() {
            Some(snapshot) => snapshot,
            None => self.cache.fetch_snapshot().await,
        };

        let Some(drone) = snapshot.drone(drone_id) else {
            return Validation::Invalid(InvalidReason::DroneNotFound {
                drone_id: drone_id.clone(),
            });
        };

        let serving = {
            let links = self.links.read();
            links.by_drone.get(drone_id).cloned().or_else(|| {
                drone
                    .order_id
                    .clone()
                    .filter(|reported| !links.is_released(reported, drone_id))
            })
        };

        match serving {
            Some(serving) if &serving == order_id => Validation::Valid,
            Some(serving) => Validation::Invalid(InvalidReason::AssignedToOtherOrder {
                drone_id: drone_id.clone(),
                order_id: serving,
            }),
            None => Validation::Invalid(InvalidReason::NotAssigned {
                drone_id: drone_id.clone(),
            }),
        }
    }

    /// Adopt order links reported by the backend that the ledger does not
    /// know yet, skipping released pairs and any link that would break
    /// injectivity. Returns the number adopted.
    pub fn reconcile(&self, snapshot: &FleetSnapshot) -> usize {
        let mut links = self.links.write();
        let mut adopted = 0;

        // Only a view requested after the release can confirm it.
        links.released.retain(|order_id, released| {
            let reported = snapshot.drone(&released.drone_id).map(|d| d.order_id.as_ref());
            match reported {
                Some(Some(reported)) => reported == order_id,
                Some(None) | None => snapshot.fetched_at <= released.released_at,
            }
        });

        for drone in &snapshot.drones {
            let Some(order_id) = &drone.order_id else {
                continue;
            };
            if links.is_released(order_id, &drone.id)
                || links.by_drone.contains_key(&drone.id)
                || links.by_order.contains_key(order_id)
            {
                continue;
            }
            links.link(order_id.clone(), drone.id.clone());
            adopted += 1;
        }

        if adopted > 0 {
            debug!("Adopted {} backend assignments", adopted);
        }
        adopted
    }

    /// Resend the release write for released pairs the snapshot still
    /// reports. Returns the number the backend accepted.
    async fn retry_releases(&self, snapshot: &FleetSnapshot) -> usize {
        let pending: Vec<DroneId> = {
            let links = self.links.read();
            links
                .released
                .iter()
                .filter(|(order_id, released)| {
                    snapshot
                        .drone(&released.drone_id)
                        .is_some_and(|d| d.order_id.as_ref() == Some(*order_id))
                })
                .map(|(_, released)| released.drone_id.clone())
                .collect()
        };

        let source = self.cache.source();
        let mut confirmed = 0;
        for drone_id in pending {
            match source.patch_drone(&drone_id, &DronePatch::release()).await {
                Ok(()) => {
                    self.cache.update_drone(&drone_id, |drone| {
                        drone.order_id = None;
                        drone.status = DroneStatus::Active;
                    });
                    confirmed += 1;
                }
                Err(e) => debug!("Release of drone {} still pending: {}", drone_id, e),
            }
        }
        confirmed
    }

    /// Released pairs not yet confirmed by a snapshot
    pub fn pending_release_count(&self) -> usize {
        self.links.read().released.len()
    }

    /// Mirror the ledger's drone onto fetched orders
    pub fn annotate_orders(&self, orders: &mut [Order]) {
        let links = self.links.read();
        for order in orders.iter_mut() {
            if let Some(drone_id) = links.by_order.get(&order.id) {
                order.drone_id = Some(drone_id.clone());
            }
        }
    }

    pub fn drone_for_order(&self, order_id: &OrderId) -> Option<DroneId> {
        self.links.read().by_order.get(order_id).cloned()
    }

    pub fn order_for_drone(&self, drone_id: &DroneId) -> Option<OrderId> {
        self.links.read().by_drone.get(drone_id).cloned()
    }

    pub fn assignments(&self) -> Vec<(OrderId, DroneId)> {
        self.links
            .read()
            .by_order
            .iter()
            .map(|(o, d)| (o.clone(), d.clone()))
            .collect()
    }

    pub fn assignment_count(&self) -> usize {
        self.links.read().by_order.len()
    }
}

fn is_eligible(drone: &Drone, restaurant_id: &RestaurantId) -> bool {
    drone.belongs_to(restaurant_id)
        && !drone.is_assigned()
        && drone.status.accepts_orders()
        && drone.battery > MIN_ASSIGN_BATTERY
}

// ============================================================================
// TESTS
// ============================================================================
