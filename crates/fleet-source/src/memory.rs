//! In-memory telemetry source for simulation mode and tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use fleet_core::{
    DroneId, DroneStatus, Order, OrderId, OrderItem, OrderStatus, Position, RestaurantId,
};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::{
    DroneNotice, DronePatch, DroneRecord, NoticeBody, OrderPatch, RestaurantPatch, SourceError,
    SourceResult, TelemetrySource,
};

/// Backend stand-in holding drones, orders and restaurant flags in memory
#[derive(Default)]
pub struct InMemoryTelemetrySource {
    drones: RwLock<Vec<DroneRecord>>,
    orders: RwLock<Vec<Order>>,
    restaurants: RwLock<HashMap<RestaurantId, bool>>,
    drone_patches: Mutex<Vec<(DroneId, DronePatch)>>,
    notices: Mutex<Vec<(DroneId, DroneNotice)>>,
    latency: Mutex<Option<Duration>>,
    fetch_count: AtomicUsize,
    failing: AtomicBool,
    reject_writes: AtomicBool,
    notices_unsupported: AtomicBool,
    live_clock: AtomicBool,
}

impl InMemoryTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drones(drones: Vec<DroneRecord>) -> Self {
        let source = Self::new();
        *source.drones.write() = drones;
        source
    }

    /// Demo fleet for the two storefront restaurants, reporting as if live
    pub fn seeded_demo() -> Self {
        let now = Utc::now();
        let mut drones = Vec::new();

        let fleet: [(&str, &str, i64, u32, DroneStatus, (f64, f64)); 6] = [
            ("DRN-SD-01", "rest_2", 92, 210, DroneStatus::Active, (10.7769, 106.7009)),
            ("DRN-SD-02", "rest_2", 64, 150, DroneStatus::Active, (10.7781, 106.6990)),
            ("DRN-SD-03", "rest_2", 18, 95, DroneStatus::Active, (10.7755, 106.7021)),
            ("DRN-AK-01", "restaurant_2", 88, 240, DroneStatus::Active, (10.7626, 106.6602)),
            ("DRN-AK-02", "restaurant_2", 12, 180, DroneStatus::Maintenance, (10.7631, 106.6615)),
            ("DRN-AK-03", "restaurant_2", 71, 60, DroneStatus::Active, (10.7640, 106.6588)),
        ];

        for (id, restaurant, battery, missions, status, (lat, lng)) in fleet {
            let mut record = DroneRecord::new(id);
            record.code = Some(id.trim_start_matches("DRN-").to_string());
            record.battery = Some(battery);
            record.missions_completed = Some(missions);
            record.status = Some(status);
            record.restaurant_id = Some(restaurant.to_string());
            record.position = Some(Position::new(lat, lng));
            record.last_maintenance = Some(now - ChronoDuration::days(i64::from(missions % 45)));
            record.updated_at = Some(now);
            drones.push(record);
        }

        let mut order = Order::new(
            OrderId::new(format!("{}-1", now.timestamp_millis())),
            RestaurantId::new("rest_2"),
            now,
        );
        order.items = vec![OrderItem {
            name: "Strawberry Cheesecake".to_string(),
            qty: 2,
            price: Decimal::from(25_000),
        }];
        order.total = Decimal::from(79_000);
        order.status = OrderStatus::Confirmed;
        order.name = "Demo Customer".to_string();
        order.phone = "0900000000".to_string();
        order.address = "1 Nguyen Hue, District 1".to_string();
        order.payment_status = "pending".to_string();

        let source = Self::with_drones(drones);
        *source.orders.write() = vec![order];
        source.live_clock.store(true, Ordering::SeqCst);
        source
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        *self.orders.write() = orders;
    }

    pub fn upsert_drone(&self, record: DroneRecord) {
        let mut drones = self.drones.write();
        match drones.iter_mut().find(|d| d.id == record.id) {
            Some(existing) => *existing = record,
            None => drones.push(record),
        }
    }

    pub fn drone(&self, id: &DroneId) -> Option<DroneRecord> {
        self.drones
            .read()
            .iter()
            .find(|d| d.id.as_deref() == Some(id.as_str()))
            .cloned()
    }

    pub fn order(&self, id: &OrderId) -> Option<Order> {
        self.orders.read().iter().find(|o| &o.id == id).cloned()
    }

    pub fn restaurant_active(&self, id: &RestaurantId) -> Option<bool> {
        self.restaurants.read().get(id).copied()
    }

    /// Make every call fail as if the backend were down
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make writes fail while reads keep working
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Answer notifications with 404, like a backend without those endpoints
    pub fn set_notices_unsupported(&self, unsupported: bool) {
        self.notices_unsupported.store(unsupported, Ordering::SeqCst);
    }

    /// Delay every fetch, used to exercise timeouts and overlapping ticks
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn drone_patches(&self) -> Vec<(DroneId, DronePatch)> {
        self.drone_patches.lock().clone()
    }

    pub fn notices(&self) -> Vec<(DroneId, DroneNotice)> {
        self.notices.lock().clone()
    }

    fn ensure_up(&self) -> SourceResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SourceError::unavailable("in-memory source set to fail"))
        } else {
            Ok(())
        }
    }

    fn ensure_writable(&self) -> SourceResult<()> {
        self.ensure_up()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            Err(SourceError::Status {
                status: 500,
                url: "memory://write".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn not_found(path: String) -> SourceError {
    SourceError::Status {
        status: 404,
        url: format!("memory://{}", path),
    }
}

#[async_trait]
impl TelemetrySource for InMemoryTelemetrySource {
    async fn fetch_drones(&self) -> SourceResult<Vec<DroneRecord>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.ensure_up()?;

        if self.live_clock.load(Ordering::SeqCst) {
            let now = Utc::now();
            for record in self.drones.write().iter_mut() {
                if record.status != Some(DroneStatus::Offline) {
                    record.updated_at = Some(now);
                }
            }
        }

        Ok(self.drones.read().clone())
    }

    async fn fetch_orders(&self) -> SourceResult<Vec<Order>> {
        self.ensure_up()?;
        Ok(self.orders.read().clone())
    }

    async fn fetch_order(&self, id: &OrderId) -> SourceResult<Option<Order>> {
        self.ensure_up()?;
        Ok(self.order(id))
    }

    async fn patch_drone(&self, id: &DroneId, patch: &DronePatch) -> SourceResult<()> {
        self.ensure_writable()?;

        {
            let mut drones = self.drones.write();
            let record = drones
                .iter_mut()
                .find(|d| d.id.as_deref() == Some(id.as_str()))
                .ok_or_else(|| not_found(format!("drones/{}", id)))?;

            if let Some(status) = patch.status {
                record.status = Some(status);
            }
            if let Some(order_id) = &patch.order_id {
                record.order_id = order_id.as_ref().map(OrderId::to_string);
            }
            if let Some(position) = patch.position {
                record.position = Some(position);
            }
            if let Some(battery) = patch.battery {
                record.battery = Some(i64::from(battery));
            }
            record.updated_at = Some(Utc::now());
        }

        debug!("Patched drone {}: {:?}", id, patch);
        self.drone_patches.lock().push((id.clone(), patch.clone()));
        Ok(())
    }

    async fn patch_order(&self, id: &OrderId, patch: &OrderPatch) -> SourceResult<()> {
        self.ensure_writable()?;

        let mut orders = self.orders.write();
        let order = orders
            .iter_mut()
            .find(|o| &o.id == id)
            .ok_or_else(|| not_found(format!("orders/{}", id)))?;

        if let Some(status) = patch.status {
            order.status = status;
        }
        if let Some(drone_id) = &patch.drone_id {
            order.drone_id = drone_id.clone();
        }
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn patch_restaurant(
        &self,
        id: &RestaurantId,
        patch: &RestaurantPatch,
    ) -> SourceResult<()> {
        self.ensure_writable()?;
        self.restaurants.write().insert(id.clone(), patch.is_active);
        Ok(())
    }

    async fn notify_drone(
        &self,
        id: &DroneId,
        notice: DroneNotice,
        _body: &NoticeBody,
    ) -> SourceResult<()> {
        self.ensure_up()?;
        if self.notices_unsupported.load(Ordering::SeqCst) {
            return Err(not_found(format!("drones/{}/{}", id, notice.path())));
        }
        self.notices.lock().push((id.clone(), notice));
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_applies_to_record() {
        let source = InMemoryTelemetrySource::with_drones(vec![DroneRecord::new("A")]);
        let id = DroneId::new("A");

        source
            .patch_drone(&id, &DronePatch::assign(OrderId::new("o-1")))
            .await
            .unwrap();
        let record = source.drone(&id).unwrap();
        assert_eq!(record.order_id.as_deref(), Some("o-1"));
        assert_eq!(record.status, Some(DroneStatus::Delivering));

        source.patch_drone(&id, &DronePatch::release()).await.unwrap();
        let record = source.drone(&id).unwrap();
        assert_eq!(record.order_id, None);
        assert_eq!(record.status, Some(DroneStatus::Active));
    }

    #[tokio::test]
    async fn test_patch_unknown_drone_is_not_found() {
        let source = InMemoryTelemetrySource::new();
        let err = source
            .patch_drone(&DroneId::new("ghost"), &DronePatch::release())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failing_source() {
        let source = InMemoryTelemetrySource::seeded_demo();
        assert_eq!(source.fetch_drones().await.unwrap().len(), 6);

        source.set_failing(true);
        assert!(source.fetch_drones().await.is_err());
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_notices() {
        let source = InMemoryTelemetrySource::seeded_demo();
        source.set_notices_unsupported(true);

        let body = NoticeBody {
            timestamp: Utc::now(),
            admin_id: "admin-1".to_string(),
            admin_name: "Ops".to_string(),
        };
        let err = source
            .notify_drone(&DroneId::new("DRN-SD-01"), DroneNotice::Recall, &body)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(source.notices().is_empty());
    }
}
