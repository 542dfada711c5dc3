//! # Fleet Source
//!
//! Access to the backend that owns drones, orders and restaurants.
//! The tracker and dispatcher only ever see the [`TelemetrySource`] trait;
//! [`HttpTelemetrySource`] talks to the real REST backend and
//! [`InMemoryTelemetrySource`] backs simulation mode and tests.

pub mod error;
pub mod http;
pub mod memory;
pub mod record;

pub use error::{SourceError, SourceResult};
pub use http::{HttpTelemetrySource, SourceConfig};
pub use memory::InMemoryTelemetrySource;
pub use record::{decode_fleet, DroneRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{DroneId, DroneStatus, Order, OrderId, OrderStatus, Position, RestaurantId};
use serde::{Deserialize, Serialize};

/// Remote provider of fleet and order state
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// `GET /drones`
    async fn fetch_drones(&self) -> SourceResult<Vec<DroneRecord>>;

    /// `GET /orders`
    async fn fetch_orders(&self) -> SourceResult<Vec<Order>>;

    /// `GET /orders/{id}`; `None` when the backend does not know the order
    async fn fetch_order(&self, id: &OrderId) -> SourceResult<Option<Order>>;

    /// `PATCH /drones/{id}` with a partial body
    async fn patch_drone(&self, id: &DroneId, patch: &DronePatch) -> SourceResult<()>;

    /// `PATCH /orders/{id}` with a partial body
    async fn patch_order(&self, id: &OrderId, patch: &OrderPatch) -> SourceResult<()>;

    /// `PATCH /restaurants/{id}` with a partial body
    async fn patch_restaurant(&self, id: &RestaurantId, patch: &RestaurantPatch)
        -> SourceResult<()>;

    /// `POST /drones/{id}/recall` or `POST /drones/{id}/emergency-land`
    async fn notify_drone(
        &self,
        id: &DroneId,
        notice: DroneNotice,
        body: &NoticeBody,
    ) -> SourceResult<()>;
}

// ============================================================================
// WRITE MODELS
// ============================================================================

/// Partial drone update; absent fields are left untouched by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DronePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<DroneStatus>,
    /// `Some(None)` clears the assignment and serializes as `null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Option<OrderId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
}

impl DronePatch {
    /// Bind the drone to an order and mark it delivering
    pub fn assign(order_id: OrderId) -> Self {
        Self {
            status: Some(DroneStatus::Delivering),
            order_id: Some(Some(order_id)),
            ..Default::default()
        }
    }

    /// Clear the drone's order and return it to service
    pub fn release() -> Self {
        Self {
            status: Some(DroneStatus::Active),
            order_id: Some(None),
            ..Default::default()
        }
    }

    pub fn status(status: DroneStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn position(position: Position) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }
}

/// Partial order update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drone_id: Option<Option<DroneId>>,
}

/// Partial restaurant update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantPatch {
    pub is_active: bool,
}

/// Best-effort notification sent to a drone endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DroneNotice {
    Recall,
    EmergencyLand,
}

impl DroneNotice {
    /// Path segment under `/drones/{id}/`
    pub fn path(&self) -> &'static str {
        match self {
            DroneNotice::Recall => "recall",
            DroneNotice::EmergencyLand => "emergency-land",
        }
    }
}

/// Body of a drone notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeBody {
    pub timestamp: DateTime<Utc>,
    pub admin_id: String,
    pub admin_name: String,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assign_patch_body() {
        let body = serde_json::to_value(DronePatch::assign(OrderId::new("o-1"))).unwrap();
        assert_eq!(body, json!({ "status": "delivering", "orderId": "o-1" }));
    }

    #[test]
    fn test_release_patch_sends_null_order() {
        let body = serde_json::to_value(DronePatch::release()).unwrap();
        assert_eq!(body, json!({ "status": "active", "orderId": null }));
    }

    #[test]
    fn test_status_patch_omits_order() {
        let body = serde_json::to_value(DronePatch::status(DroneStatus::Returning)).unwrap();
        assert_eq!(body, json!({ "status": "returning" }));
    }

    #[test]
    fn test_notice_paths() {
        assert_eq!(DroneNotice::Recall.path(), "recall");
        assert_eq!(DroneNotice::EmergencyLand.path(), "emergency-land");
    }
}
