//! Event types for the delivery fleet
//!
//! These events are pushed to dashboard clients over the stream endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Alert, DroneId, DroneStatus, EmergencyAuditRecord, FleetSnapshot, OrderId};

/// Event envelope for fleet events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            payload,
        }
    }

    pub fn drone_assigned(order_id: OrderId, drone_id: DroneId) -> Self {
        Self::new(
            EventType::DroneAssigned,
            EventPayload::Assignment(AssignmentEvent { order_id, drone_id }),
        )
    }

    pub fn drone_released(order_id: OrderId, drone_id: DroneId) -> Self {
        Self::new(
            EventType::DroneReleased,
            EventPayload::Assignment(AssignmentEvent { order_id, drone_id }),
        )
    }

    pub fn drone_status_changed(
        drone_id: DroneId,
        old_status: DroneStatus,
        new_status: DroneStatus,
    ) -> Self {
        Self::new(
            EventType::DroneStatusChanged,
            EventPayload::DroneStatus(DroneStatusEvent {
                drone_id,
                old_status,
                new_status,
            }),
        )
    }

    pub fn emergency(record: EmergencyAuditRecord) -> Self {
        Self::new(EventType::EmergencyAction, EventPayload::Audit(record))
    }
}

/// Type of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    DroneAssigned,
    DroneReleased,
    DroneStatusChanged,
    EmergencyAction,
}

/// Event payload variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    Assignment(AssignmentEvent),
    DroneStatus(DroneStatusEvent),
    Audit(EmergencyAuditRecord),
}

/// Order-to-drone binding change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    pub order_id: OrderId,
    pub drone_id: DroneId,
}

/// Drone status change
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneStatusEvent {
    pub drone_id: DroneId,
    pub old_status: DroneStatus,
    pub new_status: DroneStatus,
}

// ============================================================================
// STREAM MESSAGE TYPES
// ============================================================================

/// Message sent from server to a stream client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Latest fleet snapshot, also sent on connect
    FleetSnapshot(FleetSnapshot),
    /// Current unacknowledged alerts
    Alerts(Vec<Alert>),
    /// Dispatch or emergency event
    Event(Event),
    /// Error message
    Error { code: String, message: String },
    /// Heartbeat
    Ping { timestamp: i64 },
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::drone_status_changed(
            DroneId::new("DRN-001"),
            DroneStatus::Delivering,
            DroneStatus::Returning,
        );

        assert_eq!(event.event_type, EventType::DroneStatusChanged);
    }

    #[test]
    fn test_assignment_event_serialization() {
        let event = Event::drone_assigned(OrderId::new("o-1"), DroneId::new("DRN-001"));
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("DRONE_ASSIGNED"));
        assert!(json.contains("\"orderId\":\"o-1\""));
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::Ping { timestamp: 12345 };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("Ping"));
    }
}
