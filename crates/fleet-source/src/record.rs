//! Raw drone records as reported by the backend
//!
//! Backends disagree on field names and types, so records are decoded field
//! by field from a JSON value. A bad field is defaulted; a bad record is
//! never allowed to abort the rest of the fleet.

use chrono::{DateTime, TimeZone, Utc};
use fleet_core::{ConnectionStatus, Drone, DroneStatus, OrderId, Position, RestaurantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{SourceError, SourceResult};

/// One drone as reported by the backend, before enrichment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroneRecord {
    pub id: Option<String>,
    pub code: Option<String>,
    /// Raw battery, not yet clamped
    pub battery: Option<i64>,
    pub missions_completed: Option<u32>,
    pub status: Option<DroneStatus>,
    pub restaurant_id: Option<String>,
    pub order_id: Option<String>,
    pub position: Option<Position>,
    /// km/h
    pub speed: Option<f64>,
    /// m/s, used only when `speed` is absent
    pub speed_mps: Option<f64>,
    pub connection_status: Option<ConnectionStatus>,
    pub last_maintenance: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DroneRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// Decode a record from any JSON object, tolerating aliases and bad types
    pub fn from_json(obj: &Map<String, Value>) -> Self {
        let status = string_field(obj, &["status"]).and_then(|raw| {
            let parsed = DroneStatus::parse(&raw);
            if parsed.is_none() {
                debug!("Unknown drone status '{}', defaulting to active", raw);
            }
            parsed
        });

        let position = obj
            .get("position")
            .and_then(|p| p.as_object())
            .and_then(|p| coordinates(p.get("lat"), p.get("lng")))
            .or_else(|| coordinates(obj.get("lat"), obj.get("lng")));

        Self {
            id: string_field(obj, &["id", "droneCode"]),
            code: string_field(obj, &["code", "droneCode"]),
            battery: number_field(obj, "battery").map(|b| b.round() as i64),
            missions_completed: number_field(obj, "missionsCompleted")
                .filter(|m| *m >= 0.0)
                .map(|m| m as u32),
            status,
            restaurant_id: string_field(obj, &["restaurantId", "restaurant"]),
            order_id: string_field(obj, &["orderId"]),
            position,
            speed: number_field(obj, "speed").filter(|s| *s >= 0.0),
            speed_mps: number_field(obj, "speedMps").filter(|s| *s >= 0.0),
            connection_status: string_field(obj, &["connectionStatus"])
                .and_then(|raw| ConnectionStatus::parse(&raw)),
            last_maintenance: obj.get("lastMaintenance").and_then(timestamp),
            updated_at: obj
                .get("updatedAt")
                .or_else(|| obj.get("lastUpdate"))
                .and_then(timestamp),
        }
    }

    /// Raw view of an enriched drone, used by in-memory sources
    pub fn from_drone(drone: &Drone) -> Self {
        Self {
            id: Some(drone.id.to_string()),
            code: Some(drone.code.clone()),
            battery: Some(drone.battery as i64),
            missions_completed: Some(drone.missions_completed),
            status: Some(drone.status),
            restaurant_id: drone.restaurant_id.as_ref().map(RestaurantId::to_string),
            order_id: drone.order_id.as_ref().map(OrderId::to_string),
            position: drone.position,
            speed: Some(drone.speed),
            speed_mps: None,
            connection_status: None,
            last_maintenance: Some(drone.last_maintenance),
            updated_at: Some(drone.last_update),
        }
    }
}

/// Decode a `GET /drones` body; non-object entries are skipped.
///
/// A body that is not a list at all is an error, not an empty fleet.
pub fn decode_fleet(body: &Value) -> SourceResult<Vec<DroneRecord>> {
    let Some(entries) = body.as_array() else {
        return Err(SourceError::Decode(format!(
            "drone list is not an array: {}",
            kind_of(body)
        )));
    };

    let records = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.as_object() {
            Some(obj) => Some(DroneRecord::from_json(obj)),
            None => {
                warn!("Skipping non-object drone entry at index {}", index);
                None
            }
        })
        .collect();
    Ok(records)
}

pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    let number = match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn coordinates(lat: Option<&Value>, lng: Option<&Value>) -> Option<Position> {
    let position = Position::new(lat?.as_f64()?, lng?.as_f64()?);
    position.is_valid().then_some(position)
}

/// ISO-8601 string or epoch milliseconds
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> DroneRecord {
        DroneRecord::from_json(value.as_object().unwrap())
    }

    #[test]
    fn test_full_record() {
        let record = decode(json!({
            "id": "DRN-001",
            "code": "SD-01",
            "battery": 87,
            "missionsCompleted": 120,
            "status": "delivering",
            "restaurantId": "rest_2",
            "orderId": "1700000000000-1",
            "position": { "lat": 10.77, "lng": 106.70 },
            "speed": 18.4,
            "lastMaintenance": "2026-09-01T00:00:00Z",
            "updatedAt": "2026-10-19T10:00:00Z"
        }));

        assert_eq!(record.id.as_deref(), Some("DRN-001"));
        assert_eq!(record.code.as_deref(), Some("SD-01"));
        assert_eq!(record.battery, Some(87));
        assert_eq!(record.status, Some(DroneStatus::Delivering));
        assert_eq!(record.order_id.as_deref(), Some("1700000000000-1"));
        assert_eq!(record.position, Some(Position::new(10.77, 106.70)));
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_aliases() {
        let record = decode(json!({
            "droneCode": "AK-07",
            "restaurant": "aloha",
            "lat": 21.0,
            "lng": 105.8,
            "speedMps": 5.0,
            "lastMaintenance": 1_700_000_000_000i64
        }));

        assert_eq!(record.id.as_deref(), Some("AK-07"));
        assert_eq!(record.code.as_deref(), Some("AK-07"));
        assert_eq!(record.restaurant_id.as_deref(), Some("aloha"));
        assert_eq!(record.position, Some(Position::new(21.0, 105.8)));
        assert_eq!(record.speed_mps, Some(5.0));
        assert_eq!(
            record.last_maintenance.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
    }

    #[test]
    fn test_malformed_fields_are_defaulted() {
        let record = decode(json!({
            "id": "DRN-009",
            "battery": "not a number",
            "status": 42,
            "position": "nowhere",
            "orderId": "",
            "lastMaintenance": "yesterday"
        }));

        assert_eq!(record.id.as_deref(), Some("DRN-009"));
        assert_eq!(record.battery, None);
        assert_eq!(record.status, None);
        assert_eq!(record.position, None);
        assert_eq!(record.order_id, None);
        assert_eq!(record.last_maintenance, None);
    }

    #[test]
    fn test_decode_fleet_skips_non_objects() {
        let records = decode_fleet(&json!([{ "id": "A" }, 17, null, { "id": "B" }])).unwrap();
        assert_eq!(records.len(), 2);
        assert!(decode_fleet(&json!([])).unwrap().is_empty());
    }

    #[test]
    fn test_decode_fleet_rejects_non_list_body() {
        let err = decode_fleet(&json!({ "error": "boom" })).unwrap_err();
        assert!(matches!(err, SourceError::Decode(ref msg) if msg.contains("object")));

        assert!(decode_fleet(&Value::Null).is_err());
    }
}
