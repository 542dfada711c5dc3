//! Turning raw backend records into enriched drones

use chrono::{DateTime, Utc};
use fleet_core::{
    health, ConnectionStatus, Drone, DroneId, DroneStatus, OrderId, RestaurantDirectory,
};
use fleet_source::DroneRecord;

/// Silence after which a drone is reported as losing signal
pub const LOST_SIGNAL_AFTER_SECS: i64 = 30;
/// Silence after which a drone is reported as disconnected
pub const DISCONNECTED_AFTER_SECS: i64 = 60;

/// Cruise speed estimate for delivering drones that report no speed
const ESTIMATED_CRUISE_KMH: f64 = 15.0;

/// Enrich every record of one fetch
pub fn enrich_fleet(
    records: Vec<DroneRecord>,
    directory: &RestaurantDirectory,
    now: DateTime<Utc>,
) -> Vec<Drone> {
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| enrich(record, index, directory, now))
        .collect()
}

/// Default missing fields, normalize ids and derive the computed fields
pub fn enrich(
    record: DroneRecord,
    index: usize,
    directory: &RestaurantDirectory,
    now: DateTime<Utc>,
) -> Drone {
    let id = record
        .id
        .clone()
        .or_else(|| record.code.clone())
        .unwrap_or_else(|| format!("UNKNOWN-{}", index));
    let status = record.status.unwrap_or_default();
    let last_update = record.updated_at.unwrap_or(now);

    let battery = record.battery.unwrap_or(100).clamp(0, 100) as u8;
    let missions_completed = record.missions_completed.unwrap_or(0);

    let connection_status = record
        .connection_status
        .unwrap_or_else(|| connection_from_silence(now, last_update));
    let speed = round_tenth(estimate_speed(&record, &id, status));

    Drone {
        code: record.code.unwrap_or_else(|| id.clone()),
        id: DroneId::new(id),
        battery,
        missions_completed,
        status,
        restaurant_id: record.restaurant_id.map(|r| directory.canonical(&r)),
        order_id: record.order_id.map(OrderId::new),
        position: record.position,
        speed,
        connection_status,
        last_maintenance: record.last_maintenance.unwrap_or(now),
        last_update,
        health_score: health::score(battery, missions_completed),
    }
}

/// Connection quality from the time since the last report
pub fn connection_from_silence(now: DateTime<Utc>, last_update: DateTime<Utc>) -> ConnectionStatus {
    let silent_for = now.signed_duration_since(last_update).num_seconds();
    if silent_for > DISCONNECTED_AFTER_SECS {
        ConnectionStatus::Disconnected
    } else if silent_for > LOST_SIGNAL_AFTER_SECS {
        ConnectionStatus::LostSignal
    } else {
        ConnectionStatus::Online
    }
}

fn estimate_speed(record: &DroneRecord, id: &str, status: DroneStatus) -> f64 {
    if let Some(speed) = record.speed {
        return speed;
    }
    if let Some(mps) = record.speed_mps {
        return mps * 3.6;
    }
    match status {
        // Stable per drone so repeated polls do not jitter
        DroneStatus::Delivering => ESTIMATED_CRUISE_KMH + (id_hash(id) % 100) as f64 / 10.0,
        _ => 0.0,
    }
}

fn id_hash(id: &str) -> u32 {
    id.bytes()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)))
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// TESTS
// ============================================================================
