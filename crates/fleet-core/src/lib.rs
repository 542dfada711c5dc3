//! # Fleet Core
//!
//! Core domain models for the drone delivery fleet: drones, orders,
//! alerts, emergency audit records and checkout split types.
//! This crate provides shared types used across all fleet crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub mod error;
pub mod events;
pub mod health;
pub mod order;
pub mod restaurant;

pub use error::CoreError;
pub use events::*;
pub use health::HealthScorer;
pub use order::*;
pub use restaurant::{RestaurantDirectory, RestaurantEntry, RestaurantId};

// ============================================================================
// DRONE MODELS
// ============================================================================

/// Unique identifier for a drone
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DroneId(pub String);

impl DroneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DroneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DroneId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DroneId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Operational status of a delivery drone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneStatus {
    /// Idle at its restaurant and ready for work
    #[default]
    Active,
    /// Carrying an order
    Delivering,
    /// Grounded for maintenance
    Maintenance,
    /// Powered down or landed
    Offline,
    /// Flying back to base
    Returning,
}

impl DroneStatus {
    /// Parse a backend status label, ignoring case
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "active" | "idle" | "arrived" => Some(Self::Active),
            "delivering" => Some(Self::Delivering),
            "maintenance" => Some(Self::Maintenance),
            "offline" => Some(Self::Offline),
            "returning" => Some(Self::Returning),
            _ => None,
        }
    }

    /// Statuses from which a drone may take a new order
    pub fn accepts_orders(&self) -> bool {
        matches!(self, DroneStatus::Active | DroneStatus::Delivering)
    }
}

impl fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroneStatus::Active => write!(f, "active"),
            DroneStatus::Delivering => write!(f, "delivering"),
            DroneStatus::Maintenance => write!(f, "maintenance"),
            DroneStatus::Offline => write!(f, "offline"),
            DroneStatus::Returning => write!(f, "returning"),
        }
    }
}

/// Link quality derived from how recently a drone reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Online,
    LostSignal,
    Disconnected,
}

impl ConnectionStatus {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "online" => Some(Self::Online),
            "lost_signal" | "lostsignal" => Some(Self::LostSignal),
            "disconnected" => Some(Self::Disconnected),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        !matches!(self, ConnectionStatus::Online)
    }
}

/// GPS fix reported by a drone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
}

impl Position {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Enriched drone state as held in the fleet snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Drone {
    pub id: DroneId,
    /// Human-readable label, falls back to the id
    pub code: String,
    /// Battery percentage, always within 0-100
    pub battery: u8,
    pub missions_completed: u32,
    pub status: DroneStatus,
    pub restaurant_id: Option<RestaurantId>,
    /// Order the backend reports this drone as carrying
    pub order_id: Option<OrderId>,
    pub position: Option<Position>,
    /// Ground speed in km/h
    pub speed: f64,
    pub connection_status: ConnectionStatus,
    pub last_maintenance: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Derived 0-100 fitness score
    pub health_score: u8,
}

impl Drone {
    pub fn new(id: impl Into<DroneId>) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            code: id.0.clone(),
            id,
            battery: 100,
            missions_completed: 0,
            status: DroneStatus::default(),
            restaurant_id: None,
            order_id: None,
            position: None,
            speed: 0.0,
            connection_status: ConnectionStatus::default(),
            last_maintenance: now,
            last_update: now,
            health_score: 0,
        }
    }

    /// Set the battery, clamping into 0-100, and refresh the health score
    pub fn set_battery(&mut self, battery: i64) {
        self.battery = battery.clamp(0, 100) as u8;
        self.refresh_health();
    }

    pub fn refresh_health(&mut self) {
        self.health_score = health::score(self.battery, self.missions_completed);
    }

    pub fn belongs_to(&self, restaurant_id: &RestaurantId) -> bool {
        self.restaurant_id.as_ref() == Some(restaurant_id)
    }

    pub fn is_assigned(&self) -> bool {
        self.order_id.is_some()
    }

    /// Seconds since the drone last reported, never negative
    pub fn seconds_since_update(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.last_update).num_seconds().max(0)
    }

    /// Fractional days since the last maintenance
    pub fn days_since_maintenance(&self, now: DateTime<Utc>) -> f64 {
        now.signed_duration_since(self.last_maintenance).num_milliseconds() as f64
            / (1000.0 * 60.0 * 60.0 * 24.0)
    }
}

/// Point-in-time view of the whole fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetSnapshot {
    pub drones: Vec<Drone>,
    /// When the backend was asked for this view; anything it reports may
    /// predate changes made after this instant
    pub fetched_at: DateTime<Utc>,
}

impl FleetSnapshot {
    pub fn new(drones: Vec<Drone>) -> Self {
        Self {
            drones,
            fetched_at: Utc::now(),
        }
    }

    /// Snapshot with no drones, served before the first successful fetch
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }

    pub fn drone(&self, id: &DroneId) -> Option<&Drone> {
        self.drones.iter().find(|d| &d.id == id)
    }

    pub fn drone_for_order(&self, order_id: &OrderId) -> Option<&Drone> {
        self.drones.iter().find(|d| d.order_id.as_ref() == Some(order_id))
    }

    pub fn drones_for_restaurant<'a>(
        &'a self,
        restaurant_id: &'a RestaurantId,
    ) -> impl Iterator<Item = &'a Drone> + 'a {
        self.drones.iter().filter(move |d| d.belongs_to(restaurant_id))
    }

    /// Drones not carrying any order
    pub fn available(&self) -> impl Iterator<Item = &Drone> {
        self.drones.iter().filter(|d| !d.is_assigned())
    }

    /// Drones keyed by owning restaurant; drones without one sit under `unknown`
    pub fn group_by_restaurant(&self) -> BTreeMap<RestaurantId, Vec<&Drone>> {
        let mut grouped: BTreeMap<RestaurantId, Vec<&Drone>> = BTreeMap::new();
        for drone in &self.drones {
            let key = drone
                .restaurant_id
                .clone()
                .unwrap_or_else(|| RestaurantId::new("unknown"));
            grouped.entry(key).or_default().push(drone);
        }
        grouped
    }

    pub fn stats(&self) -> FleetStats {
        let mut stats = FleetStats {
            drone_count: self.drones.len(),
            ..Default::default()
        };

        for drone in &self.drones {
            match drone.status {
                DroneStatus::Active => stats.active += 1,
                DroneStatus::Delivering => stats.delivering += 1,
                DroneStatus::Maintenance => stats.maintenance += 1,
                DroneStatus::Offline => stats.offline += 1,
                DroneStatus::Returning => stats.returning += 1,
            }
            if drone.is_assigned() {
                stats.assigned += 1;
            }
        }

        if !self.drones.is_empty() {
            let total: u32 = self.drones.iter().map(|d| d.health_score as u32).sum();
            stats.average_health = total as f64 / self.drones.len() as f64;
        }

        stats
    }
}

/// Aggregate fleet counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStats {
    pub drone_count: usize,
    pub active: usize,
    pub delivering: usize,
    pub maintenance: usize,
    pub offline: usize,
    pub returning: usize,
    pub assigned: usize,
    pub average_health: f64,
}

// ============================================================================
// ALERT MODELS
// ============================================================================

/// Severity level of an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Low => write!(f, "low"),
            AlertSeverity::Medium => write!(f, "medium"),
            AlertSeverity::High => write!(f, "high"),
        }
    }
}

/// Type of alert; at most one alert per drone and type is live at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    BatteryLow,
    ConnectionLost,
    Stall,
    MaintenanceOverdue,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::BatteryLow => "battery_low",
            AlertType::ConnectionLost => "connection_lost",
            AlertType::Stall => "stall",
            AlertType::MaintenanceOverdue => "maintenance_overdue",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "battery_low" => Ok(AlertType::BatteryLow),
            "connection_lost" => Ok(AlertType::ConnectionLost),
            "stall" => Ok(AlertType::Stall),
            "maintenance_overdue" | "maintenance_required" => Ok(AlertType::MaintenanceOverdue),
            other => Err(CoreError::UnknownAlertType(other.to_string())),
        }
    }
}

/// Fleet alert raised by threshold evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub drone_id: DroneId,
    pub drone_code: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    /// When the condition was first raised
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

impl Alert {
    pub fn new(
        drone: &Drone,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            drone_id: drone.id.clone(),
            drone_code: drone.code.clone(),
            alert_type,
            severity,
            message: message.into(),
            timestamp,
            acknowledged: false,
        }
    }

    pub fn is_for(&self, drone_id: &DroneId, alert_type: AlertType) -> bool {
        &self.drone_id == drone_id && self.alert_type == alert_type
    }
}

// ============================================================================
// EMERGENCY MODELS
// ============================================================================

/// Kind of entity an operator intervention targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Order,
    Restaurant,
    Drone,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetType::Order => write!(f, "order"),
            TargetType::Restaurant => write!(f, "restaurant"),
            TargetType::Drone => write!(f, "drone"),
        }
    }
}

impl FromStr for TargetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "order" => Ok(TargetType::Order),
            "restaurant" => Ok(TargetType::Restaurant),
            "drone" => Ok(TargetType::Drone),
            other => Err(CoreError::UnknownTargetType(other.to_string())),
        }
    }
}

/// Typed operator command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideCommand {
    /// Take the target out of service
    Deactivate,
    /// Put the target back in service
    Activate,
    /// Halt the target immediately
    Stop,
    /// Send a drone back to base
    Recall,
    /// Ground a drone for maintenance
    Maintenance,
}

impl OverrideCommand {
    /// Drone status this command drives a drone to
    pub fn drone_status(&self) -> DroneStatus {
        match self {
            OverrideCommand::Deactivate | OverrideCommand::Stop => DroneStatus::Offline,
            OverrideCommand::Activate => DroneStatus::Active,
            OverrideCommand::Recall => DroneStatus::Returning,
            OverrideCommand::Maintenance => DroneStatus::Maintenance,
        }
    }

    /// Order status this command drives an order to, if any
    pub fn order_status(&self) -> Option<OrderStatus> {
        match self {
            OverrideCommand::Deactivate | OverrideCommand::Stop => Some(OrderStatus::Cancelled),
            OverrideCommand::Activate => Some(OrderStatus::Confirmed),
            OverrideCommand::Recall | OverrideCommand::Maintenance => None,
        }
    }

    /// Restaurant active flag this command sets, if any
    pub fn restaurant_active(&self) -> Option<bool> {
        match self {
            OverrideCommand::Deactivate | OverrideCommand::Stop => Some(false),
            OverrideCommand::Activate => Some(true),
            OverrideCommand::Recall | OverrideCommand::Maintenance => None,
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word {
            "pause" | "suspend" | "deactivate" => Some(OverrideCommand::Deactivate),
            "activate" | "resume" => Some(OverrideCommand::Activate),
            "stop" | "offline" => Some(OverrideCommand::Stop),
            "return" | "recall" => Some(OverrideCommand::Recall),
            "maintenance" => Some(OverrideCommand::Maintenance),
            _ => None,
        }
    }
}

impl fmt::Display for OverrideCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideCommand::Deactivate => write!(f, "deactivate"),
            OverrideCommand::Activate => write!(f, "activate"),
            OverrideCommand::Stop => write!(f, "stop"),
            OverrideCommand::Recall => write!(f, "recall"),
            OverrideCommand::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// Interprets operator free text by whole words, first match wins.
///
/// `"deactivate"` never reads as `"activate"`, and text with no known word
/// is rejected rather than guessed at.
impl FromStr for OverrideCommand {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .find_map(OverrideCommand::from_word)
            .ok_or_else(|| CoreError::UnknownCommand(s.to_string()))
    }
}

/// Immutable record of an operator intervention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAuditRecord {
    pub id: Uuid,
    pub target_type: TargetType,
    pub target_id: String,
    pub target_name: String,
    /// Operator's own wording, kept as an annotation
    pub action: String,
    pub command: Option<OverrideCommand>,
    pub actor_id: String,
    pub actor_name: String,
    /// Whether a matching target was found and transitioned
    pub applied: bool,
    pub timestamp: DateTime<Utc>,
}

/// Operator issuing a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub actor_id: String,
    pub actor_name: String,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drone_creation() {
        let drone = Drone::new("DRN-001");
        assert_eq!(drone.id.as_str(), "DRN-001");
        assert_eq!(drone.code, "DRN-001");
        assert_eq!(drone.status, DroneStatus::Active);
        assert!(!drone.is_assigned());
    }

    #[test]
    fn test_battery_clamped_on_write() {
        let mut drone = Drone::new("DRN-001");
        drone.set_battery(140);
        assert_eq!(drone.battery, 100);
        drone.set_battery(-3);
        assert_eq!(drone.battery, 0);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(DroneStatus::parse("Delivering"), Some(DroneStatus::Delivering));
        assert_eq!(DroneStatus::parse("arrived"), Some(DroneStatus::Active));
        assert_eq!(DroneStatus::parse("exploded"), None);
    }

    #[test]
    fn test_snapshot_stats() {
        let mut a = Drone::new("A");
        a.status = DroneStatus::Delivering;
        a.order_id = Some(OrderId::new("o-1"));
        a.health_score = 80;
        let mut b = Drone::new("B");
        b.health_score = 40;

        let stats = FleetSnapshot::new(vec![a, b]).stats();
        assert_eq!(stats.drone_count, 2);
        assert_eq!(stats.delivering, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.assigned, 1);
        assert_eq!(stats.average_health, 60.0);
    }

    #[test]
    fn test_snapshot_queries() {
        let mut a = Drone::new("A");
        a.restaurant_id = Some(RestaurantId::new("rest_2"));
        a.order_id = Some(OrderId::new("o-1"));
        let mut b = Drone::new("B");
        b.restaurant_id = Some(RestaurantId::new("rest_2"));
        let c = Drone::new("C");

        let snapshot = FleetSnapshot::new(vec![a, b, c]);
        let rest = RestaurantId::new("rest_2");

        assert_eq!(snapshot.drones_for_restaurant(&rest).count(), 2);
        assert_eq!(snapshot.available().count(), 2);
        assert_eq!(snapshot.drone_for_order(&OrderId::new("o-1")).unwrap().id.as_str(), "A");
        assert_eq!(snapshot.group_by_restaurant().len(), 2);
    }

    #[test]
    fn test_override_command_parsing() {
        assert_eq!("Pause deliveries".parse::<OverrideCommand>().unwrap(), OverrideCommand::Deactivate);
        assert_eq!("suspend".parse::<OverrideCommand>().unwrap(), OverrideCommand::Deactivate);
        assert_eq!("deactivate now".parse::<OverrideCommand>().unwrap(), OverrideCommand::Deactivate);
        assert_eq!("resume".parse::<OverrideCommand>().unwrap(), OverrideCommand::Activate);
        assert_eq!("go offline".parse::<OverrideCommand>().unwrap(), OverrideCommand::Stop);
        assert_eq!("return-to-base".parse::<OverrideCommand>().unwrap(), OverrideCommand::Recall);
        assert_eq!("maintenance".parse::<OverrideCommand>().unwrap(), OverrideCommand::Maintenance);
        assert!("reactivated".parse::<OverrideCommand>().is_err());
        assert!("do something".parse::<OverrideCommand>().is_err());
    }

    #[test]
    fn test_override_command_effects() {
        assert_eq!(OverrideCommand::Recall.drone_status(), DroneStatus::Returning);
        assert_eq!(OverrideCommand::Stop.drone_status(), DroneStatus::Offline);
        assert_eq!(OverrideCommand::Stop.order_status(), Some(OrderStatus::Cancelled));
        assert_eq!(OverrideCommand::Maintenance.order_status(), None);
        assert_eq!(OverrideCommand::Activate.restaurant_active(), Some(true));
    }

    #[test]
    fn test_alert_type_round_trip_names() {
        assert_eq!("stall".parse::<AlertType>().unwrap(), AlertType::Stall);
        assert_eq!(
            "maintenance_required".parse::<AlertType>().unwrap(),
            AlertType::MaintenanceOverdue
        );
        assert!("fuel_low".parse::<AlertType>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::High > AlertSeverity::Medium);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }
}
