//! API request handlers

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use fleet_core::{
    Actor, Alert, AlertType, CartItem, CustomerInfo, Drone, DroneId, EmergencyAuditRecord, Event,
    FleetSnapshot, FleetStats, Order, OrderId, OverrideCommand, Position, ServerMessage,
    SplitOrderGroup, TargetType,
};
use fleet_dispatch::{DispatchError, OverrideRequest, Validation};
use fleet_telemetry::AssignmentOutcome;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub tracking: bool,
    pub simulation_mode: bool,
    pub drones: usize,
    pub active_alerts: usize,
    pub assignments: usize,
    pub audit_records: usize,
    pub fleet_subscribers: usize,
    pub last_update: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingResponse {
    pub tracking: bool,
    /// Whether this call changed the tracking state
    pub changed: bool,
}

#[derive(Debug, Serialize)]
pub struct LastUpdateResponse {
    pub timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    /// Include acknowledged alerts
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub restaurant_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub order_id: OrderId,
    pub drone_id: DroneId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseResponse {
    pub order_id: OrderId,
    pub released: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub target_id: String,
    pub action: String,
    pub applied: bool,
}

/// Operator override as submitted; `command` may be omitted and is then
/// read from the wording of `action`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideInput {
    pub target_type: TargetType,
    pub target_id: String,
    #[serde(default)]
    pub target_name: String,
    pub action: String,
    #[serde(default)]
    pub command: Option<OverrideCommand>,
    #[serde(flatten)]
    pub actor: Actor,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub target_type: Option<TargetType>,
    pub target_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequest {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct MaterializeRequest {
    pub group: SplitOrderGroup,
    pub customer: CustomerInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    pub customer: CustomerInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutOrder {
    pub order: Order,
    pub drone_id: Option<DroneId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub payment_session_id: String,
    pub total_amount: Decimal,
    /// All sub-orders have a drone
    pub complete: bool,
    pub orders: Vec<CheckoutOrder>,
}

// ============================================================================
// HEALTH & STATUS HANDLERS
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// System status overview
pub async fn system_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let cache = state.tracker.cache();

    Json(StatusResponse {
        tracking: state.tracker.is_tracking(),
        simulation_mode: state.config.simulation_mode,
        drones: cache.current().map(|s| s.drones.len()).unwrap_or(0),
        active_alerts: state.tracker.active_alerts().len(),
        assignments: state.ledger.assignment_count(),
        audit_records: state.emergency.audit().len(),
        fleet_subscribers: cache.subscriber_count(),
        last_update: state.tracker.last_update_timestamp(),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.metrics.export()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

// ============================================================================
// FLEET HANDLERS
// ============================================================================

/// Current fleet snapshot
pub async fn get_fleet(State(state): State<AppState>) -> Json<FleetSnapshot> {
    Json(state.tracker.fetch_snapshot().await.as_ref().clone())
}

pub async fn get_fleet_stats(State(state): State<AppState>) -> Json<FleetStats> {
    Json(state.tracker.fetch_snapshot().await.stats())
}

/// Drones grouped by canonical restaurant id
pub async fn get_fleet_by_restaurant(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<Drone>>> {
    let snapshot = state.tracker.fetch_snapshot().await;
    let grouped = snapshot
        .group_by_restaurant()
        .into_iter()
        .map(|(id, drones)| (id.0, drones.into_iter().cloned().collect()))
        .collect();

    Json(grouped)
}

pub async fn get_last_update(State(state): State<AppState>) -> Json<LastUpdateResponse> {
    Json(LastUpdateResponse {
        timestamp: state.tracker.last_update_timestamp(),
    })
}

pub async fn start_tracking(State(state): State<AppState>) -> Json<TrackingResponse> {
    let changed = state.tracker.start_tracking();
    Json(TrackingResponse {
        tracking: state.tracker.is_tracking(),
        changed,
    })
}

pub async fn stop_tracking(State(state): State<AppState>) -> Json<TrackingResponse> {
    let changed = state.tracker.stop_tracking().await;
    Json(TrackingResponse {
        tracking: state.tracker.is_tracking(),
        changed,
    })
}

// ============================================================================
// DRONE HANDLERS
// ============================================================================

/// Get single drone by ID
pub async fn get_drone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Drone>> {
    let snapshot = state.tracker.fetch_snapshot().await;

    snapshot
        .drone(&DroneId::new(&id))
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Drone {} not found", id)))
}

/// Report a new drone position
pub async fn update_drone_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(position): Json<Position>,
) -> ApiResult<StatusCode> {
    if !position.is_valid() {
        return Err(ApiError::bad_request(format!(
            "Invalid position {}, {}",
            position.lat, position.lng
        )));
    }

    state
        .tracker
        .update_drone_position(&DroneId::new(id), position)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn recall_drone(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(actor): Json<Actor>,
) -> Json<CommandResponse> {
    let applied = state.emergency.recall(&DroneId::new(&id), &actor).await;
    state.metrics.record_emergency("drone", applied);

    Json(CommandResponse {
        target_id: id,
        action: "recall".into(),
        applied,
    })
}

pub async fn emergency_land(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(actor): Json<Actor>,
) -> Json<CommandResponse> {
    let applied = state.emergency.emergency_land(&DroneId::new(&id), &actor).await;
    state.metrics.record_emergency("drone", applied);

    Json(CommandResponse {
        target_id: id,
        action: "emergency-land".into(),
        applied,
    })
}

// ============================================================================
// ALERT HANDLERS
// ============================================================================

/// List live alerts; `?all=true` includes acknowledged ones
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertQuery>,
) -> Json<Vec<Alert>> {
    if query.all {
        Json(state.tracker.alerts().all_alerts())
    } else {
        Json(state.tracker.active_alerts())
    }
}

pub async fn get_drone_alerts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<Alert>> {
    Json(state.tracker.drone_alerts(&DroneId::new(id)))
}

/// Acknowledge one live alert
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path((drone_id, alert_type)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let alert_type: AlertType = alert_type.parse()?;

    if state
        .tracker
        .acknowledge_alert(&DroneId::new(&drone_id), alert_type)
    {
        info!("Alert {} on {} acknowledged", alert_type.as_str(), drone_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "No live {} alert for drone {}",
            alert_type.as_str(),
            drone_id
        )))
    }
}

// ============================================================================
// ORDER HANDLERS
// ============================================================================

/// Orders from the backend, annotated with their assigned drone
pub async fn list_orders(State(state): State<AppState>) -> ApiResult<Json<Vec<Order>>> {
    let mut orders = state.tracker.cache().source().fetch_orders().await?;
    state.ledger.annotate_orders(&mut orders);
    Ok(Json(orders))
}

pub async fn assign_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<Json<AssignmentResponse>> {
    let order_id = OrderId::new(id);
    let restaurant_id = state.directory.canonical(&request.restaurant_id);

    match state.ledger.assign(&order_id, &restaurant_id).await {
        Ok(drone_id) => {
            state.metrics.record_assignment(AssignmentOutcome::Assigned);
            Ok(Json(AssignmentResponse { order_id, drone_id }))
        }
        Err(e) => {
            state.metrics.record_assignment(outcome_of(&e));
            Err(e.into())
        }
    }
}

pub async fn release_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ReleaseResponse> {
    let order_id = OrderId::new(id);
    let released = state.ledger.release(&order_id).await;
    if released {
        state.metrics.record_assignment(AssignmentOutcome::Released);
    }

    Json(ReleaseResponse { order_id, released })
}

/// Consistency check; a mismatch is a result, not an error
pub async fn validate_assignment(
    State(state): State<AppState>,
    Path((order_id, drone_id)): Path<(String, String)>,
) -> Json<Validation> {
    Json(
        state
            .ledger
            .validate(&OrderId::new(order_id), &DroneId::new(drone_id))
            .await,
    )
}

pub async fn list_assignments(
    State(state): State<AppState>,
) -> Json<Vec<AssignmentResponse>> {
    Json(
        state
            .ledger
            .assignments()
            .into_iter()
            .map(|(order_id, drone_id)| AssignmentResponse { order_id, drone_id })
            .collect(),
    )
}

// ============================================================================
// CHECKOUT HANDLERS
// ============================================================================

/// Price a cart per restaurant without creating orders
pub async fn split_checkout(
    State(state): State<AppState>,
    Json(request): Json<SplitRequest>,
) -> ApiResult<Json<SplitOrderGroup>> {
    let fee = request.delivery_fee.unwrap_or(state.config.delivery_fee);
    let group = state.splitter.split(&request.items, fee);

    if group.is_empty() {
        return Err(DispatchError::EmptyCheckout.into());
    }
    Ok(Json(group))
}

pub async fn materialize_checkout(
    State(state): State<AppState>,
    Json(request): Json<MaterializeRequest>,
) -> ApiResult<Json<Vec<Order>>> {
    if request.group.is_empty() {
        return Err(DispatchError::EmptyCheckout.into());
    }
    Ok(Json(
        state.splitter.materialize(&request.group, &request.customer),
    ))
}

/// Split, create one order per restaurant and bind each to a drone.
///
/// A sub-order whose restaurant has no eligible drone is returned without a
/// drone and `complete` is false; it is never bound to a placeholder.
pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let fee = request.delivery_fee.unwrap_or(state.config.delivery_fee);
    let group = state.splitter.split(&request.items, fee);
    if group.is_empty() {
        return Err(DispatchError::EmptyCheckout.into());
    }

    let mut orders = Vec::new();
    for mut order in state.splitter.materialize(&group, &request.customer) {
        let (drone_id, error) = match state.ledger.assign(&order.id, &order.restaurant_id).await {
            Ok(drone_id) => {
                state.metrics.record_assignment(AssignmentOutcome::Assigned);
                (Some(drone_id), None)
            }
            Err(e) => {
                warn!("Checkout {}: order {} unassigned: {}", group.payment_session_id, order.id, e);
                state.metrics.record_assignment(outcome_of(&e));
                (None, Some(e.to_string()))
            }
        };
        order.drone_id = drone_id.clone();
        orders.push(CheckoutOrder {
            order,
            drone_id,
            error,
        });
    }

    let complete = orders.iter().all(|o| o.drone_id.is_some());
    info!(
        "Checkout {}: {} orders, total {}, complete={}",
        group.payment_session_id,
        orders.len(),
        group.total_amount,
        complete
    );

    Ok(Json(CheckoutResponse {
        payment_session_id: group.payment_session_id,
        total_amount: group.total_amount,
        complete,
        orders,
    }))
}

// ============================================================================
// EMERGENCY HANDLERS
// ============================================================================

pub async fn perform_override(
    State(state): State<AppState>,
    Json(input): Json<OverrideInput>,
) -> ApiResult<Json<CommandResponse>> {
    let command = match input.command {
        Some(command) => command,
        None => input.action.parse::<OverrideCommand>()?,
    };

    let request = OverrideRequest {
        target_type: input.target_type,
        target_id: input.target_id,
        target_name: input.target_name,
        command,
        action: input.action,
        actor: input.actor,
    };

    let applied = state.emergency.perform_override(&request).await;
    state
        .metrics
        .record_emergency(&request.target_type.to_string(), applied);

    Ok(Json(CommandResponse {
        target_id: request.target_id,
        action: request.action,
        applied,
    }))
}

/// Audit trail, optionally narrowed to one target
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<EmergencyAuditRecord>> {
    let audit = state.emergency.audit();

    match (query.target_type, query.target_id) {
        (Some(target_type), Some(target_id)) => Json(audit.for_target(target_type, &target_id)),
        (Some(target_type), None) => Json(
            audit
                .records()
                .into_iter()
                .filter(|r| r.target_type == target_type)
                .collect(),
        ),
        _ => Json(audit.records()),
    }
}

// ============================================================================
// EVENT & STREAM HANDLERS
// ============================================================================

pub async fn recent_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Json<Vec<Event>> {
    Json(state.tracker.events().recent(query.limit.unwrap_or(50)))
}

/// WebSocket stream of fleet snapshots, alert sets and events
pub async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let mut fleet = state.tracker.subscribe_fleet();
    let mut alerts = state.tracker.subscribe_alerts();
    let mut events = state.tracker.events().subscribe();
    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));

    state.metrics.ws_connected();
    info!("Stream client connected");

    loop {
        let (kind, message) = tokio::select! {
            Some(snapshot) = fleet.recv() => {
                ("fleet", ServerMessage::FleetSnapshot((*snapshot).clone()))
            }
            Some(current) = alerts.recv() => {
                ("alerts", ServerMessage::Alerts((*current).clone()))
            }
            event = events.recv() => match event {
                Ok(event) => ("event", ServerMessage::Event(event)),
                Err(RecvError::Lagged(n)) => {
                    warn!("Stream client lagged by {} events", n);
                    ("error", lagged_message(n))
                }
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => {
                ("ping", ServerMessage::Ping { timestamp: Utc::now().timestamp_millis() })
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!("Stream receive error: {}", e);
                    break;
                }
            },
        };

        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize {} message: {}", kind, e);
                continue;
            }
        };
        if sender.send(Message::Text(json.into())).await.is_err() {
            break;
        }
        state.metrics.record_ws_sent(kind);
    }

    state.metrics.ws_disconnected();
    info!("Stream client disconnected");
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Tell a stream client it missed events and should refetch
fn lagged_message(skipped: u64) -> ServerMessage {
    ServerMessage::Error {
        code: "events_lagged".to_string(),
        message: format!("{} events were dropped; refetch /api/v1/events", skipped),
    }
}

fn outcome_of(error: &DispatchError) -> AssignmentOutcome {
    match error {
        DispatchError::NoAvailableDrone { .. } => AssignmentOutcome::NoDrone,
        _ => AssignmentOutcome::Failed,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use fleet_core::{AlertSeverity, DroneStatus};
    use fleet_dispatch::InvalidReason;
    use fleet_source::{InMemoryTelemetrySource, TelemetrySource};
    use std::sync::Arc;

    fn demo_state() -> (AppState, Arc<InMemoryTelemetrySource>) {
        let source = Arc::new(InMemoryTelemetrySource::seeded_demo());
        let state = AppState::with_source(
            ApiConfig::default(),
            Arc::clone(&source) as Arc<dyn TelemetrySource>,
        )
        .unwrap();
        (state, source)
    }

    fn actor() -> Actor {
        Actor::new("admin-1", "Ops Admin")
    }

    fn checkout_cart() -> Vec<CartItem> {
        vec![
            CartItem::new("sd-001", "Strawberry Cheesecake", 2, Decimal::from(25_000))
                .from_restaurant("rest_2"),
            CartItem::new("ak-001", "Salmon Poke", 1, Decimal::from(79_000))
                .from_restaurant("restaurant_2"),
        ]
    }

    #[tokio::test]
    async fn test_fleet_and_drone_lookup() {
        let (state, _) = demo_state();

        let Json(snapshot) = get_fleet(State(state.clone())).await;
        assert_eq!(snapshot.drones.len(), 6);

        let Json(drone) = get_drone(State(state.clone()), Path("DRN-SD-01".into()))
            .await
            .unwrap();
        assert_eq!(drone.battery, 92);

        let missing = get_drone(State(state), Path("DRN-XX-99".into())).await;
        assert!(matches!(missing, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fleet_grouped_by_restaurant() {
        let (state, _) = demo_state();

        let Json(grouped) = get_fleet_by_restaurant(State(state)).await;
        assert_eq!(grouped["rest_2"].len(), 3);
        assert_eq!(grouped["restaurant_2"].len(), 3);
    }

    #[tokio::test]
    async fn test_tracking_start_is_idempotent() {
        let (state, _) = demo_state();

        let Json(first) = start_tracking(State(state.clone())).await;
        let Json(second) = start_tracking(State(state.clone())).await;
        assert!(first.changed && first.tracking);
        assert!(!second.changed);

        let Json(stopped) = stop_tracking(State(state.clone())).await;
        assert!(stopped.changed && !stopped.tracking);
        let Json(again) = stop_tracking(State(state)).await;
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn test_assign_release_validate() {
        let (state, _) = demo_state();

        let Json(assigned) = assign_order(
            State(state.clone()),
            Path("1700000000000-1".into()),
            Json(AssignRequest {
                restaurant_id: "sweetdreams".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(assigned.drone_id, DroneId::new("DRN-SD-01"));

        let Json(valid) = validate_assignment(
            State(state.clone()),
            Path(("1700000000000-1".into(), "DRN-SD-01".into())),
        )
        .await;
        assert!(valid.is_valid());

        let Json(released) =
            release_order(State(state.clone()), Path("1700000000000-1".into())).await;
        assert!(released.released);

        let Json(after) = validate_assignment(
            State(state),
            Path(("1700000000000-1".into(), "DRN-SD-01".into())),
        )
        .await;
        assert!(matches!(after, Validation::Invalid(InvalidReason::NotAssigned { .. })));
    }

    #[tokio::test]
    async fn test_assign_without_drone_is_conflict() {
        let (state, _) = demo_state();

        let result = assign_order(
            State(state.clone()),
            Path("o-unknown".into()),
            Json(AssignRequest {
                restaurant_id: "rest_9".into(),
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::Conflict(_))));
        assert_eq!(state.ledger.assignment_count(), 0);
    }

    #[tokio::test]
    async fn test_split_checkout_figures() {
        let (state, _) = demo_state();

        let Json(group) = split_checkout(
            State(state),
            Json(SplitRequest {
                items: checkout_cart(),
                delivery_fee: None,
            }),
        )
        .await
        .unwrap();

        assert_eq!(group.orders[0].total, Decimal::from(79_000));
        assert_eq!(group.orders[1].total, Decimal::from(110_320));
        assert_eq!(group.total_amount, Decimal::from(189_320));
    }

    #[tokio::test]
    async fn test_empty_checkout_is_rejected() {
        let (state, _) = demo_state();

        let result = split_checkout(
            State(state),
            Json(SplitRequest {
                items: vec![CartItem::new("zz-1", "Mystery", 1, Decimal::ONE)],
                delivery_fee: None,
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_checkout_binds_each_order_to_its_restaurant() {
        let (state, _) = demo_state();

        let Json(response) = checkout(
            State(state.clone()),
            Json(CheckoutRequest {
                items: checkout_cart(),
                delivery_fee: None,
                customer: CustomerInfo {
                    name: "Lan".into(),
                    ..Default::default()
                },
            }),
        )
        .await
        .unwrap();

        assert!(response.complete);
        assert_eq!(response.orders.len(), 2);
        assert_eq!(response.orders[0].drone_id, Some(DroneId::new("DRN-SD-01")));
        assert_eq!(response.orders[1].drone_id, Some(DroneId::new("DRN-AK-01")));
        assert!(response
            .orders
            .iter()
            .all(|o| o.order.payment_session_id.as_deref() == Some(response.payment_session_id.as_str())));
        assert_eq!(state.ledger.assignment_count(), 2);
    }

    #[tokio::test]
    async fn test_recall_is_audited() {
        let (state, source) = demo_state();

        let Json(response) =
            recall_drone(State(state.clone()), Path("DRN-AK-01".into()), Json(actor())).await;
        assert!(response.applied);
        assert_eq!(
            source.drone(&DroneId::new("DRN-AK-01")).and_then(|d| d.status),
            Some(DroneStatus::Returning)
        );

        let Json(records) = list_audit(
            State(state),
            Query(AuditQuery {
                target_type: Some(TargetType::Drone),
                target_id: Some("DRN-AK-01".into()),
            }),
        )
        .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "recall");
    }

    #[tokio::test]
    async fn test_override_reads_command_from_wording() {
        let (state, _) = demo_state();

        let Json(response) = perform_override(
            State(state.clone()),
            Json(OverrideInput {
                target_type: TargetType::Drone,
                target_id: "DRN-SD-02".into(),
                target_name: "SD-02".into(),
                action: "Send to maintenance".into(),
                command: None,
                actor: actor(),
            }),
        )
        .await
        .unwrap();
        assert!(response.applied);

        let drone = state.tracker.cache().drone(&DroneId::new("DRN-SD-02")).unwrap();
        assert_eq!(drone.status, DroneStatus::Maintenance);
    }

    #[tokio::test]
    async fn test_override_with_unreadable_wording() {
        let (state, _) = demo_state();

        let result = perform_override(
            State(state.clone()),
            Json(OverrideInput {
                target_type: TargetType::Drone,
                target_id: "DRN-SD-02".into(),
                target_name: String::new(),
                action: "do something".into(),
                command: None,
                actor: actor(),
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::BadRequest(_))));
        assert!(state.emergency.audit().is_empty());
    }

    #[tokio::test]
    async fn test_alert_acknowledge_flow() {
        let (state, _) = demo_state();
        state.tracker.alerts().tick().await;

        let Json(alerts) = get_drone_alerts(State(state.clone()), Path("DRN-AK-02".into())).await;
        let battery = alerts
            .iter()
            .find(|a| a.alert_type == AlertType::BatteryLow)
            .unwrap();
        assert_eq!(battery.severity, AlertSeverity::Medium);

        let status = acknowledge_alert(
            State(state.clone()),
            Path(("DRN-AK-02".into(), "battery_low".into())),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let Json(remaining) = get_drone_alerts(State(state.clone()), Path("DRN-AK-02".into())).await;
        assert!(remaining.iter().all(|a| a.alert_type != AlertType::BatteryLow));

        let Json(all) = list_alerts(State(state.clone()), Query(AlertQuery { all: true })).await;
        assert!(all.iter().any(|a| a.acknowledged));

        let unknown = acknowledge_alert(
            State(state),
            Path(("DRN-AK-02".into(), "bogus".into())),
        )
        .await;
        assert!(matches!(unknown, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_position_update() {
        let (state, _) = demo_state();

        let status = update_drone_position(
            State(state.clone()),
            Path("DRN-SD-01".into()),
            Json(Position::new(10.78, 106.70)),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let drone = state.tracker.cache().drone(&DroneId::new("DRN-SD-01")).unwrap();
        assert_eq!(drone.position, Some(Position::new(10.78, 106.70)));

        let bad = update_drone_position(
            State(state),
            Path("DRN-SD-01".into()),
            Json(Position::new(120.0, 0.0)),
        )
        .await;
        assert!(matches!(bad, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_metrics_export() {
        let (state, _) = demo_state();
        let snapshot = state.tracker.fetch_snapshot().await;
        state.metrics.update_fleet(&snapshot);

        let response = metrics(State(state)).await.unwrap().into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_lagged_stream_client_gets_error_message() {
        let json = serde_json::to_value(lagged_message(12)).unwrap();

        assert_eq!(json["type"], "Error");
        assert_eq!(json["payload"]["code"], "events_lagged");
        assert!(json["payload"]["message"].as_str().unwrap().starts_with("12 events"));
    }
}
