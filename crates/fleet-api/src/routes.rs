//! API route definitions

use crate::handlers;
use crate::middleware::track_requests;
use crate::state::AppState;

use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post, put},
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Origin allowed when CORS is not permissive
const DASHBOARD_ORIGIN: &str = "http://localhost:8080";

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = if state.config.cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
            .allow_origin(HeaderValue::from_static(DASHBOARD_ORIGIN))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::system_status))

        // Metrics (Prometheus format)
        .route("/metrics", get(handlers::metrics))

        // Fleet API
        .route("/api/v1/fleet", get(handlers::get_fleet))
        .route("/api/v1/fleet/stats", get(handlers::get_fleet_stats))
        .route("/api/v1/fleet/restaurants", get(handlers::get_fleet_by_restaurant))
        .route("/api/v1/fleet/last-update", get(handlers::get_last_update))
        .route("/api/v1/tracking/start", post(handlers::start_tracking))
        .route("/api/v1/tracking/stop", post(handlers::stop_tracking))

        // Drones API
        .route("/api/v1/drones/{id}", get(handlers::get_drone))
        .route("/api/v1/drones/{id}/position", put(handlers::update_drone_position))
        .route("/api/v1/drones/{id}/alerts", get(handlers::get_drone_alerts))
        .route("/api/v1/drones/{id}/recall", post(handlers::recall_drone))
        .route("/api/v1/drones/{id}/emergency-land", post(handlers::emergency_land))

        // Alerts API
        .route("/api/v1/alerts", get(handlers::list_alerts))
        .route(
            "/api/v1/alerts/{drone_id}/{alert_type}/acknowledge",
            post(handlers::acknowledge_alert),
        )

        // Orders API
        .route("/api/v1/orders", get(handlers::list_orders))
        .route("/api/v1/orders/{id}/assign", post(handlers::assign_order))
        .route("/api/v1/orders/{id}/release", post(handlers::release_order))
        .route("/api/v1/orders/{id}/validate/{drone_id}", get(handlers::validate_assignment))
        .route("/api/v1/assignments", get(handlers::list_assignments))

        // Checkout API
        .route("/api/v1/checkout", post(handlers::checkout))
        .route("/api/v1/checkout/split", post(handlers::split_checkout))
        .route("/api/v1/checkout/materialize", post(handlers::materialize_checkout))

        // Emergency API
        .route("/api/v1/overrides", post(handlers::perform_override))
        .route("/api/v1/audit", get(handlers::list_audit))

        // Events & stream
        .route("/api/v1/events", get(handlers::recent_events))
        .route("/api/v1/stream", get(handlers::stream))

        // Apply middleware
        .route_layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}
