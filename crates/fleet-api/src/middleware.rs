//! Request metrics middleware

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::state::AppState;

/// Count and time every routed request, labelled by its route template
pub async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    state.metrics.record_api_request(
        &method,
        &path,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::config::ApiConfig;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use fleet_source::{InMemoryTelemetrySource, TelemetrySource};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_requests_are_counted_by_route_template() {
        let source: Arc<dyn TelemetrySource> = Arc::new(InMemoryTelemetrySource::seeded_demo());
        let state = AppState::with_source(ApiConfig::default(), source).unwrap();
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/drones/DRN-SD-01").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/v1/drones/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let output = state.metrics.export().unwrap();
        assert!(output.contains(
            r#"fleet_api_requests_total{method="GET",path="/api/v1/drones/{id}",status="200"} 1"#
        ));
        assert!(output.contains(
            r#"fleet_api_requests_total{method="GET",path="/api/v1/drones/{id}",status="404"} 1"#
        ));
        assert!(output.contains("fleet_api_request_duration_seconds_count"));
        assert!(!output.contains("DRN-SD-01\",status"));
    }
}
