//! Prometheus metrics endpoint and HTTP request tracking middleware.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::{self, UserStatus};
use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const LOGIN_ATTEMPTS_TOTAL: &str = "login_attempts_total";
pub const ASSIGNMENT_MUTATIONS_TOTAL: &str = "assignment_mutations_total";
pub const ROUTE_ASSIGNMENTS: &str = "route_assignments";
pub const PENDING_USERS: &str = "pending_users";

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(HTTP_REQUESTS_TOTAL, "Total number of HTTP requests received");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(LOGIN_ATTEMPTS_TOTAL, "Login attempts by outcome");
    describe_counter!(
        ASSIGNMENT_MUTATIONS_TOTAL,
        "Route assignment mutations by operation and outcome"
    );
    describe_gauge!(ROUTE_ASSIGNMENTS, "Number of route assignments");
    describe_gauge!(PENDING_USERS, "Accounts awaiting manager approval");

    Ok(handle)
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    let store = &state.store;
    if let Ok(count) = store.deadline(db::count_assignments(store.pool())).await {
        gauge!(ROUTE_ASSIGNMENTS).set(count as f64);
    }
    if let Ok(count) = store
        .deadline(db::count_users_by_status(store.pool(), UserStatus::Pending))
        .await
    {
        gauge!(PENDING_USERS).set(count as f64);
    }
}

/// Count requests and record their duration, labelled by route pattern.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}
