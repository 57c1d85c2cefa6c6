mod assignments;
pub mod client;
pub mod error;
pub mod metrics;
pub mod rate_limit;
pub mod session;

use axum::{
    middleware,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // JSON assignment API (session cookie + X-CSRF-Token on mutations)
    let api_routes = Router::new()
        .route(
            "/route-assignments",
            get(assignments::list_assignments).post(assignments::create_assignment),
        )
        .route(
            "/route-assignments/:id",
            put(assignments::update_assignment).delete(assignments::delete_assignment),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api", api_routes)
        .merge(crate::ui::create_router(state.clone()))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
