use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/locks/acquire", post(handlers::acquire))
        .route("/v1/locks/release", post(handlers::release))
        .route("/v1/locks/heartbeat", post(handlers::heartbeat))
        .route("/v1/locks/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
