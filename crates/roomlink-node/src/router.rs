//! Axum router wiring.

use axum::{
    routing::{get, post},
    Router,
};

use crate::{app_state::AppState, ops, transport};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/putxml", post(transport::putxml::putxml))
        .route("/healthz", get(ops::healthz))
        .route("/status", get(ops::status))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
