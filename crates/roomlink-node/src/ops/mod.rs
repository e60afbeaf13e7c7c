//! Operational HTTP endpoints.
//!
//! - `/healthz` : liveness
//! - `/status`  : layout state as JSON
//! - `/metrics` : Prometheus text format
//!
//! Also holds the controlled-restart countdown used when the node cannot
//! start with its configured credentials.

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::app_state::AppState;
use crate::device::RoomControl;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn status(State(state): State<AppState>) -> Response {
    match state.layout_status().await {
        Ok(st) => (StatusCode::OK, Json(st)).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "code": e.code().as_str(), "msg": e.to_string() })),
        )
            .into_response(),
    }
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let extra = state.metrics_extra();
    let body = state.metrics().render(&extra);

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Warn on screen, then count down `secs` before the caller exits so the
/// supervisor restarts the node with fixed configuration.
pub async fn restart_countdown(control: &dyn RoomControl, reason: &str, secs: u64) {
    let text = format!("{reason}. Room automation is disabled; restarting in {secs} s.");
    if let Err(e) = control
        .show_alert("Room link misconfigured", &text, Duration::from_secs(secs))
        .await
    {
        tracing::error!(error = %e, "alert failed");
    }
    for left in (1..=secs).rev() {
        tracing::warn!(seconds_left = left, "restarting after configuration error");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
