use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use crate::app_state::AppState;
use crate::delivery::extract_text;

const SEND_OK: &str = "<Command><MessageSendResult status=\"OK\"/></Command>";

/// `POST /putxml`: accept a `Message Send` command from a peer.
pub async fn putxml(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    let auth = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !state.ingress_authorized(auth) {
        tracing::warn!("putxml rejected: bad credentials");
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    let Some(text) = extract_text(&body) else {
        tracing::debug!(len = body.len(), "putxml without message text");
        return (StatusCode::BAD_REQUEST, "missing Message Send Text").into_response();
    };

    tracing::trace!(len = text.len(), "putxml accepted");
    state.bus().send(text);
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/xml")], SEND_OK).into_response()
}
