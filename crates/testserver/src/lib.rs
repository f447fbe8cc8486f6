//! Developer convenience server for `EASE_TEST_MODE` (§4.10).
//!
//! A single POST route on `/` that decodes the JSON body, invokes the wrapped
//! handler, and returns its output verbatim (bytes) or JSON-encoded (anything
//! else). No agent contact, no concurrency limit, no webhook, no status
//! reporting — this never touches the production path.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use ease_handler::{Handler, HandlerItem};

async fn handle_post(State(handler): State<Arc<Handler>>, body: axum::body::Bytes) -> Response {
    let request: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "failed to parse request data");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match handler.call(request).await {
        Ok(HandlerItem::Bytes(bytes)) => bytes.into_response(),
        Ok(HandlerItem::Value(value)) => Json(value).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "handler failed in test mode");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Builds the test-mode router bound to a single wrapped handler.
pub fn router(handler: Arc<Handler>) -> Router {
    Router::new().route("/", post(handle_post)).with_state(handler)
}

/// Serves the test-mode router on `port` until the process is killed.
pub async fn serve(port: u16, handler: Arc<Handler>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "test mode server listening");
    axum::serve(listener, router(handler)).await
}
