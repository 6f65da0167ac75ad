//! HTTP/WebSocket router wiring. Grounded on the teacher's `api/mod.rs`
//! public/protected split, minus the auth middleware layer — the
//! telephony webhook and media stream carry their own identity (the
//! call_sid/stream_sid bound at `start`), not a bearer token, and the
//! health/metrics endpoints are meant for unauthenticated scrape/probe
//! access (§4.13).

use axum::routing::{get, post};
use axum::Router;

use crate::metrics;
use crate::state::AppState;
use crate::webhook;
use crate::ws;

/// Build the full HTTP/WebSocket router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Telephony media stream (C8)
        .route("/ws", get(ws::telephony_ws))
        // Call status webhook (C12)
        .route("/webhooks/exotel/call-status", post(webhook::handle_status_webhook))
        // Health/metrics (C13)
        .route("/live", get(metrics::live))
        .route("/ready", get(metrics::ready))
        .route("/health/detailed", get(metrics::health_detailed))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
