//! Metrics & health (C13). SPEC_FULL.md §4.13, §2.2 — exact metric names
//! and bucket boundaries reproduced from the original's
//! `monitoring/metrics.py`.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json};
use prometheus::{
    CounterVec, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::state::AppState;

pub struct Metrics {
    registry: Registry,
    pub calls_initiated_total: CounterVec,
    pub calls_completed_total: CounterVec,
    pub errors_total: CounterVec,
    pub active_calls: Gauge,
    pub queued_calls: Gauge,
    pub websocket_connections: Gauge,
    pub call_duration_seconds: HistogramVec,
    pub llm_request_duration_seconds: HistogramVec,
    pub stt_request_duration_seconds: HistogramVec,
    pub tts_request_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let calls_initiated_total = CounterVec::new(
            Opts::new("calls_initiated_total", "Total number of calls initiated"),
            &["campaign", "status"],
        )
        .expect("valid metric");
        let calls_completed_total = CounterVec::new(
            Opts::new("calls_completed_total", "Total number of calls completed"),
            &["campaign", "outcome"],
        )
        .expect("valid metric");
        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["type", "component"],
        )
        .expect("valid metric");
        let active_calls = Gauge::new("active_calls", "Number of currently active calls")
            .expect("valid metric");
        let queued_calls = Gauge::new("queued_calls", "Number of calls waiting in queue")
            .expect("valid metric");
        let websocket_connections = Gauge::new(
            "websocket_connections",
            "Number of active WebSocket connections",
        )
        .expect("valid metric");

        let call_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new("call_duration_seconds", "Call duration in seconds")
                .buckets(vec![30.0, 60.0, 120.0, 180.0, 300.0, 600.0]),
            &["campaign"],
        )
        .expect("valid metric");
        let llm_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "llm_request_duration_seconds",
                "LLM request duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
            &["model"],
        )
        .expect("valid metric");
        let stt_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "stt_request_duration_seconds",
                "STT request duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0]),
            &[] as &[&str],
        )
        .expect("valid metric");
        let tts_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "tts_request_duration_seconds",
                "TTS request duration in seconds",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0]),
            &[] as &[&str],
        )
        .expect("valid metric");

        for collector in [
            Box::new(calls_initiated_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(calls_completed_total.clone()),
            Box::new(errors_total.clone()),
            Box::new(active_calls.clone()),
            Box::new(queued_calls.clone()),
            Box::new(websocket_connections.clone()),
            Box::new(call_duration_seconds.clone()),
            Box::new(llm_request_duration_seconds.clone()),
            Box::new(stt_request_duration_seconds.clone()),
            Box::new(tts_request_duration_seconds.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registration never collides at startup");
        }

        Self {
            registry,
            calls_initiated_total,
            calls_completed_total,
            errors_total,
            active_calls,
            queued_calls,
            websocket_connections,
            call_duration_seconds,
            llm_request_duration_seconds,
            stt_request_duration_seconds,
            tts_request_duration_seconds,
        }
    }

    pub fn record_call_initiated(&self, campaign: &str, status: &str) {
        self.calls_initiated_total
            .with_label_values(&[campaign, status])
            .inc();
    }

    pub fn record_call_completed(&self, campaign: &str, outcome: &str, duration_secs: f64) {
        self.calls_completed_total
            .with_label_values(&[campaign, outcome])
            .inc();
        self.call_duration_seconds
            .with_label_values(&[campaign])
            .observe(duration_secs);
    }

    pub fn record_error(&self, error_type: &str, component: &str) {
        self.errors_total
            .with_label_values(&[error_type, component])
            .inc();
    }

    pub fn record_llm_request(&self, model: &str, duration_secs: f64) {
        self.llm_request_duration_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn record_stt_request(&self, duration_secs: f64) {
        self.stt_request_duration_seconds
            .with_label_values(&[])
            .observe(duration_secs);
    }

    pub fn record_tts_request(&self, duration_secs: f64) {
        self.tts_request_duration_seconds
            .with_label_values(&[])
            .observe(duration_secs);
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// `/live` — process alive, no dependency check.
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}

/// `/ready` — session store and DB reachable.
pub async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store_health().await;
    let session_store_ok = state.session_store.is_reachable().await;
    if db_ok && session_store_ok {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "ready": false,
                "database": db_ok,
                "session_store": session_store_ok,
            })),
        )
            .into_response()
    }
}

/// `/health/detailed` — each external dependency probed individually.
pub async fn health_detailed(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store_health().await;
    let session_store_ok = state.session_store.is_reachable().await;
    Json(serde_json::json!({
        "database": if db_ok { "ok" } else { "unreachable" },
        "session_store": if session_store_ok { "ok" } else { "unreachable" },
        "active_calls": state.metrics.active_calls.get(),
        "queued_calls": state.metrics.queued_calls.get(),
        "websocket_connections": state.metrics.websocket_connections.get(),
    }))
}
