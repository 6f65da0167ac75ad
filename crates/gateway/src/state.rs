//! Shared application state passed to all API handlers and the turn
//! controller. Grounded on the teacher's `state.rs` field-grouping idiom.

use std::sync::Arc;

use ringline_domain::config::Config;
use ringline_providers::{LlmClient, SttClient, TtsClient};
use ringline_sessions::SharedSessionStore;

use crate::db::SharedStore;
use crate::executor::CallExecutor;
use crate::interrupt::InterruptFlags;
use crate::metrics::Metrics;
use crate::scheduler::ConcurrencyGuard;

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core services** — config, durable store
/// - **Live call state** — session store, interrupt flags, concurrency guard
/// - **Providers** — STT/LLM/TTS clients, telephony executor
/// - **Observability** — metrics registry
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: SharedStore,

    // ── Live call state (C6, C7, C14) ───────────────────────────────────
    pub session_store: SharedSessionStore,
    pub interrupt_flags: Arc<InterruptFlags>,
    pub concurrency: Arc<ConcurrencyGuard>,

    // ── Providers (C3, C4, C5, C9) ──────────────────────────────────────
    pub stt: Arc<dyn SttClient>,
    pub llm: Arc<dyn LlmClient>,
    pub tts: Arc<dyn TtsClient>,
    pub executor: Arc<CallExecutor>,

    // ── Observability (C13) ─────────────────────────────────────────────
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// `/ready`'s DB leg (§4.13).
    pub async fn store_health(&self) -> bool {
        self.store.is_reachable().await
    }
}
