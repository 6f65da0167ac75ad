//! AppState construction and background-task spawning, extracted from
//! `main.rs` the way the teacher's `bootstrap.rs` does.

use std::sync::Arc;

use anyhow::Context;
use ringline_domain::config::{Config, ConfigSeverity};
use ringline_providers::{DeepgramSttClient, ElevenLabsTtsClient, OpenAiLlmClient};
use ringline_sessions::SessionStore;

use crate::db::{PgStore, SharedStore};
use crate::executor::CallExecutor;
use crate::interrupt::InterruptFlags;
use crate::metrics::Metrics;
use crate::scheduler::ConcurrencyGuard;
use crate::state::AppState;
use crate::worker::Worker;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. Shared boot path for `serve` and `config validate`-adjacent
/// commands.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Durable store ────────────────────────────────────────────────
    let pg = PgStore::connect(&config.database)
        .await
        .context("connecting to database")?;
    pg.migrate().await.context("running database migrations")?;
    let store: SharedStore = Arc::new(pg);
    tracing::info!("durable store ready");

    // ── Live session store ───────────────────────────────────────────
    let session_store = Arc::new(
        SessionStore::new(&config.session_store).context("initializing session store")?,
    );
    tracing::info!(
        redis = session_store.redis_available(),
        "live session store ready"
    );

    // ── Providers (C3, C4, C5) ───────────────────────────────────────
    let stt: Arc<dyn ringline_providers::SttClient> =
        Arc::new(DeepgramSttClient::from_config(&config.stt).context("initializing STT client")?);
    let llm: Arc<dyn ringline_providers::LlmClient> =
        Arc::new(OpenAiLlmClient::from_config(&config.llm).context("initializing LLM client")?);
    let tts: Arc<dyn ringline_providers::TtsClient> = Arc::new(
        ElevenLabsTtsClient::from_config(&config.tts).context("initializing TTS client")?,
    );
    tracing::info!("provider clients ready");

    // ── Telephony executor (C9) ──────────────────────────────────────
    let executor = Arc::new(
        CallExecutor::from_config(&config.telephony, config.telephony.our_base_url.clone())
            .context("initializing telephony executor")?,
    );
    tracing::info!("telephony executor ready");

    // ── Call-local state ─────────────────────────────────────────────
    let interrupt_flags = Arc::new(InterruptFlags::new());
    let concurrency = Arc::new(ConcurrencyGuard::new());

    // ── Metrics ───────────────────────────────────────────────────────
    let metrics = Arc::new(Metrics::new());
    tracing::info!("metrics registry ready");

    Ok(AppState {
        config,
        store,
        session_store,
        interrupt_flags,
        concurrency,
        stt,
        llm,
        tts,
        executor,
        metrics,
    })
}

/// Spawn the long-running background tokio tasks: the outbound worker
/// loop (C11) is the only one this system needs continuously running.
pub fn spawn_background_tasks(state: &AppState) {
    let worker = Worker::new(
        state.store.clone(),
        state.executor.clone(),
        state.concurrency.clone(),
        &state.config.scheduling,
    );
    tokio::spawn(worker.run());
    tracing::info!("worker loop spawned");
}
