//! Shared error type used across all ringline crates, modeled on the error
//! taxonomy in SPEC_FULL.md §7.

/// Error taxonomy for the voice-calling pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// STT/LLM/TTS network or 5xx failure. Handled locally per §4.6.9;
    /// never propagated to the caller.
    #[error("transient provider error ({provider}): {message}")]
    TransientProvider { provider: String, message: String },

    /// Malformed JSON or missing fields from a provider response.
    #[error("provider contract violated ({provider}): {message}")]
    ProviderContract { provider: String, message: String },

    /// Bad base64 or non-integral PCM length.
    #[error("audio format error: {0}")]
    AudioFormat(String),

    /// Session-store KV unreachable; caller falls through to the in-process map.
    #[error("session store error: {0}")]
    SessionStore(String),

    /// Unknown WebSocket event or frame parse failure.
    #[error("gateway protocol error: {0}")]
    GatewayProtocol(String),

    /// Relational store failure during executor/scheduler operations.
    #[error("database error: {0}")]
    Database(String),

    /// Caller hung up / WebSocket closed while a call was in flight.
    #[error("terminal call error: {0}")]
    TerminalCall(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The taxonomy label used for `errors_total{type}` (§4.13).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::Timeout(_) => "timeout",
            Error::TransientProvider { .. } => "transient_provider",
            Error::ProviderContract { .. } => "provider_contract",
            Error::AudioFormat(_) => "audio_format",
            Error::SessionStore(_) => "session_store",
            Error::GatewayProtocol(_) => "gateway_protocol",
            Error::Database(_) => "database",
            Error::TerminalCall(_) => "terminal_call",
            Error::Config(_) => "config",
            Error::Auth(_) => "auth",
            Error::Other(_) => "other",
        }
    }
}
