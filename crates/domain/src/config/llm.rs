use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM (conversation engine) configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the single chat-completion provider used by the
/// turn controller (C4). One provider, one model — no routing, no
/// tool calls, no streaming; see spec §4.4 and §9 Open Questions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the OpenAI-compatible chat completions endpoint.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Env var holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_temperature")]
    pub temperature: f64,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Ask the provider for a JSON-mode response (`response_format`).
    #[serde(default = "d_true")]
    pub json_mode: bool,
    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Number of most recent turns kept in the prompt history (§4.6.6).
    #[serde(default = "d_history_turns")]
    pub history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            model: d_model(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            json_mode: true,
            request_timeout_ms: d_timeout_ms(),
            history_turns: d_history_turns(),
        }
    }
}

fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_temperature() -> f64 {
    0.8
}
fn d_max_tokens() -> u32 {
    200
}
fn d_timeout_ms() -> u64 {
    8_000
}
fn d_history_turns() -> usize {
    8
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = LlmConfig::default();
        assert_eq!(cfg.model, "gpt-4o-mini");
        assert!((cfg.temperature - 0.8).abs() < 1e-9);
        assert_eq!(cfg.max_tokens, 200);
        assert_eq!(cfg.history_turns, 8);
        assert!(cfg.json_mode);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: LlmConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.base_url, "https://api.openai.com/v1");
        assert_eq!(cfg.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn deserialize_overrides() {
        let toml_str = r#"
            model = "gpt-4o"
            temperature = 0.3
            max_tokens = 120
        "#;
        let cfg: LlmConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.model, "gpt-4o");
        assert!((cfg.temperature - 0.3).abs() < 1e-9);
        assert_eq!(cfg.max_tokens, 120);
    }
}
