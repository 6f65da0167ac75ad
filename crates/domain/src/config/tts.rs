use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS (C5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fixed voice and synthesis parameters — one voice, no per-call
/// selection, matching the original's single sales-agent persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    pub voice_id: String,
    #[serde(default = "d_stability")]
    pub stability: f64,
    #[serde(default = "d_similarity")]
    pub similarity_boost: f64,
    #[serde(default = "d_style")]
    pub style: f64,
    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn d_api_key_env() -> String {
    "ELEVENLABS_API_KEY".into()
}
fn d_stability() -> f64 {
    0.40
}
fn d_similarity() -> f64 {
    0.75
}
fn d_style() -> f64 {
    0.15
}
fn d_timeout_ms() -> u64 {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal() {
        let toml_str = r#"voice_id = "21m00Tcm4TlvDq8ikWAM""#;
        let cfg: TtsConfig = toml::from_str(toml_str).unwrap();
        assert!((cfg.stability - 0.40).abs() < 1e-9);
        assert!((cfg.similarity_boost - 0.75).abs() < 1e-9);
        assert!((cfg.style - 0.15).abs() < 1e-9);
    }
}
