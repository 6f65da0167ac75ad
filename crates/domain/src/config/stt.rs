use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT (C3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_locale")]
    pub locale: String,
    /// Transcripts below this confidence are discarded (§4.3, §8 I-3).
    #[serde(default = "d_min_confidence")]
    pub min_confidence: f32,
    /// Keyword-bias list passed to the provider to improve recognition
    /// of domain terms (property types, Indian city names).
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "d_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key_env: d_api_key_env(),
            locale: d_locale(),
            min_confidence: d_min_confidence(),
            keywords: Vec::new(),
            request_timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_api_key_env() -> String {
    "DEEPGRAM_API_KEY".into()
}
fn d_locale() -> String {
    "en-IN".into()
}
fn d_min_confidence() -> f32 {
    0.65
}
fn d_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SttConfig::default();
        assert_eq!(cfg.locale, "en-IN");
        assert!((cfg.min_confidence - 0.65).abs() < 1e-6);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: SttConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.api_key_env, "DEEPGRAM_API_KEY");
        assert!(cfg.keywords.is_empty());
    }
}
