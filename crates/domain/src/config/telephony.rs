use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telephony provider (C9 call executor, C12 webhook)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exotel account credentials and the public base URL the telephony
/// provider calls back into for status webhooks and WebSocket media
/// streaming (§4.9, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(default = "d_account_env")]
    pub account_sid_env: String,
    #[serde(default = "d_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_token_env")]
    pub api_token_env: String,
    /// The virtual number calls are placed from.
    pub virtual_number: String,
    /// Exotel App/flow ID the connect call is routed through.
    pub flow_id: String,
    /// Public base URL (`OUR_BASE_URL`) registered with the provider for
    /// `StatusCallback` and the WebSocket media stream.
    pub our_base_url: String,
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn d_account_env() -> String {
    "EXOTEL_ACCOUNT_SID".into()
}
fn d_key_env() -> String {
    "EXOTEL_API_KEY".into()
}
fn d_token_env() -> String {
    "EXOTEL_API_TOKEN".into()
}
fn d_connect_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_env_names() {
        assert_eq!(d_account_env(), "EXOTEL_ACCOUNT_SID");
        assert_eq!(d_key_env(), "EXOTEL_API_KEY");
        assert_eq!(d_token_env(), "EXOTEL_API_TOKEN");
    }

    #[test]
    fn deserialize_minimal() {
        let toml_str = r#"
            virtual_number = "+911234567890"
            flow_id = "12345"
            our_base_url = "https://ringline.example.com"
        "#;
        let cfg: TelephonyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.connect_timeout_ms, 10_000);
        assert_eq!(cfg.account_sid_env, "EXOTEL_ACCOUNT_SID");
    }
}
