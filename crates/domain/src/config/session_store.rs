use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store (C7)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration for the two-tier `ConversationSession` store: an
/// external KV (Redis) with an in-process fallback map, per spec §4.7.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStoreConfig {
    /// Redis connection string. When unset or unreachable, the store
    /// falls back to the in-process map only (§4.7, §7 SessionStore).
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Snapshot TTL in seconds; refreshed on every write.
    #[serde(default = "d_ttl_secs")]
    pub ttl_secs: u64,
    /// Key prefix under which snapshots are stored.
    #[serde(default = "d_key_prefix")]
    pub key_prefix: String,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            ttl_secs: d_ttl_secs(),
            key_prefix: d_key_prefix(),
        }
    }
}

fn d_ttl_secs() -> u64 {
    3_600
}
fn d_key_prefix() -> String {
    "ringline:session:".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_one_hour() {
        let cfg = SessionStoreConfig::default();
        assert_eq!(cfg.ttl_secs, 3_600);
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: SessionStoreConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.ttl_secs, 3_600);
        assert_eq!(cfg.key_prefix, "ringline:session:");
    }

    #[test]
    fn deserialize_with_redis_url() {
        let toml_str = r#"
            redis_url = "redis://localhost:6379"
            ttl_secs = 1800
        "#;
        let cfg: SessionStoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(cfg.ttl_secs, 1800);
    }
}
