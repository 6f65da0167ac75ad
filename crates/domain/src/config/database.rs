use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Database (relational store for Lead/Campaign/ScheduledCall/CallSession)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string (`DATABASE_URL`).
    pub url: String,
    #[serde(default = "d_max_connections")]
    pub max_connections: u32,
    #[serde(default = "d_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn d_max_connections() -> u32 {
    10
}
fn d_connect_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal() {
        let toml_str = r#"url = "postgres://localhost/ringline""#;
        let cfg: DatabaseConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.max_connections, 10);
    }
}
