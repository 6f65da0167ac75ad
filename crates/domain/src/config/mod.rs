mod database;
mod llm;
mod observability;
mod scheduling;
mod server;
mod session_store;
mod stt;
mod telephony;
mod tts;

pub use database::*;
pub use llm::*;
pub use observability::*;
pub use scheduling::*;
pub use server::*;
pub use session_store::*;
pub use stt::*;
pub use telephony::*;
pub use tts::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub telephony: TelephonyConfig,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub session_store: SessionStoreConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        // Telephony
        if self.telephony.virtual_number.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "telephony.virtual_number".into(),
                message: "virtual_number must not be empty".into(),
            });
        }
        if self.telephony.flow_id.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "telephony.flow_id".into(),
                message: "flow_id must not be empty".into(),
            });
        }
        if !self.telephony.our_base_url.starts_with("http://")
            && !self.telephony.our_base_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "telephony.our_base_url".into(),
                message: format!(
                    "our_base_url must start with http:// or https:// (got \"{}\")",
                    self.telephony.our_base_url
                ),
            });
        }

        // STT
        if !(0.0..=1.0).contains(&self.stt.min_confidence) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "stt.min_confidence".into(),
                message: "min_confidence must be between 0.0 and 1.0".into(),
            });
        }

        // LLM
        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.llm.base_url
                ),
            });
        }
        if self.llm.max_tokens == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "llm.max_tokens".into(),
                message: "max_tokens must be greater than 0".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.temperature".into(),
                message: "temperature outside the usual 0.0-2.0 range".into(),
            });
        }

        // TTS
        if self.tts.voice_id.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "tts.voice_id".into(),
                message: "voice_id must not be empty".into(),
            });
        }

        // Scheduling: calling-hours fence (§8 I-9).
        if self.scheduling.calling_hours_start >= self.scheduling.calling_hours_end {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduling.calling_hours_start".into(),
                message: format!(
                    "calling_hours_start ({}) must be less than calling_hours_end ({})",
                    self.scheduling.calling_hours_start, self.scheduling.calling_hours_end
                ),
            });
        }
        if self.scheduling.calling_hours_end > 23 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduling.calling_hours_end".into(),
                message: "calling_hours_end must be <= 23".into(),
            });
        }
        if self.scheduling.max_concurrent_calls == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduling.max_concurrent_calls".into(),
                message: "max_concurrent_calls must be greater than 0".into(),
            });
        }
        if self.scheduling.retry.max_retries == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "scheduling.retry.max_retries".into(),
                message: "max_retries is 0: no scheduled call will ever be retried".into(),
            });
        }

        // Session store: warn when no Redis is configured (in-process
        // fallback only — lost on restart, §7 SessionStore).
        if self.session_store.redis_url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "session_store.redis_url".into(),
                message: "no redis_url configured; sessions live only in the in-process map and are lost on restart".into(),
            });
        }
        if self.session_store.ttl_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "session_store.ttl_secs".into(),
                message: "ttl_secs must be greater than 0".into(),
            });
        }

        // Database
        if self.database.url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "database.url".into(),
                message: "url must not be empty".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal valid Config.
    fn valid_config() -> Config {
        Config {
            server: ServerConfig::default(),
            telephony: TelephonyConfig {
                account_sid_env: "EXOTEL_ACCOUNT_SID".into(),
                api_key_env: "EXOTEL_API_KEY".into(),
                api_token_env: "EXOTEL_API_TOKEN".into(),
                virtual_number: "+911234567890".into(),
                flow_id: "12345".into(),
                our_base_url: "https://ringline.example.com".into(),
                connect_timeout_ms: 10_000,
            },
            stt: SttConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig {
                api_key_env: "ELEVENLABS_API_KEY".into(),
                voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
                stability: 0.40,
                similarity_boost: 0.75,
                style: 0.15,
                request_timeout_ms: 8_000,
            },
            scheduling: SchedulingConfig::default(),
            session_store: SessionStoreConfig {
                redis_url: Some("redis://localhost:6379".into()),
                ..SessionStoreConfig::default()
            },
            database: DatabaseConfig {
                url: "postgres://localhost/ringline".into(),
                max_connections: 10,
                connect_timeout_ms: 5_000,
            },
            observability: ObservabilityConfig::default(),
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_host_empty_is_error() {
        let mut cfg = valid_config();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.host").expect("expected server.host error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins")
            .expect("expected CORS wildcard warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn telephony_virtual_number_empty_is_error() {
        let mut cfg = valid_config();
        cfg.telephony.virtual_number = String::new();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "telephony.virtual_number")
                .unwrap()
                .severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn telephony_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.telephony.our_base_url = "ftp://example.com".into();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "telephony.our_base_url")
                .unwrap()
                .severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn stt_min_confidence_out_of_range_is_error() {
        let mut cfg = valid_config();
        cfg.stt.min_confidence = 1.5;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "stt.min_confidence").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn llm_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.base_url = "ws://localhost:1234".into();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "llm.base_url").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn llm_max_tokens_zero_is_error() {
        let mut cfg = valid_config();
        cfg.llm.max_tokens = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "llm.max_tokens").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn tts_voice_id_empty_is_error() {
        let mut cfg = valid_config();
        cfg.tts.voice_id = String::new();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "tts.voice_id").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn calling_hours_start_after_end_is_error() {
        let mut cfg = valid_config();
        cfg.scheduling.calling_hours_start = 20;
        cfg.scheduling.calling_hours_end = 9;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "scheduling.calling_hours_start")
            .expect("expected calling hours error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn calling_hours_equal_is_error() {
        let mut cfg = valid_config();
        cfg.scheduling.calling_hours_start = 9;
        cfg.scheduling.calling_hours_end = 9;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "scheduling.calling_hours_start").is_some());
    }

    #[test]
    fn max_concurrent_calls_zero_is_error() {
        let mut cfg = valid_config();
        cfg.scheduling.max_concurrent_calls = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "scheduling.max_concurrent_calls")
                .unwrap()
                .severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn max_retries_zero_is_warning() {
        let mut cfg = valid_config();
        cfg.scheduling.retry.max_retries = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "scheduling.retry.max_retries")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
    }

    #[test]
    fn no_redis_url_is_warning() {
        let mut cfg = valid_config();
        cfg.session_store.redis_url = None;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "session_store.redis_url")
            .expect("expected redis warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn session_ttl_zero_is_error() {
        let mut cfg = valid_config();
        cfg.session_store.ttl_secs = 0;
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "session_store.ttl_secs")
                .unwrap()
                .severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn database_url_empty_is_error() {
        let mut cfg = valid_config();
        cfg.database.url = String::new();
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "database.url").unwrap().severity,
            ConfigSeverity::Error
        );
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );

        let warn = ConfigError {
            severity: ConfigSeverity::Warning,
            field: "session_store.redis_url".into(),
            message: "no redis_url configured".into(),
        };
        assert_eq!(
            format!("{warn}"),
            "[WARN] session_store.redis_url: no redis_url configured"
        );
    }
}
