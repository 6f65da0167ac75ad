use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler / worker (C10, C11)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Calling-window and concurrency limits for the outbound scheduler.
/// Hours are server-local (§9 Open Question: server-local time with
/// Sunday-only skip, resolved as-is).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// First hour of the day (0-23, inclusive) calls may be placed.
    #[serde(default = "d_hours_start")]
    pub calling_hours_start: u8,
    /// Last hour of the day (0-23, exclusive) calls may be placed.
    #[serde(default = "d_hours_end")]
    pub calling_hours_end: u8,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_calls: u32,
    #[serde(default = "d_max_duration")]
    pub max_call_duration_minutes: u32,
    #[serde(default = "d_tick_secs")]
    pub worker_tick_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            calling_hours_start: d_hours_start(),
            calling_hours_end: d_hours_end(),
            max_concurrent_calls: d_max_concurrent(),
            max_call_duration_minutes: d_max_duration(),
            worker_tick_secs: d_tick_secs(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry delay per terminal outcome, and the retry ceiling (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_no_answer_delay")]
    pub no_answer_delay_minutes: u32,
    #[serde(default = "d_busy_delay")]
    pub busy_delay_minutes: u32,
    #[serde(default = "d_failed_delay")]
    pub failed_delay_minutes: u32,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            no_answer_delay_minutes: d_no_answer_delay(),
            busy_delay_minutes: d_busy_delay(),
            failed_delay_minutes: d_failed_delay(),
            max_retries: d_max_retries(),
        }
    }
}

fn d_hours_start() -> u8 {
    9
}
fn d_hours_end() -> u8 {
    20
}
fn d_max_concurrent() -> u32 {
    5
}
fn d_max_duration() -> u32 {
    15
}
fn d_tick_secs() -> u64 {
    30
}
fn d_no_answer_delay() -> u32 {
    120
}
fn d_busy_delay() -> u32 {
    240
}
fn d_failed_delay() -> u32 {
    60
}
fn d_max_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SchedulingConfig::default();
        assert_eq!(cfg.calling_hours_start, 9);
        assert_eq!(cfg.calling_hours_end, 20);
        assert_eq!(cfg.retry.no_answer_delay_minutes, 120);
        assert_eq!(cfg.retry.busy_delay_minutes, 240);
        assert_eq!(cfg.retry.failed_delay_minutes, 60);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: SchedulingConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.max_concurrent_calls, 5);
    }
}
