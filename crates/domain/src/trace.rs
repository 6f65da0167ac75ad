use serde::Serialize;

/// Structured trace events emitted across the voice-calling pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    TurnStarted {
        call_sid: String,
        stage: String,
    },
    UtteranceTooShort {
        call_sid: String,
        bytes: usize,
    },
    BargeIn {
        call_sid: String,
        detected_at_chunk: u64,
    },
    SttResult {
        call_sid: String,
        confidence: Option<f32>,
        accepted: bool,
    },
    LlmRequest {
        call_sid: String,
        duration_ms: u64,
        parsed_ok: bool,
    },
    RepetitionBlocked {
        call_sid: String,
        jaccard: f32,
    },
    AlreadyCollectedBlocked {
        call_sid: String,
        field: String,
    },
    WrongNameOverride {
        call_sid: String,
    },
    CallFinalized {
        call_sid: String,
        outcome: String,
        transcript_lines: usize,
    },
    ScheduledCallCreated {
        campaign_id: String,
        lead_id: String,
        target_time: String,
    },
    RetryScheduled {
        scheduled_call_id: String,
        attempt_number: u32,
        reason: String,
    },
    MaxRetriesReached {
        scheduled_call_id: String,
    },
    CallExecuted {
        scheduled_call_id: String,
        call_sid: Option<String>,
        ok: bool,
    },
    WebhookReceived {
        call_sid: String,
        status: String,
    },
    EscalationRequested {
        call_sid: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ringline_event");
    }
}
