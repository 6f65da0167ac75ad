//! Core data model: Lead, Campaign, ScheduledCall, CallSession,
//! ConversationSession — SPEC_FULL.md §3.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lead
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyInterest {
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub budget: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub display_name: String,
    /// E.164 phone number.
    pub phone: String,
    pub interest: PropertyInterest,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub call_attempts: u32,
    pub last_call_attempt: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Campaign
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    /// Legal forward transitions — the lifecycle DAG of spec §3.
    pub fn can_transition_to(self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Scheduled, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Cancelled)
                | (Scheduled, Cancelled)
                | (Paused, Cancelled)
        )
    }

    /// A paused campaign must not yield new scheduled calls (§3 invariant).
    pub fn accepts_new_scheduled_calls(self) -> bool {
        matches!(self, CampaignStatus::Running | CampaignStatus::Scheduled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    /// [start_hour, end_hour) in local time, both 0..=23.
    pub calling_hours_start: u8,
    pub calling_hours_end: u8,
    pub max_attempts: u32,
    pub retry_delay_hours: i64,
    pub max_concurrent_calls: u32,
    #[serde(default)]
    pub calls_initiated: u64,
    #[serde(default)]
    pub calls_completed: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ScheduledCall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledCallStatus {
    Pending,
    Calling,
    Completed,
    Failed,
    Cancelled,
    MaxRetriesReached,
}

impl ScheduledCallStatus {
    /// Non-terminal statuses count toward the "at most one per (lead,
    /// campaign)" invariant (§3, testable property 4).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ScheduledCallStatus::Completed
                | ScheduledCallStatus::Cancelled
                | ScheduledCallStatus::MaxRetriesReached
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledCall {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub lead_id: Uuid,
    pub target_time: DateTime<Utc>,
    pub status: ScheduledCallStatus,
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub current_call_sid: Option<String>,
    pub failure_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CallSession (durable)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Qualified,
    NotInterested,
    CallbackRequested,
    NoAnswer,
    Disconnected,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Agent,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    pub id: Uuid,
    /// Telephony provider's call id — globally unique.
    pub call_sid: String,
    pub lead_id: Uuid,
    pub scheduled_call_id: Option<Uuid>,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub duration_seconds: Option<i64>,
    pub recording_url: Option<String>,
    pub full_transcript: Vec<TranscriptLine>,
    pub collected_data: serde_json::Value,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(call_sid: String, lead_id: Uuid, scheduled_call_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            call_sid,
            lead_id,
            scheduled_call_id,
            status: CallStatus::Initiated,
            outcome: None,
            duration_seconds: None,
            recording_url: None,
            full_transcript: Vec::new(),
            collected_data: serde_json::json!({}),
            answered_at: None,
            ended_at: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationSession (live)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Purpose,
    Budget,
    Timeline,
    Location,
    PropertyType,
    Other,
}

/// The hot state of one in-flight call, owned by exactly one turn
/// controller for the lifetime of its WebSocket (§3 ownership rule).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub call_sid: String,
    pub stream_sid: String,
    pub lead_id: Uuid,
    pub lead_name: String,
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub budget: Option<i64>,

    // Pipeline state.
    #[serde(default)]
    pub audio_buffer: Vec<u8>,
    #[serde(default)]
    pub silence_chunk_count: u32,
    #[serde(default)]
    pub speech_active: bool,
    #[serde(default)]
    pub is_bot_speaking: bool,
    #[serde(default)]
    pub waiting_for_response: bool,
    #[serde(default)]
    pub should_stop_speaking: bool,

    // Conversational context.
    #[serde(default)]
    pub transcript_history: Vec<TranscriptLine>,
    #[serde(default)]
    pub collected_data: HashMap<String, serde_json::Value>,
    pub last_agent_question: Option<String>,
    pub last_agent_question_type: Option<QuestionType>,
    #[serde(default)]
    pub objections_encountered: Vec<String>,
    pub session_start_time: DateTime<Utc>,
    pub last_interaction_time: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(
        call_sid: String,
        stream_sid: String,
        lead_id: Uuid,
        lead_name: String,
        property_type: Option<String>,
        location: Option<String>,
        budget: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            call_sid,
            stream_sid,
            lead_id,
            lead_name,
            property_type,
            location,
            budget,
            audio_buffer: Vec::new(),
            silence_chunk_count: 0,
            speech_active: false,
            is_bot_speaking: false,
            waiting_for_response: false,
            should_stop_speaking: false,
            transcript_history: Vec::new(),
            collected_data: HashMap::new(),
            last_agent_question: None,
            last_agent_question_type: None,
            objections_encountered: Vec::new(),
            session_start_time: now,
            last_interaction_time: now,
        }
    }

    /// §3 invariant: `is_bot_speaking ⇒ ¬waiting_for_response`.
    pub fn check_invariants(&self) -> bool {
        if self.is_bot_speaking && self.waiting_for_response {
            return false;
        }
        if self.should_stop_speaking && !self.is_bot_speaking {
            return false;
        }
        true
    }

    pub fn append_transcript(&mut self, speaker: Speaker, text: String) {
        self.transcript_history.push(TranscriptLine {
            speaker,
            text,
            timestamp: Utc::now(),
        });
        self.last_interaction_time = Utc::now();
    }

    /// Extracted data merges without silently dropping existing fields:
    /// later values win only when non-null (§3 invariant).
    pub fn merge_collected_data(&mut self, extracted: serde_json::Map<String, serde_json::Value>) {
        for (key, value) in extracted {
            if value.is_null() {
                continue;
            }
            self.collected_data.insert(key, value);
        }
    }

    pub fn last_n_agent_turns(&self, n: usize) -> Vec<&str> {
        self.transcript_history
            .iter()
            .rev()
            .filter(|line| line.speaker == Speaker::Agent)
            .take(n)
            .map(|line| line.text.as_str())
            .collect()
    }

    pub fn reset_to_intro(&mut self) {
        self.transcript_history.clear();
        self.collected_data.clear();
        self.last_agent_question = None;
        self.last_agent_question_type = None;
        self.objections_encountered.clear();
        self.audio_buffer.clear();
        self.silence_chunk_count = 0;
        self.speech_active = false;
        self.is_bot_speaking = false;
        self.waiting_for_response = false;
        self.should_stop_speaking = false;
        self.session_start_time = Utc::now();
        self.last_interaction_time = Utc::now();
    }

    /// Copies transcript/collected_data onto a durable CallSession at call
    /// end (§3 "Ownership & lifecycle", testable property 3).
    pub fn finalize_into(&self, call: &mut CallSession) {
        call.full_transcript = self.transcript_history.clone();
        call.collected_data =
            serde_json::to_value(&self.collected_data).unwrap_or_else(|_| serde_json::json!({}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violated_when_speaking_and_waiting() {
        let mut s = ConversationSession::new(
            "CA1".into(),
            "ST1".into(),
            Uuid::new_v4(),
            "Rajesh".into(),
            None,
            None,
            None,
        );
        s.is_bot_speaking = true;
        s.waiting_for_response = true;
        assert!(!s.check_invariants());
    }

    #[test]
    fn invariant_holds_by_default() {
        let s = ConversationSession::new(
            "CA1".into(),
            "ST1".into(),
            Uuid::new_v4(),
            "Rajesh".into(),
            None,
            None,
            None,
        );
        assert!(s.check_invariants());
    }

    #[test]
    fn merge_collected_data_drops_nulls_and_keeps_existing() {
        let mut s = ConversationSession::new(
            "CA1".into(),
            "ST1".into(),
            Uuid::new_v4(),
            "Rajesh".into(),
            None,
            None,
            None,
        );
        s.collected_data
            .insert("budget".into(), serde_json::json!("80L"));
        let mut extracted = serde_json::Map::new();
        extracted.insert("timeline".into(), serde_json::json!("3_months"));
        extracted.insert("budget".into(), serde_json::Value::Null);
        s.merge_collected_data(extracted);
        assert_eq!(s.collected_data.get("budget").unwrap(), "80L");
        assert_eq!(s.collected_data.get("timeline").unwrap(), "3_months");
    }

    #[test]
    fn campaign_paused_does_not_accept_new_calls() {
        assert!(!CampaignStatus::Paused.accepts_new_scheduled_calls());
        assert!(CampaignStatus::Running.accepts_new_scheduled_calls());
    }

    #[test]
    fn campaign_status_transitions_form_dag() {
        assert!(CampaignStatus::Draft.can_transition_to(CampaignStatus::Scheduled));
        assert!(!CampaignStatus::Completed.can_transition_to(CampaignStatus::Running));
    }
}
