use ringline_domain::error::Result;
use ringline_domain::model::{QuestionType, TranscriptLine};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STT (C3)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
}

#[async_trait::async_trait]
pub trait SttClient: Send + Sync {
    /// `Ok(None)` when the transcript's confidence fell below the
    /// configured floor — silently dropped per §4.3, never forwarded
    /// to the LLM.
    async fn transcribe(&self, pcm: &[u8], call_id: &str) -> Result<Option<Transcript>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM (C4)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AskingBudget,
    ConfirmingInterest,
    Objecting,
    RequestingCallback,
    NotInterested,
    ReadyToVisit,
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    AskQuestion,
    Respond,
    ScheduleVisit,
    EndCall,
}

/// Raw JSON contract the LLM is instructed to emit, before defaulting
/// (§4.4). Optional fields reflect the provider may omit or null them.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponseJson {
    pub intent: Option<Intent>,
    pub next_action: Option<NextAction>,
    pub response_text: Option<String>,
    pub should_end_call: Option<bool>,
    #[serde(default)]
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    pub last_question_asked: Option<String>,
    pub question_type: Option<QuestionType>,
    pub customer_mid_sentence: Option<bool>,
}

/// The defaulted, always-complete result the turn controller consumes.
#[derive(Debug, Clone)]
pub struct LlmResult {
    pub intent: Intent,
    pub next_action: NextAction,
    pub response_text: String,
    pub should_end_call: bool,
    pub extracted_data: serde_json::Map<String, serde_json::Value>,
    pub last_question_asked: Option<String>,
    pub question_type: Option<QuestionType>,
    pub customer_mid_sentence: bool,
}

impl LlmResult {
    /// The canned fallback used on parse failure or missing fields (§4.4).
    pub fn safe_default() -> Self {
        Self {
            intent: Intent::Unclear,
            next_action: NextAction::Respond,
            response_text: "Sorry, could you repeat that?".into(),
            should_end_call: false,
            extracted_data: serde_json::Map::new(),
            last_question_asked: None,
            question_type: None,
            customer_mid_sentence: false,
        }
    }
}

impl From<LlmResponseJson> for LlmResult {
    fn from(raw: LlmResponseJson) -> Self {
        let default = Self::safe_default();
        Self {
            intent: raw.intent.unwrap_or(default.intent),
            next_action: raw.next_action.unwrap_or(default.next_action),
            response_text: raw
                .response_text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(default.response_text),
            should_end_call: raw.should_end_call.unwrap_or(default.should_end_call),
            extracted_data: raw.extracted_data,
            last_question_asked: raw.last_question_asked,
            question_type: raw.question_type,
            customer_mid_sentence: raw.customer_mid_sentence.unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LeadContext {
    pub lead_name: String,
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub budget: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub user_input: String,
    /// Most recent speaker turns, already truncated to `history_turns`.
    pub history: Vec<TranscriptLine>,
    pub lead_context: LeadContext,
    pub system_prompt: String,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, req: LlmRequest) -> Result<LlmResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TTS (C5)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait TtsClient: Send + Sync {
    /// Telephony-ready PCM: 8 kHz/16-bit/mono (§4.5 — C1 transcodes).
    async fn synthesize(&self, text: &str, call_id: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_defaults_are_safe() {
        let raw: LlmResponseJson = serde_json::from_str("{}").unwrap();
        let result: LlmResult = raw.into();
        assert_eq!(result.intent, Intent::Unclear);
        assert_eq!(result.next_action, NextAction::Respond);
        assert!(!result.should_end_call);
        assert_eq!(result.response_text, "Sorry, could you repeat that?");
    }

    #[test]
    fn blank_response_text_falls_back_to_default() {
        let json = r#"{"response_text": "   "}"#;
        let raw: LlmResponseJson = serde_json::from_str(json).unwrap();
        let result: LlmResult = raw.into();
        assert_eq!(result.response_text, "Sorry, could you repeat that?");
    }

    #[test]
    fn full_response_parses_without_defaulting() {
        let json = r#"{
            "intent": "asking_budget",
            "next_action": "ask_question",
            "response_text": "What's your budget range?",
            "should_end_call": false,
            "extracted_data": {"location": "Whitefield"},
            "last_question_asked": "What's your budget range?",
            "question_type": "budget",
            "customer_mid_sentence": false
        }"#;
        let raw: LlmResponseJson = serde_json::from_str(json).unwrap();
        let result: LlmResult = raw.into();
        assert_eq!(result.intent, Intent::AskingBudget);
        assert_eq!(result.next_action, NextAction::AskQuestion);
        assert_eq!(
            result.extracted_data.get("location").unwrap(),
            "Whitefield"
        );
    }
}
