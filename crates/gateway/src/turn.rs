//! Turn controller (C6): owns one call's [`ConversationSession`] for the
//! lifetime of its WebSocket. SPEC_FULL.md §4.6.
//!
//! Grounded on the conversation engine's turn loop (`engine.py`,
//! `event_handlers.py`) — STT → preprocess → LLM → validate/override →
//! speak — re-expressed as a single task driven by [`ProtocolEvent`]s off
//! an mpsc channel, owning the WebSocket write half directly (see
//! `ws.rs`'s module doc for why no separate writer task is needed).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use rand::seq::SliceRandom;
use regex::Regex;
use tokio::sync::mpsc;
use uuid::Uuid;

use ringline_audio::codec;
use ringline_audio::vad::{SegmentEvent, SegmenterState};
use ringline_domain::model::{
    CallOutcome, CallStatus, ConversationSession, Speaker, TranscriptLine,
};
use ringline_domain::trace::TraceEvent;
use ringline_providers::{Intent, LeadContext, LlmRequest, LlmResult, NextAction};

use crate::executor::CallCustomField;
use crate::state::AppState;
use crate::ws::ProtocolEvent;

/// Egress chunk size, matching C2's 20ms VAD framing (§4.6.1).
const EGRESS_CHUNK_MS: usize = 20;
/// Barge-in is checked every 3rd egress chunk, i.e. ~every 60ms.
const BARGE_IN_CHECK_EVERY: usize = 3;
/// How long the turn controller waits for the LLM before playing a filler
/// phrase to mask latency (§4.6.7).
const FILLER_LATENCY_MS: u64 = 300;

const CLARIFICATION_MESSAGES: &[&str] = &[
    "Sorry, I didn't catch that. Could you repeat?",
    "Sorry, could you say that again?",
    "Sorry, I missed that. Can you repeat?",
];

const FILLER_PHRASES: &[&str] = &["Hmm", "Okay", "Right"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Preprocessing (ported from the engine's input preprocessor)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod preprocessor {
    use regex::Regex;

    const TECHNICAL_PATTERNS: &[(&str, &str)] = &[
        (
            r"\b(am i|can you hear|do you hear|am i audible)\b",
            "Haan, I can hear you clearly! ",
        ),
        (r"\b(hello|are you there|you there)\b", "Haan, I'm here! "),
        (
            r"\b(can you understand|are you listening)\b",
            "Yes yes, perfectly! ",
        ),
    ];

    const FILLER_WORDS: &[&str] = &[
        "like", "umm", "uh", "so", "basically", "you know", "i mean", "well", "actually",
    ];

    const WRONG_NAME_NAMES: &[&str] = &["amit", "rahul", "priya", "ravi", "sanjay", "raj"];

    /// Canned prefix to prepend to the LLM's response when the utterance
    /// is just a technical/audio-quality check, not answered by waiting
    /// on the model (§4.6.4 — this never skips the LLM call itself).
    pub fn technical_prefix(user_input: &str) -> Option<&'static str> {
        let lower = user_input.to_lowercase();
        TECHNICAL_PATTERNS
            .iter()
            .find(|(pattern, _)| Regex::new(pattern).is_ok_and(|re| re.is_match(&lower)))
            .map(|(_, response)| *response)
    }

    /// Trailing filler words or a short filler-laden fragment suggest the
    /// caller hadn't finished talking when the segmenter closed the
    /// utterance. Logged for diagnostics; no session field tracks it.
    pub fn is_mid_sentence(text: &str) -> bool {
        let lower = text.to_lowercase();
        let trimmed = lower.trim();
        for filler in FILLER_WORDS {
            if trimmed.ends_with(filler)
                || trimmed.ends_with(&format!("{filler},"))
                || trimmed.ends_with(&format!("{filler}..."))
            {
                return true;
            }
        }
        if trimmed.ends_with("...")
            || trimmed.ends_with(',')
            || trimmed.ends_with("like")
            || trimmed.ends_with("like,")
        {
            return true;
        }
        let words: Vec<&str> = trimmed.split_whitespace().collect();
        words.len() <= 3 && words.iter().any(|w| FILLER_WORDS.contains(w))
    }

    /// A customer greeting the agent by one of a handful of commonly
    /// mis-heard names instead of "Alex" (e.g. "Hi Amit, ...").
    pub fn detect_wrong_name(user_input: &str) -> bool {
        let lower = user_input.to_lowercase();
        let names = WRONG_NAME_NAMES.join("|");
        let pattern = format!(r"\b(hi|hello|hey)\s+({names})\b");
        Regex::new(&pattern).is_ok_and(|re| re.is_match(&lower))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn technical_prefix_matches_hearing_check() {
            assert_eq!(
                technical_prefix("can you hear me ok?"),
                Some("Haan, I can hear you clearly! ")
            );
        }

        #[test]
        fn technical_prefix_none_for_unrelated_input() {
            assert_eq!(technical_prefix("I'm looking for a 2BHK"), None);
        }

        #[test]
        fn mid_sentence_detects_trailing_filler() {
            assert!(is_mid_sentence("so I was thinking, like"));
        }

        #[test]
        fn mid_sentence_false_for_complete_sentence() {
            assert!(!is_mid_sentence(
                "Yes, I'm interested in a 3BHK in Whitefield"
            ));
        }

        #[test]
        fn wrong_name_detects_greeting_by_mistaken_name() {
            assert!(detect_wrong_name("Hi Amit, how are you"));
        }

        #[test]
        fn wrong_name_ignores_bare_mention() {
            assert!(!detect_wrong_name("my neighbor Amit recommended you"));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Post-LLM validation tables (ported from the engine's response validator)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Jaccard-style word-overlap threshold above which a candidate response
/// is considered a repeat of something already said (§4.6.6). The engine
/// this was ported from uses a strict `> 0.8`; documented in DESIGN.md as
/// a deliberate `>=` per spec's threshold wording.
const REPETITION_SIMILARITY_THRESHOLD: f64 = 0.80;

const FALLBACK_QUESTIONS: &[&str] = &[
    "When are you ideally looking to move in?",
    "Have you started seeing any properties yet?",
    "Are you flexible with the location, or pretty set on this area?",
    "Is financing sorted, or would you need a home loan?",
];

const CLOSING_FALLBACK: &str = "Based on what you've told me, I think we have some great \
options. How about I arrange a site visit this weekend?";

const ENGAGED_SIGNALS: &[&str] = &[
    "how much",
    "when",
    "where",
    "what",
    "tell me",
    "interested",
    "show me",
    "visit",
    "see",
];

struct RepetitionField {
    key: &'static str,
    patterns: &'static [&'static str],
    progression: &'static str,
}

const REPETITION_FIELDS: &[RepetitionField] = &[
    RepetitionField {
        key: "purpose",
        patterns: &[
            "own use or investment",
            "self-use or investment",
            "for yourself or investment",
            "living or investment",
            "stay or investment",
        ],
        progression: "Got it. Have you started seeing any properties yet, or just exploring?",
    },
    RepetitionField {
        key: "budget",
        patterns: &["budget", "price range", "how much", "spend"],
        progression: "Perfect! When are you ideally looking to move - next few months?",
    },
    RepetitionField {
        key: "timeline",
        patterns: &["when.*move", "when.*looking to", "how soon", "timeline"],
        progression: "Great! Should I arrange a site visit for you this weekend?",
    },
    RepetitionField {
        key: "location",
        patterns: &[
            "which area",
            "specific area",
            "location preference",
            "where exactly",
        ],
        progression: "Cool! Are you flexible with the exact locality, or pretty set on this area?",
    },
    RepetitionField {
        key: "property_type",
        patterns: &[
            "how many bhk",
            "2bhk or 3bhk",
            "what size",
            "apartment or villa",
        ],
        progression: "Right. Is financing sorted, or would you need a home loan?",
    },
];

fn is_engaged_signal(user_input: &str) -> bool {
    let lower = user_input.to_lowercase();
    ENGAGED_SIGNALS.iter().any(|s| lower.contains(s))
}

/// `overlap / max(|a|, |b|)` over word sets, only meaningful once both
/// sides have more than 3 words (the engine's own guard against noise on
/// short replies).
fn word_overlap_similarity(a: &str, b: &str) -> Option<f64> {
    let aw: HashSet<&str> = a.split_whitespace().collect();
    let bw: HashSet<&str> = b.split_whitespace().collect();
    if aw.len() <= 3 || bw.len() <= 3 {
        return None;
    }
    let overlap = aw.intersection(&bw).count();
    Some(overlap as f64 / aw.len().max(bw.len()) as f64)
}

fn recent_repetition_score(candidate: &str, recent_agent_turns: &[&str]) -> Option<f64> {
    let candidate_lower = candidate.to_lowercase();
    let candidate_trimmed = candidate_lower.trim();
    for past in recent_agent_turns {
        let past_lower = past.to_lowercase();
        if candidate_trimmed == past_lower.trim() {
            return Some(1.0);
        }
        if let Some(sim) = word_overlap_similarity(&candidate_lower, &past_lower) {
            if sim >= REPETITION_SIMILARITY_THRESHOLD {
                return Some(sim);
            }
        }
    }
    None
}

fn pick_fallback_question(session: &ConversationSession) -> String {
    let recent = session.last_n_agent_turns(3);
    for &candidate in FALLBACK_QUESTIONS {
        if recent_repetition_score(candidate, &recent).is_none() {
            return candidate.to_string();
        }
    }
    CLOSING_FALLBACK.to_string()
}

fn already_collected_override(
    response_text: &str,
    session: &ConversationSession,
) -> Option<(&'static str, String)> {
    if session.collected_data.is_empty() || !response_text.contains('?') {
        return None;
    }
    let lower = response_text.to_lowercase();
    for field in REPETITION_FIELDS {
        let has_value = matches!(session.collected_data.get(field.key), Some(v) if !v.is_null());
        if !has_value {
            continue;
        }
        for pattern in field.patterns {
            if Regex::new(pattern).is_ok_and(|re| re.is_match(&lower)) {
                return Some((field.key, field.progression.to_string()));
            }
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_intro(lead_name: &str, property_type: Option<&str>, location: Option<&str>) -> String {
    let property_type = property_type.unwrap_or("property");
    let location = location.unwrap_or("your preferred area");
    format!(
        "Hi {lead_name}, Alex from PropertyHub. You inquired about {property_type} in \
         {location}. Is this a good time?"
    )
}

fn system_prompt(
    lead_name: &str,
    property_type: Option<&str>,
    location: Option<&str>,
    budget: Option<i64>,
) -> String {
    let property_type = property_type.unwrap_or("property");
    let location = location.unwrap_or("Bangalore");
    let budget = budget
        .map(|b| format!("₹{b}"))
        .unwrap_or_else(|| "Not specified".to_string());

    format!(
        "You are Alex, a friendly real estate agent from PropertyHub calling {lead_name}.\n\n\
         LEAD INFO:\n\
         - Name: {lead_name}\n\
         - Interested in: {property_type} in {location}\n\
         - Budget: {budget}\n\n\
         YOUR PERSONALITY (CRITICAL - THIS IS A VOICE CALL):\n\
         - Speak like you're chatting with a friend, NOT writing an email\n\
         - Use contractions: \"I'm\", \"you're\", \"won't\", \"that's\", \"let's\"\n\
         - Use fillers naturally: \"Okay\", \"Right\", \"Hmm\", \"Got it\", \"Cool\"\n\
         - Keep responses VERY short (1-2 sentences max)\n\
         - Indian English is fine - mix Hindi/English if natural (\"accha\", \"thik hai\", \"bas\")\n\
         - Sound relaxed, NOT robotic or scripted\n\n\
         RULES:\n\
         1. NEVER use formal language (\"I would like to...\", \"Kindly...\")\n\
         2. ALWAYS ask ONE question at a time\n\
         3. NEVER make up specific property details you don't have\n\
         4. If asked details, say: \"Let me WhatsApp you the full details, yeah?\"\n\
         5. Handle objections with empathy, then redirect\n\
         6. If they say \"not interested\" clearly, end the call politely\n\
         7. Goal: schedule a site visit, not close the deal on the phone\n\n\
         Respond with ONLY valid JSON: intent, next_action, response_text, should_end_call, \
         extracted_data ({{purpose, budget, timeline, location, property_type}}), \
         last_question_asked, question_type.\n\n\
         Remember: sound human, not like a bot reading a script. Be helpful, not pushy."
    )
}

fn derive_outcome(intent: Intent, next_action: NextAction) -> CallOutcome {
    match intent {
        Intent::NotInterested => CallOutcome::NotInterested,
        Intent::ReadyToVisit => CallOutcome::Qualified,
        _ if next_action == NextAction::ScheduleVisit => CallOutcome::Qualified,
        _ => CallOutcome::CallbackRequested,
    }
}

fn outcome_label(outcome: CallOutcome) -> &'static str {
    match outcome {
        CallOutcome::Qualified => "qualified",
        CallOutcome::NotInterested => "not_interested",
        CallOutcome::CallbackRequested => "callback_requested",
        CallOutcome::NoAnswer => "no_answer",
        CallOutcome::Disconnected => "disconnected",
        CallOutcome::Error => "error",
    }
}

fn recent_history(session: &ConversationSession, turns: usize) -> Vec<TranscriptLine> {
    let len = session.transcript_history.len();
    let start = len.saturating_sub(turns);
    session.transcript_history[start..].to_vec()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum SpeakOutcome {
    Completed,
    BargedIn,
    Disconnected,
}

pub struct Turn {
    state: AppState,
    sink: SplitSink<WebSocket, Message>,
    is_bot_speaking: Arc<AtomicBool>,
    session: Option<ConversationSession>,
    segmenter: SegmenterState,
}

impl Turn {
    pub fn new(
        state: AppState,
        sink: SplitSink<WebSocket, Message>,
        is_bot_speaking: Arc<AtomicBool>,
    ) -> Self {
        Self {
            state,
            sink,
            is_bot_speaking,
            session: None,
            segmenter: SegmenterState::default(),
        }
    }

    pub async fn run(&mut self, mut rx: mpsc::UnboundedReceiver<ProtocolEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ProtocolEvent::Start {
                    call_sid,
                    stream_sid,
                    caller: _,
                    lead_ctx,
                } => self.handle_start(call_sid, stream_sid, lead_ctx).await,
                ProtocolEvent::Media { pcm } => self.handle_media(pcm).await,
                ProtocolEvent::Stop => {
                    self.handle_stop().await;
                    break;
                }
                ProtocolEvent::Dtmf { digit } => {
                    if digit == "0" {
                        self.handle_escalation().await;
                        break;
                    }
                    tracing::debug!(digit = %digit, "dtmf received, no action bound");
                }
                ProtocolEvent::Clear => self.handle_clear().await,
            }
        }
        self.handle_stop().await;
    }

    async fn handle_start(
        &mut self,
        call_sid: String,
        stream_sid: String,
        lead_ctx: Option<CallCustomField>,
    ) {
        if self.session.is_some() {
            tracing::debug!(call_sid = %call_sid, "duplicate start event, ignoring");
            return;
        }

        let (lead_id, lead_name, property_type, location, budget) = match lead_ctx {
            Some(ctx) => (
                ctx.lead_id,
                ctx.lead_name,
                ctx.property_type,
                ctx.location,
                ctx.budget,
            ),
            None => (Uuid::nil(), "there".to_string(), None, None, None),
        };

        let mut session = ConversationSession::new(
            call_sid.clone(),
            stream_sid,
            lead_id,
            lead_name.clone(),
            property_type.clone(),
            location.clone(),
            budget,
        );

        TraceEvent::TurnStarted {
            call_sid: call_sid.clone(),
            stage: "greeting".into(),
        }
        .emit();

        let intro = build_intro(&lead_name, property_type.as_deref(), location.as_deref());
        match self.speak(&mut session, &intro).await {
            SpeakOutcome::Disconnected => self.finalize(session, CallOutcome::Disconnected).await,
            SpeakOutcome::BargedIn | SpeakOutcome::Completed => {
                self.persist_and_resume(session).await
            }
        }
    }

    /// `clear`: reset conversation back to the intro and re-greet, rather
    /// than tearing the call down (§4.8; the original's `handle_clear`
    /// resets stage/buffers/transcript/collected_data then replays
    /// `handle_start`).
    async fn handle_clear(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        session.reset_to_intro();

        TraceEvent::TurnStarted {
            call_sid: session.call_sid.clone(),
            stage: "greeting".into(),
        }
        .emit();

        let intro = build_intro(
            &session.lead_name,
            session.property_type.as_deref(),
            session.location.as_deref(),
        );
        match self.speak(&mut session, &intro).await {
            SpeakOutcome::Disconnected => self.finalize(session, CallOutcome::Disconnected).await,
            SpeakOutcome::BargedIn | SpeakOutcome::Completed => {
                self.persist_and_resume(session).await
            }
        }
    }

    /// DTMF "0": hand off to a human and end the call (§4.8; the
    /// original's `handle_dtmf` speaks a handoff line, marks
    /// `escalation_requested`, then closes the socket).
    async fn handle_escalation(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        TraceEvent::EscalationRequested {
            call_sid: session.call_sid.clone(),
        }
        .emit();

        let text = "Let me connect you with our team. Please hold.";
        match self.speak(&mut session, text).await {
            SpeakOutcome::Disconnected => self.finalize(session, CallOutcome::Disconnected).await,
            SpeakOutcome::BargedIn | SpeakOutcome::Completed => {
                self.finalize(session, CallOutcome::CallbackRequested).await
            }
        }
    }

    async fn handle_media(&mut self, pcm: Vec<u8>) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let accumulated = session.audio_buffer.len() + pcm.len();
        let event = self.segmenter.observe(&pcm, accumulated);
        session.audio_buffer.extend_from_slice(&pcm);

        match event {
            SegmentEvent::Continue => {
                self.session = Some(session);
            }
            SegmentEvent::UtteranceTooShort => {
                TraceEvent::UtteranceTooShort {
                    call_sid: session.call_sid.clone(),
                    bytes: session.audio_buffer.len(),
                }
                .emit();
                session.audio_buffer.clear();
                self.session = Some(session);
            }
            SegmentEvent::UtteranceComplete => {
                let utterance = std::mem::take(&mut session.audio_buffer);
                self.process_utterance(session, utterance).await;
            }
        }
    }

    async fn handle_stop(&mut self) {
        if let Some(session) = self.session.take() {
            self.finalize(session, CallOutcome::Disconnected).await;
        }
    }

    async fn process_utterance(&mut self, mut session: ConversationSession, pcm: Vec<u8>) {
        let stt_started = Instant::now();
        let transcribed = self.state.stt.transcribe(&pcm, &session.call_sid).await;
        self.state
            .metrics
            .record_stt_request(stt_started.elapsed().as_secs_f64());

        let transcript = match transcribed {
            Ok(Some(t)) => t,
            Ok(None) => {
                TraceEvent::SttResult {
                    call_sid: session.call_sid.clone(),
                    confidence: None,
                    accepted: false,
                }
                .emit();
                self.clarify_and_resume(session).await;
                return;
            }
            Err(e) => {
                tracing::warn!(call_sid = %session.call_sid, error = %e, "stt transcription failed");
                self.state.metrics.record_error(e.kind(), "stt");
                self.clarify_and_resume(session).await;
                return;
            }
        };
        TraceEvent::SttResult {
            call_sid: session.call_sid.clone(),
            confidence: Some(transcript.confidence),
            accepted: true,
        }
        .emit();

        let user_text = transcript.text;
        if user_text.trim().is_empty() {
            self.clarify_and_resume(session).await;
            return;
        }

        if preprocessor::is_mid_sentence(&user_text) {
            tracing::debug!(call_sid = %session.call_sid, "customer appears mid-sentence");
        }

        session.append_transcript(Speaker::User, user_text.clone());

        let request = LlmRequest {
            user_input: user_text.clone(),
            history: recent_history(&session, self.state.config.llm.history_turns),
            lead_context: LeadContext {
                lead_name: session.lead_name.clone(),
                property_type: session.property_type.clone(),
                location: session.location.clone(),
                budget: session.budget,
            },
            system_prompt: system_prompt(
                &session.lead_name,
                session.property_type.as_deref(),
                session.location.as_deref(),
                session.budget,
            ),
        };

        let llm_started = Instant::now();
        let mut result = self.generate_with_filler(&session, request).await;
        self.state.metrics.record_llm_request(
            &self.state.config.llm.model,
            llm_started.elapsed().as_secs_f64(),
        );
        TraceEvent::LlmRequest {
            call_sid: session.call_sid.clone(),
            duration_ms: llm_started.elapsed().as_millis() as u64,
            parsed_ok: true,
        }
        .emit();

        // Overrides only ever flip `should_end_call` back to false; they
        // never gate whether the repetition/already-collected guards below
        // run (§4.6.6, ordering confirmed against the engine's validator).
        if preprocessor::detect_wrong_name(&user_text) && result.should_end_call {
            result.should_end_call = false;
            if !result.response_text.to_lowercase().contains("alex") {
                result.response_text = format!("I'm Alex, but no worries! {}", result.response_text);
            }
            TraceEvent::WrongNameOverride {
                call_sid: session.call_sid.clone(),
            }
            .emit();
        }

        if result.should_end_call && is_engaged_signal(&user_text) {
            result.should_end_call = false;
        }

        if let Some(prefix) = preprocessor::technical_prefix(&user_text) {
            result.response_text = format!("{prefix}{}", result.response_text);
        }

        if let Some(score) = recent_repetition_score(&result.response_text, &session.last_n_agent_turns(3))
        {
            TraceEvent::RepetitionBlocked {
                call_sid: session.call_sid.clone(),
                jaccard: score as f32,
            }
            .emit();
            result.response_text = pick_fallback_question(&session);
        }

        if let Some((field, progression)) = already_collected_override(&result.response_text, &session) {
            TraceEvent::AlreadyCollectedBlocked {
                call_sid: session.call_sid.clone(),
                field: field.to_string(),
            }
            .emit();
            result.response_text = progression;
        }

        session.merge_collected_data(result.extracted_data.clone());

        if let Some(question) = result
            .last_question_asked
            .clone()
            .filter(|q| !q.trim().is_empty())
        {
            session.last_agent_question = Some(question);
            session.last_agent_question_type = result.question_type;
        }

        let outcome = result
            .should_end_call
            .then(|| derive_outcome(result.intent, result.next_action));

        match self.speak(&mut session, &result.response_text).await {
            SpeakOutcome::Disconnected => {
                self.finalize(session, CallOutcome::Disconnected).await;
            }
            SpeakOutcome::BargedIn => {
                self.persist_and_resume(session).await;
            }
            SpeakOutcome::Completed => {
                if let Some(outcome) = outcome {
                    self.finalize(session, outcome).await;
                } else {
                    self.persist_and_resume(session).await;
                }
            }
        }
    }

    /// Races the LLM call against a 300ms timer; if the timer wins, a
    /// short filler phrase is played over the line while the call keeps
    /// running in the background, then awaited for real (§4.6.7).
    async fn generate_with_filler(
        &mut self,
        session: &ConversationSession,
        request: LlmRequest,
    ) -> LlmResult {
        let llm = self.state.llm.clone();
        let mut llm_task = tokio::spawn(async move { llm.generate(request).await });

        let joined = match tokio::time::timeout(Duration::from_millis(FILLER_LATENCY_MS), &mut llm_task)
            .await
        {
            Ok(joined) => joined,
            Err(_elapsed) => {
                self.send_filler(session).await;
                (&mut llm_task).await
            }
        };

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::warn!(call_sid = %session.call_sid, error = %e, "llm generation failed, using safe default");
                self.state.metrics.record_error(e.kind(), "llm");
                LlmResult::safe_default()
            }
            Err(join_err) => {
                tracing::error!(call_sid = %session.call_sid, error = %join_err, "llm task panicked");
                LlmResult::safe_default()
            }
        }
    }

    async fn send_filler(&mut self, session: &ConversationSession) {
        let Some(text) = FILLER_PHRASES.choose(&mut rand::thread_rng()).copied() else {
            return;
        };
        let pcm = match self.state.tts.synthesize(text, &session.call_sid).await {
            Ok(pcm) => pcm,
            Err(_) => return,
        };
        for chunk in codec::chunk(&pcm, EGRESS_CHUNK_MS) {
            if self.state.interrupt_flags.check(&session.call_sid) || session.should_stop_speaking {
                return;
            }
            let frame = serde_json::json!({ "event": "media", "media": { "payload": codec::encode(chunk) } });
            if self.sink.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(EGRESS_CHUNK_MS as u64)).await;
        }
    }

    /// Synthesizes `text`, streams it out in 20ms chunks, and checks for
    /// barge-in every 3rd chunk (§4.6.2, §4.14). TTS failure and WS-send
    /// failure are handled differently (§4.6.9): a TTS failure skips this
    /// utterance and resumes listening; a WS-send failure means the line
    /// is gone and the call must be finalized.
    async fn speak(&mut self, session: &mut ConversationSession, text: &str) -> SpeakOutcome {
        session.is_bot_speaking = true;
        session.waiting_for_response = false;
        session.should_stop_speaking = false;
        self.is_bot_speaking.store(true, Ordering::SeqCst);

        let tts_started = Instant::now();
        let synthesized = self.state.tts.synthesize(text, &session.call_sid).await;
        self.state
            .metrics
            .record_tts_request(tts_started.elapsed().as_secs_f64());

        let pcm = match synthesized {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!(call_sid = %session.call_sid, error = %e, "tts synthesis failed, skipping utterance");
                self.state.metrics.record_error(e.kind(), "tts");
                session.is_bot_speaking = false;
                session.waiting_for_response = true;
                self.is_bot_speaking.store(false, Ordering::SeqCst);
                return SpeakOutcome::Completed;
            }
        };

        session.append_transcript(Speaker::Agent, text.to_string());

        let chunks = codec::chunk(&pcm, EGRESS_CHUNK_MS);
        for (i, chunk) in chunks.iter().enumerate() {
            if i % BARGE_IN_CHECK_EVERY == 0
                && (self.state.interrupt_flags.check(&session.call_sid) || session.should_stop_speaking)
            {
                self.state.interrupt_flags.clear(&session.call_sid);
                session.is_bot_speaking = false;
                session.waiting_for_response = true;
                session.should_stop_speaking = false;
                self.is_bot_speaking.store(false, Ordering::SeqCst);
                TraceEvent::BargeIn {
                    call_sid: session.call_sid.clone(),
                    detected_at_chunk: i as u64,
                }
                .emit();
                return SpeakOutcome::BargedIn;
            }

            let frame = serde_json::json!({ "event": "media", "media": { "payload": codec::encode(chunk) } });
            if self.sink.send(Message::Text(frame.to_string())).await.is_err() {
                session.is_bot_speaking = false;
                self.is_bot_speaking.store(false, Ordering::SeqCst);
                return SpeakOutcome::Disconnected;
            }
            tokio::time::sleep(Duration::from_millis(EGRESS_CHUNK_MS as u64)).await;
        }

        session.is_bot_speaking = false;
        session.waiting_for_response = true;
        self.is_bot_speaking.store(false, Ordering::SeqCst);
        SpeakOutcome::Completed
    }

    async fn clarify_and_resume(&mut self, mut session: ConversationSession) {
        let text = CLARIFICATION_MESSAGES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(CLARIFICATION_MESSAGES[0]);
        match self.speak(&mut session, text).await {
            SpeakOutcome::Disconnected => self.finalize(session, CallOutcome::Disconnected).await,
            SpeakOutcome::BargedIn | SpeakOutcome::Completed => {
                self.persist_and_resume(session).await
            }
        }
    }

    async fn persist_and_resume(&mut self, session: ConversationSession) {
        if let Err(e) = self.state.session_store.put(&session).await {
            tracing::warn!(call_sid = %session.call_sid, error = %e, "failed to persist live session");
        }
        self.session = Some(session);
    }

    /// Copies the live session onto its durable `CallSession`, records the
    /// outcome, and tears down the live-session/interrupt-flag bookkeeping
    /// (§4.6.8, §3 "Ownership & lifecycle").
    async fn finalize(&mut self, session: ConversationSession, outcome: CallOutcome) {
        let call_sid = session.call_sid.clone();
        let transcript_lines = session.transcript_history.len();

        match self.state.store.get_call_session_by_sid(&call_sid).await {
            Ok(Some(mut call)) => {
                session.finalize_into(&mut call);
                call.outcome = Some(outcome);
                call.status = CallStatus::Completed;
                if call.ended_at.is_none() {
                    call.ended_at = Some(Utc::now());
                }
                if let Some(answered_at) = call.answered_at {
                    call.duration_seconds = Some((Utc::now() - answered_at).num_seconds());
                }

                if let Err(e) = self.state.store.update_call_session(&call).await {
                    tracing::error!(call_sid = %call_sid, error = %e, "failed to persist call finalization");
                } else if let Some(duration) = call.duration_seconds {
                    // Campaign label unavailable at this layer (the live
                    // session carries lead context, not campaign_id); see
                    // DESIGN.md for the rationale.
                    self.state
                        .metrics
                        .record_call_completed("unknown", outcome_label(outcome), duration as f64);
                }
            }
            Ok(None) => {
                tracing::warn!(call_sid = %call_sid, "no durable call session found at finalize");
            }
            Err(e) => {
                tracing::error!(call_sid = %call_sid, error = %e, "failed to load call session at finalize");
            }
        }

        self.state.session_store.delete(&call_sid).await;
        self.state.interrupt_flags.cleanup(&call_sid);

        TraceEvent::CallFinalized {
            call_sid,
            outcome: outcome_label(outcome).to_string(),
            transcript_lines,
        }
        .emit();

        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        ConversationSession::new(
            "CA1".into(),
            "ST1".into(),
            Uuid::new_v4(),
            "Rajesh".into(),
            Some("3BHK".into()),
            Some("Whitefield".into()),
            Some(8_000_000),
        )
    }

    // S1: happy-path intro renders with lead context.
    #[test]
    fn intro_uses_lead_context() {
        let intro = build_intro("Rajesh", Some("3BHK"), Some("Whitefield"));
        assert_eq!(
            intro,
            "Hi Rajesh, Alex from PropertyHub. You inquired about 3BHK in Whitefield. \
             Is this a good time?"
        );
    }

    #[test]
    fn intro_falls_back_on_missing_lead_context() {
        let intro = build_intro("Rajesh", None, None);
        assert_eq!(
            intro,
            "Hi Rajesh, Alex from PropertyHub. You inquired about property in your \
             preferred area. Is this a good time?"
        );
    }

    // S3: wrong-name override scope.
    #[test]
    fn wrong_name_is_detected_only_with_greeting_prefix() {
        assert!(preprocessor::detect_wrong_name("hi rahul, who's this"));
        assert!(!preprocessor::detect_wrong_name("rahul told me about you"));
    }

    // S4: repetition guard.
    #[test]
    fn identical_response_is_blocked_as_repetition() {
        let mut s = session();
        s.append_transcript(
            Speaker::Agent,
            "What's your budget range for this property?".into(),
        );
        let score = recent_repetition_score(
            "What's your budget range for this property?",
            &s.last_n_agent_turns(3),
        );
        assert_eq!(score, Some(1.0));
    }

    #[test]
    fn dissimilar_response_is_not_blocked() {
        let mut s = session();
        s.append_transcript(Speaker::Agent, "What's your budget range?".into());
        let score = recent_repetition_score(
            "Are you flexible with the location?",
            &s.last_n_agent_turns(3),
        );
        assert_eq!(score, None);
    }

    #[test]
    fn fallback_question_skips_ones_already_asked() {
        let mut s = session();
        s.append_transcript(
            Speaker::Agent,
            "When are you ideally looking to move in?".into(),
        );
        let picked = pick_fallback_question(&s);
        assert_ne!(picked, "When are you ideally looking to move in?");
    }

    #[test]
    fn already_collected_budget_question_is_overridden() {
        let mut s = session();
        s.collected_data
            .insert("budget".into(), serde_json::json!("80L"));
        let result = already_collected_override("What's your budget range?", &s);
        assert_eq!(result.unwrap().0, "budget");
    }

    #[test]
    fn already_collected_skips_when_no_question_mark() {
        let mut s = session();
        s.collected_data
            .insert("budget".into(), serde_json::json!("80L"));
        assert!(already_collected_override("Got it, noted your budget.", &s).is_none());
    }

    #[test]
    fn engaged_signal_detection_matches_curiosity_phrases() {
        assert!(is_engaged_signal("how much would it cost though?"));
        assert!(!is_engaged_signal("not interested, please remove me"));
    }

    #[test]
    fn outcome_derivation_prefers_explicit_not_interested() {
        assert_eq!(
            derive_outcome(Intent::NotInterested, NextAction::ScheduleVisit),
            CallOutcome::NotInterested
        );
        assert_eq!(
            derive_outcome(Intent::Unclear, NextAction::ScheduleVisit),
            CallOutcome::Qualified
        );
        assert_eq!(
            derive_outcome(Intent::Unclear, NextAction::Respond),
            CallOutcome::CallbackRequested
        );
    }
}
