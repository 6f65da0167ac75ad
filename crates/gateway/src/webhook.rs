//! Status webhook handler (C12). SPEC_FULL.md §4.12, §6 "Telephony status
//! webhook". Grounded on the teacher's `api/webhooks.rs` handler/response
//! idiom, minus the HMAC verification — Exotel's status callback carries
//! no signature, just a `CallSid` to look up.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use ringline_domain::error::Error;
use ringline_domain::model::CallStatus;
use serde::Deserialize;

use crate::scheduler;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusWebhookForm {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Duration")]
    pub duration: Option<i64>,
    #[serde(rename = "RecordingUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "CustomField")]
    pub custom_field: Option<String>,
}

fn parse_status(raw: &str) -> Option<CallStatus> {
    Some(match raw {
        "initiated" => CallStatus::Initiated,
        "ringing" => CallStatus::Ringing,
        "in-progress" => CallStatus::InProgress,
        "completed" => CallStatus::Completed,
        "busy" => CallStatus::Busy,
        "no-answer" => CallStatus::NoAnswer,
        "failed" => CallStatus::Failed,
        _ => return None,
    })
}

fn retry_delay_minutes(status: CallStatus) -> Option<(&'static str, u32)> {
    match status {
        CallStatus::NoAnswer => Some(("no-answer", 120)),
        CallStatus::Busy => Some(("busy", 240)),
        CallStatus::Failed => Some(("failed", 60)),
        _ => None,
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// §4.12: responds immediately; the retry/persistence work runs inline
/// here but against the shared store, which is what "fresh DB context"
/// becomes once there is no per-request connection borrowing to reuse.
pub async fn handle_status_webhook(
    State(state): State<AppState>,
    Form(form): Form<StatusWebhookForm>,
) -> axum::response::Response {
    ringline_domain::trace::TraceEvent::WebhookReceived {
        call_sid: form.call_sid.clone(),
        status: form.status.clone(),
    }
    .emit();

    let Some(status) = parse_status(&form.status) else {
        tracing::warn!(status = %form.status, "unknown webhook status, ignoring");
        return StatusCode::OK.into_response();
    };

    let result = apply_status_update(&state, &form, status).await;
    if let Err(e) = result {
        tracing::error!(call_sid = %form.call_sid, error = %e, "status webhook processing failed");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    StatusCode::OK.into_response()
}

async fn apply_status_update(
    state: &AppState,
    form: &StatusWebhookForm,
    status: CallStatus,
) -> ringline_domain::error::Result<()> {
    let Some(mut session) = state.store.get_call_session_by_sid(&form.call_sid).await? else {
        return Err(Error::Database(format!(
            "no call session for call_sid {}",
            form.call_sid
        )));
    };

    session.status = status;
    if let Some(duration) = form.duration {
        session.duration_seconds = Some(duration);
    }
    if form.recording_url.is_some() {
        session.recording_url = form.recording_url.clone();
    }
    if status == CallStatus::InProgress && session.answered_at.is_none() {
        session.answered_at = Some(Utc::now());
    }
    let is_terminal = matches!(
        status,
        CallStatus::Completed | CallStatus::Busy | CallStatus::NoAnswer | CallStatus::Failed
    );
    if is_terminal {
        session.ended_at = Some(Utc::now());
    }
    state.store.update_call_session(&session).await?;

    if !is_terminal {
        return Ok(());
    }

    // completed's outcome is decided by C6 at call-end, not here; no
    // retry is scheduled for a completed call.
    if status == CallStatus::Completed {
        return Ok(());
    }

    let Some((reason, delay_minutes)) = retry_delay_minutes(status) else {
        return Ok(());
    };
    let Some(scheduled_call) = state.store.get_scheduled_call_by_sid(&form.call_sid).await? else {
        // Not every completed call was dialed through the scheduler (a
        // manually-placed test call, say); nothing to retry.
        return Ok(());
    };
    let Some(campaign) = state.store.get_campaign(scheduled_call.campaign_id).await? else {
        return Err(Error::Database(format!(
            "scheduled call {} references missing campaign",
            scheduled_call.id
        )));
    };

    scheduler::schedule_retry(
        &state.store,
        &scheduled_call,
        &campaign,
        reason,
        (delay_minutes / 60).max(1) as i64,
        Utc::now(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_statuses() {
        assert_eq!(parse_status("in-progress"), Some(CallStatus::InProgress));
        assert_eq!(parse_status("no-answer"), Some(CallStatus::NoAnswer));
        assert_eq!(parse_status("bogus"), None);
    }

    #[test]
    fn retry_delays_match_spec() {
        assert_eq!(retry_delay_minutes(CallStatus::NoAnswer), Some(("no-answer", 120)));
        assert_eq!(retry_delay_minutes(CallStatus::Busy), Some(("busy", 240)));
        assert_eq!(retry_delay_minutes(CallStatus::Failed), Some(("failed", 60)));
        assert_eq!(retry_delay_minutes(CallStatus::Completed), None);
    }
}
