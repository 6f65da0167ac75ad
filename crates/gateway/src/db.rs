//! Durable relational store for Lead/Campaign/ScheduledCall/CallSession
//! (SPEC_FULL.md §3, §6 "Durable store"). The teacher has no DB layer of
//! its own; `sqlx` is the corpus-idiomatic choice for a relational store
//! (see DESIGN.md). Exposed as a trait so the scheduler/executor/webhook
//! logic is unit-testable against an in-memory fake without a live
//! database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ringline_domain::error::{Error, Result};
use ringline_domain::model::{
    Campaign, CallSession, Lead, ScheduledCall, ScheduledCallStatus,
};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>>;
    async fn record_call_attempt(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>>;
    async fn leads_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Lead>>;
    /// Campaigns the worker loop should dispense from (§4.11).
    async fn list_running_campaigns(&self) -> Result<Vec<Campaign>>;

    async fn insert_scheduled_call(&self, call: &ScheduledCall) -> Result<()>;
    async fn get_scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>>;
    async fn get_scheduled_call_by_sid(&self, call_sid: &str) -> Result<Option<ScheduledCall>>;
    /// Non-terminal ScheduledCall already queued for this (lead, campaign),
    /// used to enforce "at most one per pair" (§3 invariant, §8 property 4).
    async fn has_open_scheduled_call(&self, lead_id: Uuid, campaign_id: Uuid) -> Result<bool>;
    async fn due_scheduled_calls(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduledCall>>;
    async fn count_calling(&self, campaign_id: Uuid) -> Result<u32>;
    async fn mark_calling(&self, id: Uuid, call_sid: &str) -> Result<()>;
    async fn mark_scheduled_call_failed(&self, id: Uuid, reason: &str) -> Result<()>;
    async fn reschedule(&self, id: Uuid, target_time: DateTime<Utc>, attempt_number: u32) -> Result<()>;
    async fn mark_max_retries_reached(&self, id: Uuid) -> Result<()>;

    async fn insert_call_session(&self, session: &CallSession) -> Result<()>;
    async fn get_call_session_by_sid(&self, call_sid: &str) -> Result<Option<CallSession>>;
    async fn update_call_session(&self, session: &CallSession) -> Result<()>;

    /// Used by `/ready` (§4.13).
    async fn is_reachable(&self) -> bool;
}

pub type SharedStore = Arc<dyn Store>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Postgres implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub async fn connect(cfg: &ringline_domain::config::DatabaseConfig) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .connect(&cfg.url)
            .await
            .map_err(|e| Error::Database(format!("connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("migration failed: {e}")))
    }

    pub async fn is_reachable(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

#[derive(sqlx::FromRow)]
struct LeadRow {
    id: Uuid,
    campaign_id: Uuid,
    display_name: String,
    phone: String,
    property_type: Option<String>,
    location: Option<String>,
    budget: Option<i64>,
    notes: String,
    tags: Vec<String>,
    call_attempts: i32,
    last_call_attempt: Option<DateTime<Utc>>,
}

impl From<LeadRow> for Lead {
    fn from(r: LeadRow) -> Self {
        Lead {
            id: r.id,
            campaign_id: r.campaign_id,
            display_name: r.display_name,
            phone: r.phone,
            interest: ringline_domain::model::PropertyInterest {
                property_type: r.property_type,
                location: r.location,
                budget: r.budget,
            },
            notes: r.notes,
            tags: r.tags,
            call_attempts: r.call_attempts as u32,
            last_call_attempt: r.last_call_attempt,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: Uuid,
    name: String,
    status: String,
    calling_hours_start: i16,
    calling_hours_end: i16,
    max_attempts: i32,
    retry_delay_hours: i64,
    max_concurrent_calls: i32,
    calls_initiated: i64,
    calls_completed: i64,
}

fn parse_campaign_status(s: &str) -> Result<ringline_domain::model::CampaignStatus> {
    use ringline_domain::model::CampaignStatus::*;
    Ok(match s {
        "draft" => Draft,
        "scheduled" => Scheduled,
        "running" => Running,
        "paused" => Paused,
        "completed" => Completed,
        "cancelled" => Cancelled,
        other => return Err(Error::Database(format!("unknown campaign status {other}"))),
    })
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = Error;
    fn try_from(r: CampaignRow) -> Result<Self> {
        Ok(Campaign {
            id: r.id,
            name: r.name,
            status: parse_campaign_status(&r.status)?,
            calling_hours_start: r.calling_hours_start as u8,
            calling_hours_end: r.calling_hours_end as u8,
            max_attempts: r.max_attempts as u32,
            retry_delay_hours: r.retry_delay_hours,
            max_concurrent_calls: r.max_concurrent_calls as u32,
            calls_initiated: r.calls_initiated as u64,
            calls_completed: r.calls_completed as u64,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ScheduledCallRow {
    id: Uuid,
    campaign_id: Uuid,
    lead_id: Uuid,
    target_time: DateTime<Utc>,
    status: String,
    attempt_number: i32,
    max_attempts: i32,
    last_attempt_time: Option<DateTime<Utc>>,
    current_call_sid: Option<String>,
    failure_reason: Option<String>,
}

fn parse_scheduled_status(s: &str) -> Result<ScheduledCallStatus> {
    use ScheduledCallStatus::*;
    Ok(match s {
        "pending" => Pending,
        "calling" => Calling,
        "completed" => Completed,
        "failed" => Failed,
        "cancelled" => Cancelled,
        "max_retries_reached" => MaxRetriesReached,
        other => return Err(Error::Database(format!("unknown scheduled_call status {other}"))),
    })
}

fn scheduled_status_str(s: ScheduledCallStatus) -> &'static str {
    match s {
        ScheduledCallStatus::Pending => "pending",
        ScheduledCallStatus::Calling => "calling",
        ScheduledCallStatus::Completed => "completed",
        ScheduledCallStatus::Failed => "failed",
        ScheduledCallStatus::Cancelled => "cancelled",
        ScheduledCallStatus::MaxRetriesReached => "max_retries_reached",
    }
}

impl TryFrom<ScheduledCallRow> for ScheduledCall {
    type Error = Error;
    fn try_from(r: ScheduledCallRow) -> Result<Self> {
        Ok(ScheduledCall {
            id: r.id,
            campaign_id: r.campaign_id,
            lead_id: r.lead_id,
            target_time: r.target_time,
            status: parse_scheduled_status(&r.status)?,
            attempt_number: r.attempt_number as u32,
            max_attempts: r.max_attempts as u32,
            last_attempt_time: r.last_attempt_time,
            current_call_sid: r.current_call_sid,
            failure_reason: r.failure_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CallSessionRow {
    id: Uuid,
    call_sid: String,
    lead_id: Uuid,
    scheduled_call_id: Option<Uuid>,
    status: String,
    outcome: Option<String>,
    duration_seconds: Option<i64>,
    recording_url: Option<String>,
    full_transcript: serde_json::Value,
    collected_data: serde_json::Value,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

fn call_status_str(s: ringline_domain::model::CallStatus) -> &'static str {
    use ringline_domain::model::CallStatus::*;
    match s {
        Initiated => "initiated",
        Ringing => "ringing",
        InProgress => "in_progress",
        Completed => "completed",
        Failed => "failed",
        NoAnswer => "no_answer",
        Busy => "busy",
    }
}

fn parse_call_status(s: &str) -> Result<ringline_domain::model::CallStatus> {
    use ringline_domain::model::CallStatus::*;
    Ok(match s {
        "initiated" => Initiated,
        "ringing" => Ringing,
        "in_progress" => InProgress,
        "completed" => Completed,
        "failed" => Failed,
        "no_answer" => NoAnswer,
        "busy" => Busy,
        other => return Err(Error::Database(format!("unknown call status {other}"))),
    })
}

fn call_outcome_str(o: ringline_domain::model::CallOutcome) -> &'static str {
    use ringline_domain::model::CallOutcome::*;
    match o {
        Qualified => "qualified",
        NotInterested => "not_interested",
        CallbackRequested => "callback_requested",
        NoAnswer => "no_answer",
        Disconnected => "disconnected",
        Error => "error",
    }
}

fn parse_call_outcome(s: &str) -> Result<ringline_domain::model::CallOutcome> {
    use ringline_domain::model::CallOutcome::*;
    Ok(match s {
        "qualified" => Qualified,
        "not_interested" => NotInterested,
        "callback_requested" => CallbackRequested,
        "no_answer" => NoAnswer,
        "disconnected" => Disconnected,
        "error" => Error_,
        other => return Err(Error::Database(format!("unknown call outcome {other}"))),
    })
}
// alias so the match arm above reads naturally without shadowing std::result::Result::Err
use ringline_domain::model::CallOutcome::Error as Error_;

impl TryFrom<CallSessionRow> for CallSession {
    type Error = Error;
    fn try_from(r: CallSessionRow) -> Result<Self> {
        Ok(CallSession {
            id: r.id,
            call_sid: r.call_sid,
            lead_id: r.lead_id,
            scheduled_call_id: r.scheduled_call_id,
            status: parse_call_status(&r.status)?,
            outcome: r.outcome.as_deref().map(parse_call_outcome).transpose()?,
            duration_seconds: r.duration_seconds,
            recording_url: r.recording_url,
            full_transcript: serde_json::from_value(r.full_transcript).unwrap_or_default(),
            collected_data: r.collected_data,
            answered_at: r.answered_at,
            ended_at: r.ended_at,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        let row: Option<LeadRow> = sqlx::query_as(
            "SELECT id, campaign_id, display_name, phone, property_type, location, budget, \
             notes, tags, call_attempts, last_call_attempt FROM leads WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row.map(Lead::from))
    }

    async fn record_call_attempt(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE leads SET call_attempts = call_attempts + 1, last_call_attempt = $2 WHERE id = $1",
        )
        .bind(lead_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row: Option<CampaignRow> = sqlx::query_as(
            "SELECT id, name, status, calling_hours_start, calling_hours_end, max_attempts, \
             retry_delay_hours, max_concurrent_calls, calls_initiated, calls_completed \
             FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.map(Campaign::try_from).transpose()
    }

    async fn leads_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Lead>> {
        let rows: Vec<LeadRow> = sqlx::query_as(
            "SELECT id, campaign_id, display_name, phone, property_type, location, budget, \
             notes, tags, call_attempts, last_call_attempt FROM leads WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.into_iter().map(Lead::from).collect())
    }

    async fn list_running_campaigns(&self) -> Result<Vec<Campaign>> {
        let rows: Vec<CampaignRow> = sqlx::query_as(
            "SELECT id, name, status, calling_hours_start, calling_hours_end, max_attempts, \
             retry_delay_hours, max_concurrent_calls, calls_initiated, calls_completed \
             FROM campaigns WHERE status = 'running'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(Campaign::try_from).collect()
    }

    async fn insert_scheduled_call(&self, call: &ScheduledCall) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduled_calls (id, campaign_id, lead_id, target_time, status, \
             attempt_number, max_attempts, last_attempt_time, current_call_sid, failure_reason) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)",
        )
        .bind(call.id)
        .bind(call.campaign_id)
        .bind(call.lead_id)
        .bind(call.target_time)
        .bind(scheduled_status_str(call.status))
        .bind(call.attempt_number as i32)
        .bind(call.max_attempts as i32)
        .bind(call.last_attempt_time)
        .bind(&call.current_call_sid)
        .bind(&call.failure_reason)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>> {
        let row: Option<ScheduledCallRow> = sqlx::query_as(
            "SELECT id, campaign_id, lead_id, target_time, status, attempt_number, max_attempts, \
             last_attempt_time, current_call_sid, failure_reason FROM scheduled_calls WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.map(ScheduledCall::try_from).transpose()
    }

    async fn get_scheduled_call_by_sid(&self, call_sid: &str) -> Result<Option<ScheduledCall>> {
        let row: Option<ScheduledCallRow> = sqlx::query_as(
            "SELECT id, campaign_id, lead_id, target_time, status, attempt_number, max_attempts, \
             last_attempt_time, current_call_sid, failure_reason FROM scheduled_calls \
             WHERE current_call_sid = $1",
        )
        .bind(call_sid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.map(ScheduledCall::try_from).transpose()
    }

    async fn has_open_scheduled_call(&self, lead_id: Uuid, campaign_id: Uuid) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scheduled_calls WHERE lead_id = $1 AND campaign_id = $2 \
             AND status NOT IN ('completed','cancelled','max_retries_reached')",
        )
        .bind(lead_id)
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    async fn due_scheduled_calls(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduledCall>> {
        let rows: Vec<ScheduledCallRow> = sqlx::query_as(
            "SELECT id, campaign_id, lead_id, target_time, status, attempt_number, max_attempts, \
             last_attempt_time, current_call_sid, failure_reason FROM scheduled_calls \
             WHERE status = 'pending' AND target_time <= $1 ORDER BY target_time ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        rows.into_iter().map(ScheduledCall::try_from).collect()
    }

    async fn count_calling(&self, campaign_id: Uuid) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM scheduled_calls WHERE campaign_id = $1 AND status = 'calling'",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count as u32)
    }

    async fn mark_calling(&self, id: Uuid, call_sid: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_calls SET status = 'calling', current_call_sid = $2, \
             last_attempt_time = now() WHERE id = $1",
        )
        .bind(id)
        .bind(call_sid)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_scheduled_call_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        sqlx::query("UPDATE scheduled_calls SET status = 'failed', failure_reason = $2 WHERE id = $1")
            .bind(id)
            .bind(reason)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, target_time: DateTime<Utc>, attempt_number: u32) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_calls SET status = 'pending', target_time = $2, attempt_number = $3, \
             current_call_sid = NULL WHERE id = $1",
        )
        .bind(id)
        .bind(target_time)
        .bind(attempt_number as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_max_retries_reached(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE scheduled_calls SET status = 'max_retries_reached' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn insert_call_session(&self, session: &CallSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO call_sessions (id, call_sid, lead_id, scheduled_call_id, status, outcome, \
             duration_seconds, recording_url, full_transcript, collected_data, answered_at, ended_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)",
        )
        .bind(session.id)
        .bind(&session.call_sid)
        .bind(session.lead_id)
        .bind(session.scheduled_call_id)
        .bind(call_status_str(session.status))
        .bind(session.outcome.map(call_outcome_str))
        .bind(session.duration_seconds)
        .bind(&session.recording_url)
        .bind(serde_json::to_value(&session.full_transcript).unwrap_or_default())
        .bind(&session.collected_data)
        .bind(session.answered_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_call_session_by_sid(&self, call_sid: &str) -> Result<Option<CallSession>> {
        let row: Option<CallSessionRow> = sqlx::query_as(
            "SELECT id, call_sid, lead_id, scheduled_call_id, status, outcome, duration_seconds, \
             recording_url, full_transcript, collected_data, answered_at, ended_at \
             FROM call_sessions WHERE call_sid = $1",
        )
        .bind(call_sid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        row.map(CallSession::try_from).transpose()
    }

    async fn update_call_session(&self, session: &CallSession) -> Result<()> {
        sqlx::query(
            "UPDATE call_sessions SET status = $2, outcome = $3, duration_seconds = $4, \
             recording_url = $5, full_transcript = $6, collected_data = $7, answered_at = $8, \
             ended_at = $9 WHERE call_sid = $1",
        )
        .bind(&session.call_sid)
        .bind(call_status_str(session.status))
        .bind(session.outcome.map(call_outcome_str))
        .bind(session.duration_seconds)
        .bind(&session.recording_url)
        .bind(serde_json::to_value(&session.full_transcript).unwrap_or_default())
        .bind(&session.collected_data)
        .bind(session.answered_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        PgStore::is_reachable(self).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory fake, for scheduler/executor/webhook unit tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryStore {
    leads: RwLock<HashMap<Uuid, Lead>>,
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    scheduled_calls: RwLock<HashMap<Uuid, ScheduledCall>>,
    call_sessions: RwLock<HashMap<String, CallSession>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_lead(&self, lead: Lead) {
        self.leads.write().insert(lead.id, lead);
    }

    pub fn seed_campaign(&self, campaign: Campaign) {
        self.campaigns.write().insert(campaign.id, campaign);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>> {
        Ok(self.leads.read().get(&id).cloned())
    }

    async fn record_call_attempt(&self, lead_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(lead) = self.leads.write().get_mut(&lead_id) {
            lead.call_attempts += 1;
            lead.last_call_attempt = Some(at);
        }
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().get(&id).cloned())
    }

    async fn leads_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Lead>> {
        Ok(self
            .leads
            .read()
            .values()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn list_running_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .campaigns
            .read()
            .values()
            .filter(|c| c.status == ringline_domain::model::CampaignStatus::Running)
            .cloned()
            .collect())
    }

    async fn insert_scheduled_call(&self, call: &ScheduledCall) -> Result<()> {
        self.scheduled_calls.write().insert(call.id, call.clone());
        Ok(())
    }

    async fn get_scheduled_call(&self, id: Uuid) -> Result<Option<ScheduledCall>> {
        Ok(self.scheduled_calls.read().get(&id).cloned())
    }

    async fn get_scheduled_call_by_sid(&self, call_sid: &str) -> Result<Option<ScheduledCall>> {
        Ok(self
            .scheduled_calls
            .read()
            .values()
            .find(|c| c.current_call_sid.as_deref() == Some(call_sid))
            .cloned())
    }

    async fn has_open_scheduled_call(&self, lead_id: Uuid, campaign_id: Uuid) -> Result<bool> {
        Ok(self.scheduled_calls.read().values().any(|c| {
            c.lead_id == lead_id && c.campaign_id == campaign_id && !c.status.is_terminal()
        }))
    }

    async fn due_scheduled_calls(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<ScheduledCall>> {
        let mut due: Vec<ScheduledCall> = self
            .scheduled_calls
            .read()
            .values()
            .filter(|c| c.status == ScheduledCallStatus::Pending && c.target_time <= now)
            .cloned()
            .collect();
        due.sort_by_key(|c| c.target_time);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn count_calling(&self, campaign_id: Uuid) -> Result<u32> {
        Ok(self
            .scheduled_calls
            .read()
            .values()
            .filter(|c| c.campaign_id == campaign_id && c.status == ScheduledCallStatus::Calling)
            .count() as u32)
    }

    async fn mark_calling(&self, id: Uuid, call_sid: &str) -> Result<()> {
        if let Some(c) = self.scheduled_calls.write().get_mut(&id) {
            c.status = ScheduledCallStatus::Calling;
            c.current_call_sid = Some(call_sid.to_string());
            c.last_attempt_time = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_scheduled_call_failed(&self, id: Uuid, reason: &str) -> Result<()> {
        if let Some(c) = self.scheduled_calls.write().get_mut(&id) {
            c.status = ScheduledCallStatus::Failed;
            c.failure_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, target_time: DateTime<Utc>, attempt_number: u32) -> Result<()> {
        if let Some(c) = self.scheduled_calls.write().get_mut(&id) {
            c.status = ScheduledCallStatus::Pending;
            c.target_time = target_time;
            c.attempt_number = attempt_number;
            c.current_call_sid = None;
        }
        Ok(())
    }

    async fn mark_max_retries_reached(&self, id: Uuid) -> Result<()> {
        if let Some(c) = self.scheduled_calls.write().get_mut(&id) {
            c.status = ScheduledCallStatus::MaxRetriesReached;
        }
        Ok(())
    }

    async fn insert_call_session(&self, session: &CallSession) -> Result<()> {
        self.call_sessions
            .write()
            .insert(session.call_sid.clone(), session.clone());
        Ok(())
    }

    async fn get_call_session_by_sid(&self, call_sid: &str) -> Result<Option<CallSession>> {
        Ok(self.call_sessions.read().get(call_sid).cloned())
    }

    async fn update_call_session(&self, session: &CallSession) -> Result<()> {
        self.call_sessions
            .write()
            .insert(session.call_sid.clone(), session.clone());
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringline_domain::model::{CallStatus, PropertyInterest};

    fn lead(id: Uuid, campaign_id: Uuid) -> Lead {
        Lead {
            id,
            campaign_id,
            display_name: "Rajesh".into(),
            phone: "+919876543210".into(),
            interest: PropertyInterest {
                property_type: Some("3BHK".into()),
                location: Some("Whitefield".into()),
                budget: Some(8_000_000),
            },
            notes: String::new(),
            tags: vec![],
            call_attempts: 0,
            last_call_attempt: None,
        }
    }

    #[tokio::test]
    async fn record_call_attempt_increments_and_stamps() {
        let store = InMemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let lead_id = Uuid::new_v4();
        store.seed_lead(lead(lead_id, campaign_id));
        let at = Utc::now();
        store.record_call_attempt(lead_id, at).await.unwrap();
        let updated = store.get_lead(lead_id).await.unwrap().unwrap();
        assert_eq!(updated.call_attempts, 1);
        assert_eq!(updated.last_call_attempt, Some(at));
    }

    #[tokio::test]
    async fn open_scheduled_call_detection_ignores_terminal_rows() {
        let store = InMemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let lead_id = Uuid::new_v4();
        let mut call = ScheduledCall {
            id: Uuid::new_v4(),
            campaign_id,
            lead_id,
            target_time: Utc::now(),
            status: ScheduledCallStatus::Completed,
            attempt_number: 1,
            max_attempts: 3,
            last_attempt_time: None,
            current_call_sid: None,
            failure_reason: None,
        };
        store.insert_scheduled_call(&call).await.unwrap();
        assert!(!store.has_open_scheduled_call(lead_id, campaign_id).await.unwrap());

        call.id = Uuid::new_v4();
        call.status = ScheduledCallStatus::Pending;
        store.insert_scheduled_call(&call).await.unwrap();
        assert!(store.has_open_scheduled_call(lead_id, campaign_id).await.unwrap());
    }

    #[tokio::test]
    async fn due_scheduled_calls_orders_by_target_time() {
        let store = InMemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let lead_id = Uuid::new_v4();
        let now = Utc::now();
        let later = ScheduledCall {
            id: Uuid::new_v4(),
            campaign_id,
            lead_id,
            target_time: now - chrono::Duration::minutes(1),
            status: ScheduledCallStatus::Pending,
            attempt_number: 1,
            max_attempts: 3,
            last_attempt_time: None,
            current_call_sid: None,
            failure_reason: None,
        };
        let earlier = ScheduledCall {
            id: Uuid::new_v4(),
            target_time: now - chrono::Duration::minutes(5),
            ..later.clone()
        };
        store.insert_scheduled_call(&later).await.unwrap();
        store.insert_scheduled_call(&earlier).await.unwrap();
        let due = store.due_scheduled_calls(now, 10).await.unwrap();
        assert_eq!(due[0].id, earlier.id);
        assert_eq!(due[1].id, later.id);
    }

    #[tokio::test]
    async fn call_session_roundtrips() {
        let store = InMemoryStore::new();
        let session = CallSession::new("CA1".into(), Uuid::new_v4(), None);
        store.insert_call_session(&session).await.unwrap();
        let mut fetched = store.get_call_session_by_sid("CA1").await.unwrap().unwrap();
        fetched.status = CallStatus::Completed;
        store.update_call_session(&fetched).await.unwrap();
        let refetched = store.get_call_session_by_sid("CA1").await.unwrap().unwrap();
        assert_eq!(refetched.status, CallStatus::Completed);
    }
}
