//! Outbound call scheduler (C10). SPEC_FULL.md §4.10.
//!
//! `ConcurrencyGuard` is lifted from the teacher's `schedule_runner.rs`
//! in-process per-key atomic counter; here it is keyed by campaign id
//! instead of schedule id, mirroring the campaign's `max_concurrent_calls`
//! limit mentioned in §5. It is a fast in-process mirror only — the
//! authoritative count the dispenser trusts is `Store::count_calling`,
//! since that reflects rows a crashed-and-restarted process would not
//! remember.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc, Weekday};
use parking_lot::RwLock;
use ringline_domain::error::Result;
use ringline_domain::model::{Campaign, ScheduledCall, ScheduledCallStatus};
use uuid::Uuid;

use crate::db::SharedStore;

#[derive(Default)]
pub struct ConcurrencyGuard {
    counts: RwLock<HashMap<Uuid, Arc<AtomicU32>>>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, campaign_id: Uuid) -> Arc<AtomicU32> {
        if let Some(c) = self.counts.read().get(&campaign_id) {
            return c.clone();
        }
        self.counts
            .write()
            .entry(campaign_id)
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone()
    }

    pub fn try_acquire(&self, campaign_id: Uuid, max: u32) -> bool {
        let counter = self.counter(campaign_id);
        loop {
            let cur = counter.load(Ordering::SeqCst);
            if cur >= max {
                return false;
            }
            if counter
                .compare_exchange(cur, cur + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn release(&self, campaign_id: Uuid) {
        let counter = self.counter(campaign_id);
        let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
            Some(v.saturating_sub(1))
        });
    }

    pub fn in_flight(&self, campaign_id: Uuid) -> u32 {
        self.counts
            .read()
            .get(&campaign_id)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

/// §4.10 next-available-slot algorithm. Server-local time is taken to be
/// the clock `now` is already expressed in (§9 Open Question resolved:
/// no per-lead timezone conversion — see DESIGN.md).
pub fn next_available_slot(now: DateTime<Utc>, start_hour: u8, end_hour: u8) -> DateTime<Utc> {
    let mut t = if (now.hour() as u8) < start_hour {
        start_of_day_at(now, start_hour)
    } else if (now.hour() as u8) >= end_hour {
        start_of_day_at(now + ChronoDuration::days(1), start_hour)
    } else {
        now
    };

    while t.weekday() == Weekday::Sun {
        t = start_of_day_at(t + ChronoDuration::days(1), start_hour);
    }

    t
}

fn start_of_day_at(t: DateTime<Utc>, hour: u8) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(hour as u32, 0, 0)
        .expect("hour is 0..=23")
        .and_utc()
}

fn is_within_calling_hours(now: DateTime<Utc>, start_hour: u8, end_hour: u8) -> bool {
    let hour = now.hour() as u8;
    hour >= start_hour && hour < end_hour && now.weekday() != Weekday::Sun
}

/// (a) Enqueue: one ScheduledCall per lead in the campaign that doesn't
/// already have a non-terminal one.
pub async fn schedule_campaign_calls(
    store: &SharedStore,
    campaign: &Campaign,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduledCall>> {
    if !campaign.status.accepts_new_scheduled_calls() {
        return Ok(Vec::new());
    }

    let leads = store.leads_for_campaign(campaign.id).await?;
    let target_time = next_available_slot(now, campaign.calling_hours_start, campaign.calling_hours_end);

    let mut created = Vec::new();
    for lead in leads {
        if store.has_open_scheduled_call(lead.id, campaign.id).await? {
            continue;
        }
        let call = ScheduledCall {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            lead_id: lead.id,
            target_time,
            status: ScheduledCallStatus::Pending,
            attempt_number: 1,
            max_attempts: campaign.max_attempts,
            last_attempt_time: None,
            current_call_sid: None,
            failure_reason: None,
        };
        store.insert_scheduled_call(&call).await?;
        ringline_domain::trace::TraceEvent::ScheduledCallCreated {
            campaign_id: campaign.id.to_string(),
            lead_id: lead.id.to_string(),
            target_time: call.target_time.to_rfc3339(),
        }
        .emit();
        created.push(call);
    }
    Ok(created)
}

/// (b) Dispense: §8 testable property 10 — empty outside calling hours,
/// on Sunday, or once the campaign is already at its concurrency ceiling.
pub async fn get_pending_calls(
    store: &SharedStore,
    campaign: &Campaign,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<ScheduledCall>> {
    if !is_within_calling_hours(now, campaign.calling_hours_start, campaign.calling_hours_end) {
        return Ok(Vec::new());
    }

    let currently_calling = store.count_calling(campaign.id).await?;
    if currently_calling >= campaign.max_concurrent_calls {
        return Ok(Vec::new());
    }
    let room = campaign.max_concurrent_calls - currently_calling;
    let effective_limit = room.min(limit);
    if effective_limit == 0 {
        return Ok(Vec::new());
    }

    let due = store.due_scheduled_calls(now, effective_limit).await?;
    Ok(due
        .into_iter()
        .filter(|c| c.campaign_id == campaign.id)
        .collect())
}

/// (c) Retry ladder: attempt+1 up to max_attempts, else terminal.
pub async fn schedule_retry(
    store: &SharedStore,
    call: &ScheduledCall,
    campaign: &Campaign,
    reason: &str,
    delay_hours: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let next_attempt = call.attempt_number + 1;
    if next_attempt > call.max_attempts {
        store.mark_max_retries_reached(call.id).await?;
        ringline_domain::trace::TraceEvent::MaxRetriesReached {
            scheduled_call_id: call.id.to_string(),
        }
        .emit();
        return Ok(());
    }

    let target_time = next_available_slot(
        now + ChronoDuration::hours(delay_hours),
        campaign.calling_hours_start,
        campaign.calling_hours_end,
    );
    store.reschedule(call.id, target_time, next_attempt).await?;
    ringline_domain::trace::TraceEvent::RetryScheduled {
        scheduled_call_id: call.id.to_string(),
        attempt_number: next_attempt,
        reason: reason.to_string(),
    }
    .emit();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn before_window_moves_to_today_start() {
        // 2026-07-27 is a Monday.
        let now = dt(2026, 7, 27, 7);
        let slot = next_available_slot(now, 9, 20);
        assert_eq!(slot, dt(2026, 7, 27, 9));
    }

    #[test]
    fn after_window_moves_to_tomorrow_start() {
        let now = dt(2026, 7, 27, 20);
        let slot = next_available_slot(now, 9, 20);
        assert_eq!(slot, dt(2026, 7, 28, 9));
    }

    #[test]
    fn inside_window_keeps_current_time() {
        let now = dt(2026, 7, 27, 14);
        let slot = next_available_slot(now, 9, 20);
        assert_eq!(slot, now);
    }

    #[test]
    fn sunday_is_skipped_to_monday() {
        // 2026-08-02 is a Sunday.
        let now = dt(2026, 8, 2, 7);
        let slot = next_available_slot(now, 9, 20);
        assert_eq!(slot, dt(2026, 8, 3, 9));
    }

    #[test]
    fn s6_calling_hours_fence_monday_8pm_rolls_to_tuesday() {
        // Monday 20:00, window [10, 19) -> next is Tuesday 10:00.
        let now = dt(2026, 7, 27, 20);
        let slot = next_available_slot(now, 10, 19);
        assert_eq!(slot, dt(2026, 7, 28, 10));
    }

    #[tokio::test]
    async fn get_pending_calls_empty_outside_hours() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let campaign = test_campaign();
        store.insert_scheduled_call(&pending_call(&campaign, dt(2026, 7, 27, 9))).await.unwrap();
        let pending = get_pending_calls(&store, &campaign, dt(2026, 7, 27, 21), 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn get_pending_calls_empty_on_sunday() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let campaign = test_campaign();
        store.insert_scheduled_call(&pending_call(&campaign, dt(2026, 8, 2, 11))).await.unwrap();
        let pending = get_pending_calls(&store, &campaign, dt(2026, 8, 2, 11), 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn get_pending_calls_respects_concurrency_ceiling() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let mut campaign = test_campaign();
        campaign.max_concurrent_calls = 1;
        let mut calling = pending_call(&campaign, dt(2026, 7, 27, 11));
        calling.status = ScheduledCallStatus::Calling;
        store.insert_scheduled_call(&calling).await.unwrap();
        store.insert_scheduled_call(&pending_call(&campaign, dt(2026, 7, 27, 11))).await.unwrap();

        let pending = get_pending_calls(&store, &campaign, dt(2026, 7, 27, 11), 10).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn retry_ladder_reaches_max_retries() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let campaign = test_campaign();
        let mut call = pending_call(&campaign, dt(2026, 7, 27, 11));
        call.max_attempts = 3;
        call.attempt_number = 3;
        store.insert_scheduled_call(&call).await.unwrap();

        schedule_retry(&store, &call, &campaign, "no-answer", 2, dt(2026, 7, 27, 11))
            .await
            .unwrap();

        let updated = store.get_scheduled_call(call.id).await.unwrap().unwrap();
        assert_eq!(updated.status, ScheduledCallStatus::MaxRetriesReached);
    }

    #[tokio::test]
    async fn s5_retry_ladder_adds_two_hours_each_attempt() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let campaign = test_campaign();
        let mut call = pending_call(&campaign, dt(2026, 7, 27, 11));
        call.max_attempts = 3;
        call.attempt_number = 1;
        store.insert_scheduled_call(&call).await.unwrap();

        schedule_retry(&store, &call, &campaign, "no-answer", 2, dt(2026, 7, 27, 11))
            .await
            .unwrap();
        let updated = store.get_scheduled_call(call.id).await.unwrap().unwrap();
        assert_eq!(updated.attempt_number, 2);
        assert_eq!(updated.target_time, dt(2026, 7, 27, 13));
        assert_eq!(updated.status, ScheduledCallStatus::Pending);
    }

    fn test_campaign() -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            name: "Whitefield launch".into(),
            status: ringline_domain::model::CampaignStatus::Running,
            calling_hours_start: 9,
            calling_hours_end: 20,
            max_attempts: 3,
            retry_delay_hours: 2,
            max_concurrent_calls: 5,
            calls_initiated: 0,
            calls_completed: 0,
        }
    }

    fn pending_call(campaign: &Campaign, target_time: DateTime<Utc>) -> ScheduledCall {
        ScheduledCall {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            lead_id: Uuid::new_v4(),
            target_time,
            status: ScheduledCallStatus::Pending,
            attempt_number: 1,
            max_attempts: campaign.max_attempts,
            last_attempt_time: None,
            current_call_sid: None,
            failure_reason: None,
        }
    }

    #[test]
    fn concurrency_guard_blocks_once_full() {
        let guard = ConcurrencyGuard::new();
        let id = Uuid::new_v4();
        assert!(guard.try_acquire(id, 1));
        assert!(!guard.try_acquire(id, 1));
        guard.release(id);
        assert!(guard.try_acquire(id, 1));
    }
}
