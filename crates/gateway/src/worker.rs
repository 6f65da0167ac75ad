//! Worker loop (C11). SPEC_FULL.md §4.11 — drains the scheduler every
//! `worker_tick_secs` and hands due calls to the executor.

use std::sync::Arc;

use chrono::Utc;
use ringline_domain::config::SchedulingConfig;

use crate::db::SharedStore;
use crate::executor::CallExecutor;
use crate::scheduler::{self, ConcurrencyGuard};

pub struct Worker {
    store: SharedStore,
    executor: Arc<CallExecutor>,
    guard: Arc<ConcurrencyGuard>,
    tick: std::time::Duration,
}

impl Worker {
    pub fn new(
        store: SharedStore,
        executor: Arc<CallExecutor>,
        guard: Arc<ConcurrencyGuard>,
        cfg: &SchedulingConfig,
    ) -> Self {
        Self {
            store,
            executor,
            guard,
            tick: std::time::Duration::from_secs(cfg.worker_tick_secs),
        }
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick_once().await {
                tracing::error!(error = %e, "worker tick failed");
            }
        }
    }

    /// One tick: fetch due calls per running campaign and execute them.
    /// Errors on a single call are logged and do not abort the batch.
    pub async fn tick_once(&self) -> ringline_domain::error::Result<()> {
        let now = Utc::now();
        let campaigns = self.store.list_running_campaigns().await?;
        for campaign in campaigns {
            let due = scheduler::get_pending_calls(&self.store, &campaign, now, 50).await?;
            for call in due {
                if !self.guard.try_acquire(campaign.id, campaign.max_concurrent_calls) {
                    continue;
                }
                let Some(lead) = self.store.get_lead(call.lead_id).await? else {
                    self.guard.release(campaign.id);
                    tracing::error!(lead_id = %call.lead_id, "scheduled call references missing lead");
                    continue;
                };
                if let Err(e) = self
                    .executor
                    .execute(&self.store, &self.guard, &call, &lead, &campaign)
                    .await
                {
                    tracing::error!(scheduled_call_id = %call.id, error = %e, "call execution failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringline_domain::model::{Campaign, CampaignStatus, ScheduledCall, ScheduledCallStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn tick_skips_calls_when_no_lead_on_record() {
        let store: SharedStore = Arc::new(crate::db::InMemoryStore::new());
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "c".into(),
            status: CampaignStatus::Running,
            calling_hours_start: 0,
            calling_hours_end: 23,
            max_attempts: 3,
            retry_delay_hours: 2,
            max_concurrent_calls: 5,
            calls_initiated: 0,
            calls_completed: 0,
        };
        store.seed_campaign(campaign.clone());
        let missing_lead_id = Uuid::new_v4();
        store
            .insert_scheduled_call(&ScheduledCall {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                lead_id: missing_lead_id,
                target_time: Utc::now() - chrono::Duration::minutes(1),
                status: ScheduledCallStatus::Pending,
                attempt_number: 1,
                max_attempts: 3,
                last_attempt_time: None,
                current_call_sid: None,
                failure_reason: None,
            })
            .await
            .unwrap();

        // No executor call should happen (lead is missing); the guard
        // must be released so it doesn't leak a permanently-held slot.
        let guard = Arc::new(ConcurrencyGuard::new());
        let due = scheduler::get_pending_calls(&store, &campaign, Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert!(guard.try_acquire(campaign.id, campaign.max_concurrent_calls));
        guard.release(campaign.id);
        assert_eq!(guard.in_flight(campaign.id), 0);
    }
}
