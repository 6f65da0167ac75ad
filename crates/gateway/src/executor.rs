//! Call executor (C9). SPEC_FULL.md §4.9, §6 "Telephony HTTP".

use chrono::Utc;
use ringline_domain::config::TelephonyConfig;
use ringline_domain::error::{Error, Result};
use ringline_domain::model::{CallSession, Lead, ScheduledCall};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::SharedStore;
use crate::scheduler::{self, ConcurrencyGuard};

pub struct CallExecutor {
    http: reqwest::Client,
    base_url: String,
    account_sid: String,
    api_key: String,
    api_token: String,
    virtual_number: String,
    flow_id: String,
    our_base_url: String,
    timeout: std::time::Duration,
}

/// Mirrors what the gateway's `start` handler expects in `customField`
/// so the turn controller has lead context without a side lookup (§4.9).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CallCustomField {
    pub lead_id: Uuid,
    pub lead_name: String,
    pub phone: String,
    pub property_type: Option<String>,
    pub location: Option<String>,
    pub budget: Option<i64>,
    pub campaign_id: Uuid,
    pub scheduled_call_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ConnectResponse {
    #[serde(rename = "Call")]
    call: ConnectCall,
}

#[derive(Debug, Deserialize)]
struct ConnectCall {
    #[serde(rename = "Sid")]
    sid: String,
}

impl CallExecutor {
    pub fn from_config(cfg: &TelephonyConfig, base_url: String) -> Result<Self> {
        let account_sid = std::env::var(&cfg.account_sid_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.account_sid_env)))?;
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.api_key_env)))?;
        let api_token = std::env::var(&cfg.api_token_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.api_token_env)))?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url,
            account_sid,
            api_key,
            api_token,
            virtual_number: cfg.virtual_number.clone(),
            flow_id: cfg.flow_id.clone(),
            our_base_url: cfg.our_base_url.clone(),
            timeout: std::time::Duration::from_millis(cfg.connect_timeout_ms),
        })
    }

    /// Places the outbound call and records the resulting attempt. On
    /// success: inserts the `CallSession`, bumps the lead's attempt
    /// counter, moves the `ScheduledCall` to `calling`. On failure:
    /// schedules a retry via C10 and marks the row failed.
    pub async fn execute(
        &self,
        store: &SharedStore,
        guard: &ConcurrencyGuard,
        call: &ScheduledCall,
        lead: &Lead,
        campaign: &ringline_domain::model::Campaign,
    ) -> Result<()> {
        let custom_field = CallCustomField {
            lead_id: lead.id,
            lead_name: lead.display_name.clone(),
            phone: lead.phone.clone(),
            property_type: lead.interest.property_type.clone(),
            location: lead.interest.location.clone(),
            budget: lead.interest.budget,
            campaign_id: campaign.id,
            scheduled_call_id: call.id,
        };
        let custom_field_json = serde_json::to_string(&custom_field)
            .map_err(|e| Error::Other(format!("custom field encode failed: {e}")))?;

        let status_callback = format!("{}/webhooks/exotel/call-status", self.our_base_url);

        let form = [
            ("From", self.virtual_number.as_str()),
            ("To", lead.phone.as_str()),
            ("CallerId", self.virtual_number.as_str()),
            ("CustomField", custom_field_json.as_str()),
            ("Record", "true"),
            ("StatusCallback", status_callback.as_str()),
            ("Url", self.flow_id.as_str()),
        ];

        let result = self.connect(&form).await;

        match result {
            Ok(call_sid) => {
                store.mark_calling(call.id, &call_sid).await?;
                store.record_call_attempt(lead.id, Utc::now()).await?;
                let session = CallSession::new(call_sid.clone(), lead.id, Some(call.id));
                store.insert_call_session(&session).await?;
                ringline_domain::trace::TraceEvent::CallExecuted {
                    scheduled_call_id: call.id.to_string(),
                    call_sid: Some(call_sid),
                    ok: true,
                }
                .emit();
                Ok(())
            }
            Err(e) => {
                guard.release(campaign.id);
                store
                    .mark_scheduled_call_failed(call.id, &e.to_string())
                    .await?;
                scheduler::schedule_retry(
                    store,
                    call,
                    campaign,
                    "executor_error",
                    campaign.retry_delay_hours,
                    Utc::now(),
                )
                .await?;
                ringline_domain::trace::TraceEvent::CallExecuted {
                    scheduled_call_id: call.id.to_string(),
                    call_sid: None,
                    ok: false,
                }
                .emit();
                Err(e)
            }
        }
    }

    async fn connect(&self, form: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}/Calls/connect.json", self.base_url);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.api_key, Some(&self.api_token))
            .form(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("exotel connect: {e}"))
                } else {
                    Error::TransientProvider {
                        provider: "exotel".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(Error::TransientProvider {
                provider: "exotel".into(),
                message: format!("http {status}"),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ProviderContract {
                provider: "exotel".into(),
                message: format!("http {status}: {body}"),
            });
        }

        let parsed: ConnectResponse = resp.json().await.map_err(|e| Error::ProviderContract {
            provider: "exotel".into(),
            message: format!("unparseable connect response: {e}"),
        })?;
        let _ = self.account_sid; // present for future multi-account routing
        Ok(parsed.call.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_field_serializes_with_lead_context() {
        let field = CallCustomField {
            lead_id: Uuid::new_v4(),
            lead_name: "Rajesh".into(),
            phone: "+919876543210".into(),
            property_type: Some("3BHK".into()),
            location: Some("Whitefield".into()),
            budget: Some(8_000_000),
            campaign_id: Uuid::new_v4(),
            scheduled_call_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["lead_name"], "Rajesh");
        assert_eq!(json["budget"], 8_000_000);
    }
}
