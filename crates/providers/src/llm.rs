//! Chat-completions-style HTTP LLM adapter. SPEC_FULL.md §4.4.
//!
//! Streams server-sent-event chunks but buffers them into one string
//! before parsing — the contract is buffer-then-parse, not
//! token-by-token dispatch, so callers never see partial JSON.

use futures_util::StreamExt;
use ringline_domain::config::LlmConfig;
use ringline_domain::error::{Error, Result};
use ringline_domain::model::Speaker;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use crate::traits::{LlmClient, LlmRequest, LlmResponseJson, LlmResult};

pub struct OpenAiLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    json_mode: bool,
    timeout: Duration,
    history_turns: usize,
}

impl OpenAiLlmClient {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.api_key_env)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: cfg.base_url.clone(),
            api_key,
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            json_mode: cfg.json_mode,
            timeout: Duration::from_millis(cfg.request_timeout_ms),
            history_turns: cfg.history_turns,
        })
    }

    fn build_body(&self, req: &LlmRequest) -> serde_json::Value {
        let mut messages = vec![json!({"role": "system", "content": req.system_prompt})];

        let start = req.history.len().saturating_sub(self.history_turns);
        for line in &req.history[start..] {
            let role = match line.speaker {
                Speaker::Agent => "assistant",
                Speaker::User => "user",
            };
            messages.push(json!({"role": role, "content": line.text}));
        }
        messages.push(json!({"role": "user", "content": req.user_input}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": true,
        });
        if self.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }

    async fn authed_post(&self, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout("llm request timed out".into())
                } else {
                    Error::TransientProvider {
                        provider: "llm".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                Error::TransientProvider {
                    provider: "llm".into(),
                    message: format!("{status}: {text}"),
                }
            } else {
                Error::ProviderContract {
                    provider: "llm".into(),
                    message: format!("{status}: {text}"),
                }
            });
        }

        let mut stream = resp.bytes_stream();
        let mut aggregated = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::TransientProvider {
                provider: "llm".into(),
                message: e.to_string(),
            })?;
            for line in std::str::from_utf8(&chunk).unwrap_or("").lines() {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }
                if let Ok(event) = serde_json::from_str::<StreamChunk>(data) {
                    if let Some(choice) = event.choices.first() {
                        if let Some(content) = &choice.delta.content {
                            aggregated.push_str(content);
                        }
                    }
                }
            }
        }
        Ok(aggregated)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn generate(&self, req: LlmRequest) -> Result<LlmResult> {
        let body = self.build_body(&req);
        let aggregated = match self.authed_post(body).await {
            Ok(text) => text,
            Err(Error::TransientProvider { .. }) | Err(Error::Timeout(_)) => {
                return Ok(LlmResult::safe_default());
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_str::<LlmResponseJson>(&aggregated) {
            Ok(raw) => Ok(raw.into()),
            Err(e) => {
                tracing::warn!(error = %e, payload = %aggregated, "llm returned malformed json");
                Ok(LlmResult::safe_default())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Serialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ringline_domain::model::TranscriptLine;

    fn client() -> OpenAiLlmClient {
        OpenAiLlmClient {
            http: reqwest::Client::new(),
            base_url: "https://example.test/v1".into(),
            api_key: "test".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.8,
            max_tokens: 200,
            json_mode: true,
            timeout: Duration::from_millis(1000),
            history_turns: 2,
        }
    }

    fn turn(speaker: Speaker, text: &str) -> TranscriptLine {
        TranscriptLine {
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn truncates_history_to_configured_turns() {
        let c = client();
        let req = LlmRequest {
            user_input: "current".into(),
            history: vec![
                turn(Speaker::Agent, "one"),
                turn(Speaker::User, "two"),
                turn(Speaker::Agent, "three"),
                turn(Speaker::User, "four"),
            ],
            lead_context: crate::traits::LeadContext {
                lead_name: "Asha".into(),
                property_type: None,
                location: None,
                budget: None,
            },
            system_prompt: "sys".into(),
        };
        let body = c.build_body(&req);
        let messages = body["messages"].as_array().unwrap();
        // system + last 2 history turns + current user = 4
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["content"], "three");
        assert_eq!(messages[3]["content"], "current");
    }

    #[test]
    fn json_mode_sets_response_format() {
        let c = client();
        let req = LlmRequest {
            user_input: "hi".into(),
            history: vec![],
            lead_context: crate::traits::LeadContext {
                lead_name: "Asha".into(),
                property_type: None,
                location: None,
                budget: None,
            },
            system_prompt: "sys".into(),
        };
        let body = c.build_body(&req);
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
