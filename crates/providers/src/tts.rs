//! ElevenLabs-style HTTP TTS adapter. SPEC_FULL.md §4.5.
//!
//! Open question resolved here: the provider is asked for raw PCM at
//! 8 kHz directly (`output_format=pcm_8000`) rather than its default MP3,
//! so C1's `transcode` only ever has to validate a WAV/PCM container —
//! no MP3 decoder is pulled into the dependency tree. See DESIGN.md.

use ringline_domain::config::TtsConfig;
use ringline_domain::error::{Error, Result};
use serde_json::json;
use std::time::Duration;

use crate::traits::TtsClient;

pub struct ElevenLabsTtsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    voice_id: String,
    stability: f64,
    similarity_boost: f64,
    style: f64,
    timeout: Duration,
}

impl ElevenLabsTtsClient {
    pub fn from_config(cfg: &TtsConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.api_key_env)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: "https://api.elevenlabs.io/v1".into(),
            api_key,
            voice_id: cfg.voice_id.clone(),
            stability: cfg.stability,
            similarity_boost: cfg.similarity_boost,
            style: cfg.style,
            timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }
}

#[async_trait::async_trait]
impl TtsClient for ElevenLabsTtsClient {
    async fn synthesize(&self, text: &str, call_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/text-to-speech/{}?output_format=pcm_8000",
            self.base_url, self.voice_id
        );

        let body = json!({
            "text": text,
            "model_id": "eleven_turbo_v2",
            "voice_settings": {
                "stability": self.stability,
                "similarity_boost": self.similarity_boost,
                "style": self.style,
            },
            "optimize_streaming_latency": 4,
        });

        let resp = self
            .http
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout("tts request timed out".into())
                } else {
                    Error::TransientProvider {
                        provider: "elevenlabs".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(call_id, %status, body = %text, "tts request failed");
            return Err(if status.is_server_error() {
                Error::TransientProvider {
                    provider: "elevenlabs".into(),
                    message: format!("{status}: {text}"),
                }
            } else {
                Error::ProviderContract {
                    provider: "elevenlabs".into(),
                    message: format!("{status}: {text}"),
                }
            });
        }

        let pcm = resp.bytes().await.map_err(|e| Error::TransientProvider {
            provider: "elevenlabs".into(),
            message: e.to_string(),
        })?;

        Ok(pcm.to_vec())
    }
}
