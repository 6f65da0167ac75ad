//! Deepgram-style HTTP STT adapter. SPEC_FULL.md §4.3.
//!
//! Grounded on the `authed_post`/timeout/error-wrap idiom the teacher used
//! for its OpenAI-compatible chat adapter: build a reqwest client once,
//! wrap every transport error into the crate's transient-provider error,
//! and surface malformed payloads as contract errors rather than panics.

use ringline_audio::codec;
use ringline_domain::config::SttConfig;
use ringline_domain::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::traits::{SttClient, Transcript};

pub struct DeepgramSttClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    locale: String,
    min_confidence: f32,
    keywords: Vec<String>,
    timeout: Duration,
}

impl DeepgramSttClient {
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env)
            .map_err(|_| Error::Config(format!("{} not set", cfg.api_key_env)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: "https://api.deepgram.com/v1/listen".into(),
            api_key,
            locale: cfg.locale.clone(),
            min_confidence: cfg.min_confidence,
            keywords: cfg.keywords.clone(),
            timeout: Duration::from_millis(cfg.request_timeout_ms),
        })
    }

    async fn authed_post(&self, wav_bytes: Vec<u8>) -> Result<DeepgramResponse> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("invalid STT base url: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("model", "nova-2-phonecall");
            q.append_pair("language", &self.locale);
            q.append_pair("smart_format", "true");
            q.append_pair("punctuate", "true");
            for kw in &self.keywords {
                q.append_pair("keywords", kw);
            }
        }

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .timeout(self.timeout)
            .body(wav_bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout("stt request timed out".into())
                } else {
                    Error::TransientProvider {
                        provider: "deepgram".into(),
                        message: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(if status.is_server_error() {
                Error::TransientProvider {
                    provider: "deepgram".into(),
                    message: format!("{status}: {body}"),
                }
            } else {
                Error::ProviderContract {
                    provider: "deepgram".into(),
                    message: format!("{status}: {body}"),
                }
            });
        }

        resp.json::<DeepgramResponse>()
            .await
            .map_err(|e| Error::ProviderContract {
                provider: "deepgram".into(),
                message: e.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl SttClient for DeepgramSttClient {
    async fn transcribe(&self, pcm: &[u8], call_id: &str) -> Result<Option<Transcript>> {
        let wav = codec::wrap_wav(pcm)?;
        let parsed = self.authed_post(wav).await?;

        let alt = parsed
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first());

        let Some(alt) = alt else {
            tracing::debug!(call_id, "stt returned no alternatives");
            return Ok(None);
        };

        if alt.confidence < self.min_confidence {
            tracing::debug!(call_id, confidence = alt.confidence, "stt below floor");
            return Ok(None);
        }

        let text = postprocess(&alt.transcript);
        if text.is_empty() {
            return Ok(None);
        }

        Ok(Some(Transcript {
            text,
            confidence: alt.confidence,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Debug, Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: f32,
}

/// Substitution table for recurring phone-audio mishearings, plus casing
/// normalization for the three domain units callers say constantly.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("too bee haich kay", "2bhk"),
    ("three bee haich kay", "3bhk"),
    ("why fi", "wifi"),
    ("rupees lakh", "lakh rupees"),
];

fn postprocess(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut lower = collapsed.to_lowercase();
    for (from, to) in SUBSTITUTIONS {
        lower = lower.replace(from, to);
    }
    normalize_units(&lower)
}

fn normalize_units(text: &str) -> String {
    text.split(' ')
        .map(|word| match word {
            "bhk" | "Bhk" | "BHK" => "BHK".to_string(),
            "lakh" | "lakhs" | "Lakh" => word.to_string(),
            "crore" | "crores" | "Crore" => word.to_string(),
            w if w.ends_with("bhk") && w.len() > 3 => {
                format!("{}BHK", &w[..w.len() - 3])
            }
            w => w.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(postprocess("hello   world"), "hello world");
    }

    #[test]
    fn normalizes_bhk_suffix() {
        assert_eq!(postprocess("looking for a 2bhk"), "looking for a 2BHK");
    }

    #[test]
    fn applies_substitution_table() {
        assert_eq!(postprocess("a too bee haich kay flat"), "a 2BHK flat");
    }
}
