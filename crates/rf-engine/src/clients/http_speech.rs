//! HTTP client for the voiceover synthesis backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use rf_core::ResultRef;

use crate::activity::ActivityError;
use crate::collab::SpeechClient;

/// Synthesis is a single blocking call, so the timeout covers the whole
/// generation rather than one round trip.
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(300);

pub struct HttpSpeechClient {
    client: Client,
    base_url: String,
    voice: String,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    output: String,
}

impl HttpSpeechClient {
    pub fn new(base_url: &str, voice: &str) -> Self {
        let client = Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build speech HTTP client: {e}");
                Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            voice: voice.to_string(),
        }
    }
}

#[async_trait]
impl SpeechClient for HttpSpeechClient {
    async fn synthesize(&self, script: &str) -> Result<ResultRef, ActivityError> {
        let url = format!("{}/v1/audio/speech", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "input": script,
                "voice": self.voice,
            }))
            .send()
            .await
            .map_err(|e| ActivityError::retryable(format!("speech synthesis: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                ActivityError::fatal(format!("speech synthesis rejected ({status}): {body}"))
            } else {
                ActivityError::retryable(format!("speech synthesis failed ({status}): {body}"))
            });
        }

        let parsed: SynthesizeResponse = resp
            .json()
            .await
            .map_err(|e| ActivityError::retryable(format!("speech synthesis response: {e}")))?;
        Ok(ResultRef::new(parsed.output))
    }
}
