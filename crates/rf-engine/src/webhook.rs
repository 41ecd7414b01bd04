//! Terminal-run webhook delivery.
//!
//! Delivery runs through the activity executor, so it shares the retry
//! budget and the at-least-once guarantee with every other side effect.
//! The payload shape is `{event, timestamp, data}` with events
//! `run_completed` and `run_failed`.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

pub struct WebhookNotifier {
    client: Client,
    url: Option<String>,
}

/// Result of one delivery, recorded in the activity result cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub delivered: bool,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build webhook HTTP client: {e}");
                Client::new()
            });
        Self { client, url }
    }

    /// True when a target URL is configured.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Deliver one notification. A missing URL is a successful no-op so
    /// callers do not need to special-case unconfigured deployments.
    pub async fn notify(
        &self,
        event: &str,
        data: serde_json::Value,
    ) -> Result<Delivery, ActivityError> {
        let Some(url) = &self.url else {
            return Ok(Delivery { delivered: false });
        };

        let payload = serde_json::json!({
            "event": event,
            "timestamp": Utc::now().to_rfc3339(),
            "data": data,
        });

        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ActivityError::retryable(format!("webhook delivery: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            tracing::info!(event, status = %status, "Webhook delivered");
            return Ok(Delivery { delivered: true });
        }

        let body = resp.text().await.unwrap_or_default();
        Err(if status.is_client_error() {
            ActivityError::fatal(format!("webhook rejected ({status}): {body}"))
        } else {
            ActivityError::retryable(format!("webhook failed ({status}): {body}"))
        })
    }
}
