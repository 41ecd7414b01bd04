//! HTTP client for the submit/poll inference backend.
//!
//! Error classification: 4xx responses are fatal (the request itself is
//! bad, resending it changes nothing), 5xx and transport errors are
//! retryable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use rf_core::ResultRef;

use crate::activity::ActivityError;
use crate::collab::{InferenceClient, InferenceRequest, PollOutcome, RemoteJobId};

/// Timeout for individual HTTP requests. Generation itself is handled via
/// polling, so this only bounds a single round trip.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpInferenceClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpInferenceClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build inference HTTP client: {e}");
                Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn classify(status: reqwest::StatusCode, body: &str, context: &str) -> ActivityError {
        if status.is_client_error() {
            ActivityError::fatal(format!("{context} rejected ({status}): {body}"))
        } else {
            ActivityError::retryable(format!("{context} failed ({status}): {body}"))
        }
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn submit(&self, request: &InferenceRequest) -> Result<RemoteJobId, ActivityError> {
        let url = format!("{}/prompt", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ActivityError::retryable(format!("inference submit: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body, "inference submit"));
        }

        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| ActivityError::retryable(format!("inference submit response: {e}")))?;
        Ok(RemoteJobId::new(parsed.prompt_id))
    }

    async fn poll(&self, job: &RemoteJobId) -> Result<PollOutcome, ActivityError> {
        let url = format!("{}/history/{}", self.base_url, job);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ActivityError::retryable(format!("inference poll: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify(status, &body, "inference poll"));
        }

        let parsed: StatusResponse = resp
            .json()
            .await
            .map_err(|e| ActivityError::retryable(format!("inference poll response: {e}")))?;

        match parsed.status.as_str() {
            "completed" => match parsed.output {
                Some(output) => Ok(PollOutcome::Done(ResultRef::new(output))),
                None => Err(ActivityError::retryable(format!(
                    "generation {job} reported completed without an output"
                ))),
            },
            "failed" => Ok(PollOutcome::Failed(
                parsed.error.unwrap_or_else(|| "generation failed".into()),
            )),
            _ => Ok(PollOutcome::Pending),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn submit_returns_remote_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"prompt_id": "j-1"})),
            )
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&server.uri());
        let job = client
            .submit(&InferenceRequest {
                prompt: "sunrise".into(),
                source_image: None,
                width: 1080,
                height: 1920,
            })
            .await
            .unwrap();
        assert_eq!(job.as_str(), "j-1");
    }

    #[tokio::test]
    async fn client_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&server.uri());
        let err = client
            .submit(&InferenceRequest {
                prompt: "".into(),
                source_image: None,
                width: 0,
                height: 0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Fatal { .. }));
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&server.uri());
        let err = client
            .submit(&InferenceRequest {
                prompt: "sunrise".into(),
                source_image: None,
                width: 1080,
                height: 1920,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Retryable { .. }));
    }

    #[tokio::test]
    async fn poll_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/history/pending"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "running"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "completed", "output": "img.png"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/history/broken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"status": "failed", "error": "out of memory"}),
            ))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&server.uri());
        assert_eq!(
            client.poll(&RemoteJobId::new("pending")).await.unwrap(),
            PollOutcome::Pending
        );
        assert_eq!(
            client.poll(&RemoteJobId::new("done")).await.unwrap(),
            PollOutcome::Done(ResultRef::new("img.png"))
        );
        assert_eq!(
            client.poll(&RemoteJobId::new("broken")).await.unwrap(),
            PollOutcome::Failed("out of memory".into())
        );
    }

    #[tokio::test]
    async fn unreachable_backend_is_retryable() {
        let client = HttpInferenceClient::new("http://127.0.0.1:1");
        let err = client
            .submit(&InferenceRequest {
                prompt: "sunrise".into(),
                source_image: None,
                width: 1080,
                height: 1920,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Retryable { .. }));
    }
}
