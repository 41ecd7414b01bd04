//! Activity executor: timeout, retry, backoff, and idempotency for every
//! external side effect.
//!
//! The contract with the log is append-before-act: an `AttemptStarted`
//! event is durably recorded before the side effect runs, and the outcome
//! is appended the moment it is known. Successful results land in the
//! activity result cache inside the same transaction, so a completed side
//! effect is never repeated after a crash.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use rf_core::events::{EventBus, EventPayload};
use rf_core::{AttemptOutcome, RunId};
use rf_db::queries::activity_results;
use rf_db::{get_conn, DbPool};

use crate::event::RunEvent;
use crate::log::RunLog;

// ---------------------------------------------------------------------------
// ActivityError
// ---------------------------------------------------------------------------

/// Failure classification for activity attempts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivityError {
    /// Transient failure; the executor may retry.
    #[error("retryable failure: {reason}")]
    Retryable { reason: String },
    /// Permanent failure; retrying would produce the same result.
    #[error("fatal failure: {reason}")]
    Fatal { reason: String },
    /// The run was cancelled while the attempt was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl ActivityError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::Retryable {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Retryable { .. } => AttemptOutcome::RetryableFailure,
            Self::Fatal { .. } => AttemptOutcome::FatalFailure,
            Self::Cancelled => AttemptOutcome::RetryableFailure,
        }
    }

    fn reason(&self) -> String {
        match self {
            Self::Retryable { reason } | Self::Fatal { reason } => reason.clone(),
            Self::Cancelled => "cancelled".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Idempotency keys
// ---------------------------------------------------------------------------

/// Derive the idempotency key for one attempt. Run-level activities use
/// `-` in the scene position so the key shape stays uniform.
pub fn idempotency_key(
    run_id: &RunId,
    scene_index: Option<u32>,
    activity: &str,
    attempt: u32,
) -> String {
    match scene_index {
        Some(idx) => format!("{run_id}:{idx}:{activity}:{attempt}"),
        None => format!("{run_id}:-:{activity}:{attempt}"),
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy / ActivityRequest
// ---------------------------------------------------------------------------

/// Retry budget and backoff shape for an activity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts, first attempt included.
    pub max_attempts: u32,
    /// Initial backoff; doubles per retry.
    pub backoff_base: Duration,
    /// Cap on the computed backoff delay.
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff_base,
            backoff_cap,
        }
    }

    /// Backoff before retry number `retry` (0-based), without jitter.
    fn delay(&self, retry: u32) -> Duration {
        let exp = 2u64.saturating_pow(retry.min(16));
        self.backoff_base
            .saturating_mul(exp as u32)
            .min(self.backoff_cap)
    }
}

impl From<&rf_core::config::InferenceConfig> for RetryPolicy {
    fn from(cfg: &rf_core::config::InferenceConfig) -> Self {
        Self::new(
            cfg.max_attempts,
            Duration::from_secs(cfg.backoff_base_secs),
            Duration::from_secs(cfg.backoff_cap_secs),
        )
    }
}

/// Everything the executor needs to know about one activity invocation.
#[derive(Debug, Clone)]
pub struct ActivityRequest {
    pub run_id: RunId,
    pub scene_index: Option<u32>,
    pub activity: String,
    /// Per-attempt deadline.
    pub timeout: Duration,
    pub policy: RetryPolicy,
    /// First attempt number to use; greater than 1 when resuming a run
    /// that already consumed attempts before a crash.
    pub start_attempt: u32,
}

impl ActivityRequest {
    pub fn new(
        run_id: &RunId,
        scene_index: Option<u32>,
        activity: &str,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            run_id: run_id.clone(),
            scene_index,
            activity: activity.to_string(),
            timeout,
            policy,
            start_attempt: 1,
        }
    }

    pub fn starting_at(mut self, attempt: u32) -> Self {
        self.start_attempt = attempt.max(1);
        self
    }
}

// ---------------------------------------------------------------------------
// ActivityExecutor
// ---------------------------------------------------------------------------

/// Runs activities under the durable attempt protocol.
pub struct ActivityExecutor {
    pool: DbPool,
    log: Arc<RunLog>,
    bus: Arc<EventBus>,
}

impl ActivityExecutor {
    pub fn new(pool: DbPool, log: Arc<RunLog>, bus: Arc<EventBus>) -> Self {
        Self { pool, log, bus }
    }

    /// Execute an activity with retries, returning its deserialized result.
    ///
    /// Checks the result cache first: if any earlier attempt of this
    /// activity already succeeded (typically before a crash), its recorded
    /// result is returned and the side effect is not repeated.
    pub async fn execute<T, F, Fut>(
        &self,
        req: &ActivityRequest,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, ActivityError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        if let Some(cached) = self.cached_success(req)? {
            tracing::debug!(
                run_id = %req.run_id,
                activity = %req.activity,
                "Reusing cached activity result"
            );
            return Ok(cached);
        }

        let mut last_reason = String::new();

        for i in 0..req.policy.max_attempts {
            if cancel.is_cancelled() {
                return Err(ActivityError::Cancelled);
            }

            let attempt = req.start_attempt + i;
            let key = idempotency_key(&req.run_id, req.scene_index, &req.activity, attempt);

            if let Err(e) = self.log.append(
                &req.run_id,
                &RunEvent::AttemptStarted {
                    scene_index: req.scene_index,
                    activity: req.activity.clone(),
                    attempt,
                    idempotency_key: key.clone(),
                },
            ) {
                // The attempt never becomes durable, so it must not run.
                // This consumes an attempt slot like any other failure.
                tracing::warn!(
                    run_id = %req.run_id,
                    activity = %req.activity,
                    error = %e,
                    "Failed to record attempt start"
                );
                last_reason = format!("log append failed: {e}");
                self.backoff(req, i, cancel).await?;
                continue;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ActivityError::Cancelled),
                res = tokio::time::timeout(req.timeout, op(attempt)) => match res {
                    Ok(inner) => inner,
                    Err(_) => Err(ActivityError::retryable(format!(
                        "attempt timed out after {}s",
                        req.timeout.as_secs()
                    ))),
                },
            };

            match outcome {
                Ok(value) => {
                    let result = serde_json::to_value(&value).map_err(|e| {
                        ActivityError::fatal(format!("serialize activity result: {e}"))
                    })?;
                    if let Err(e) = self.record_finished(
                        req,
                        &key,
                        AttemptOutcome::Success,
                        Some(result),
                        None,
                    ) {
                        // Side effect is done but not recorded; fail the
                        // attempt so a retry re-records it (at-least-once).
                        tracing::warn!(
                            run_id = %req.run_id,
                            activity = %req.activity,
                            error = %e,
                            "Failed to record attempt success"
                        );
                        last_reason = format!("log append failed: {e}");
                        self.backoff(req, i, cancel).await?;
                        continue;
                    }
                    return Ok(value);
                }
                Err(ActivityError::Cancelled) => return Err(ActivityError::Cancelled),
                Err(err @ ActivityError::Fatal { .. }) => {
                    let _ = self.record_finished(
                        req,
                        &key,
                        err.outcome(),
                        None,
                        Some(err.reason()),
                    );
                    return Err(err);
                }
                Err(err @ ActivityError::Retryable { .. }) => {
                    last_reason = err.reason();
                    let _ = self.record_finished(
                        req,
                        &key,
                        err.outcome(),
                        None,
                        Some(last_reason.clone()),
                    );
                    if i + 1 < req.policy.max_attempts {
                        self.bus.broadcast(EventPayload::ActivityRetrying {
                            run_id: req.run_id.clone(),
                            scene_index: req.scene_index,
                            activity: req.activity.clone(),
                            attempt: attempt + 1,
                            reason: last_reason.clone(),
                        });
                        self.backoff(req, i, cancel).await?;
                    }
                }
            }
        }

        Err(ActivityError::retryable(format!(
            "retries exhausted after {} attempts: {last_reason}",
            req.policy.max_attempts
        )))
    }

    fn cached_success<T: DeserializeOwned>(
        &self,
        req: &ActivityRequest,
    ) -> Result<Option<T>, ActivityError> {
        let conn = get_conn(&self.pool)
            .map_err(|e| ActivityError::retryable(format!("database unavailable: {e}")))?;
        let hit = activity_results::find_success(
            &conn,
            &req.run_id,
            req.scene_index,
            &req.activity,
        )
        .map_err(|e| ActivityError::retryable(format!("result cache lookup failed: {e}")))?;

        match hit.and_then(|row| row.result) {
            Some(result) => serde_json::from_value(result)
                .map(Some)
                .map_err(|e| ActivityError::fatal(format!("corrupt cached result: {e}"))),
            None => Ok(None),
        }
    }

    fn record_finished(
        &self,
        req: &ActivityRequest,
        key: &str,
        outcome: AttemptOutcome,
        result: Option<serde_json::Value>,
        detail: Option<String>,
    ) -> rf_core::Result<i64> {
        self.log.append(
            &req.run_id,
            &RunEvent::AttemptFinished {
                scene_index: req.scene_index,
                activity: req.activity.clone(),
                idempotency_key: key.to_string(),
                outcome,
                result,
                detail,
            },
        )
    }

    /// Sleep out the backoff before retry `i`, aborting early on cancel.
    async fn backoff(
        &self,
        req: &ActivityRequest,
        i: u32,
        cancel: &CancellationToken,
    ) -> Result<(), ActivityError> {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=500));
        let delay = req.policy.delay(i) + jitter;
        tracing::debug!(
            run_id = %req.run_id,
            activity = %req.activity,
            delay_ms = delay.as_millis() as u64,
            "Backing off before retry"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(ActivityError::Cancelled),
        }
    }
}
