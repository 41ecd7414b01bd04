//! Run orchestrator: admission, scene fan-out, finalization.
//!
//! One driver task per run. The driver owns the run's cancellation token,
//! appends every run-level transition to the log before acting on it, and
//! releases the owner's admission slot exactly once, in the same breath as
//! the terminal event.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use rf_core::config::Config;
use rf_core::events::{EventBus, EventPayload};
use rf_core::{Error, FailureDetail, OwnerId, Result, ResultRef, RunId, RunParams, RunStatus, SceneSpec, SceneStatus};
use rf_db::queries::runs;
use rf_db::{get_conn, DbPool};

use crate::activity::{ActivityError, ActivityExecutor, ActivityRequest, RetryPolicy};
use crate::admission::{AdmissionController, ConfigTierLookup};
use crate::collab::{InferenceClient, MediaTransform, SpeechClient};
use crate::event::RunEvent;
use crate::log::RunLog;
use crate::replay::RunSnapshot;
use crate::scene::{SceneOutcome, SceneRunner};
use crate::webhook::{Delivery, WebhookNotifier};

/// Per-attempt timeout for voiceover synthesis.
const SPEECH_TIMEOUT: Duration = Duration::from_secs(330);
/// Per-attempt timeout for stitch and subtitle activities.
const MEDIA_TIMEOUT: Duration = Duration::from_secs(600);

/// A run submission as received from the API.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    pub run_id: RunId,
    pub owner_id: OwnerId,
    pub scenes: Vec<SceneSpec>,
    pub params: RunParams,
}

pub struct Orchestrator {
    pool: DbPool,
    log: Arc<RunLog>,
    bus: Arc<EventBus>,
    executor: Arc<ActivityExecutor>,
    admission: AdmissionController,
    inference: Arc<dyn InferenceClient>,
    speech: Arc<dyn SpeechClient>,
    transform: Arc<dyn MediaTransform>,
    webhook: Arc<WebhookNotifier>,
    policy: RetryPolicy,
    poll_interval: Duration,
    deadline: Duration,
    webhook_timeout: Duration,
    width: u32,
    height: u32,
    active: DashMap<RunId, CancellationToken>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        bus: Arc<EventBus>,
        config: &Config,
        inference: Arc<dyn InferenceClient>,
        speech: Arc<dyn SpeechClient>,
        transform: Arc<dyn MediaTransform>,
        webhook: Arc<WebhookNotifier>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let log = Arc::new(RunLog::new(pool.clone()));
        let executor = Arc::new(ActivityExecutor::new(pool.clone(), log.clone(), bus.clone()));
        let admission = AdmissionController::new(
            pool.clone(),
            Arc::new(ConfigTierLookup::from(&config.tiers)),
        );

        Arc::new(Self {
            pool,
            log,
            bus,
            executor,
            admission,
            inference,
            speech,
            transform,
            webhook,
            policy: RetryPolicy::from(&config.inference),
            poll_interval: config.inference.poll_interval(),
            deadline: config.inference.overall_deadline(),
            webhook_timeout: Duration::from_secs(config.webhook.timeout_secs + 10),
            width: config.media.width,
            height: config.media.height,
            active: DashMap::new(),
            shutdown,
        })
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Validate and admit a new run, spawn its driver, and return the
    /// claimed slot index. Rejection (duplicate ID, owner at its limit)
    /// is synchronous.
    pub fn start_run(self: &Arc<Self>, submission: RunSubmission) -> Result<u32> {
        validate(&submission)?;
        let RunSubmission {
            run_id,
            owner_id,
            scenes,
            params,
        } = submission;

        {
            let conn = get_conn(&self.pool)?;
            if runs::run_exists(&conn, &run_id)? {
                return Err(Error::conflict(format!("run {run_id} already exists")));
            }
        }

        let Some(slot) = self.admission.acquire(&owner_id, &run_id)? else {
            return Err(Error::conflict(format!(
                "owner {owner_id} is at its concurrency limit"
            )));
        };

        let created = RunEvent::RunCreated {
            owner_id: owner_id.clone(),
            slot,
            scenes,
            params,
        };
        if let Err(e) = self.log.append(&run_id, &created) {
            self.release_slot(&owner_id, &run_id);
            return Err(e);
        }

        tracing::info!(run_id = %run_id, owner_id = %owner_id, slot, "Run accepted");
        self.bus.broadcast(EventPayload::RunAccepted {
            run_id: run_id.clone(),
            owner_id,
            slot,
        });

        let snapshot = RunSnapshot::from_events(&run_id, std::slice::from_ref(&created))?;
        self.spawn_driver(snapshot);

        Ok(slot)
    }

    /// Cancel a run. Returns `true` when a cancellation was delivered,
    /// `false` when the run is already terminal.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<bool> {
        if let Some(entry) = self.active.get(run_id) {
            tracing::info!(run_id = %run_id, "Cancelling active run");
            entry.value().cancel();
            return Ok(true);
        }

        // No driver task; the run might be terminal, unknown, or stranded
        // from a previous process that never resumed it.
        let conn = get_conn(&self.pool)?;
        let Some(row) = runs::get_run(&conn, run_id)? else {
            return Err(Error::not_found("run", run_id));
        };
        drop(conn);

        if row.status.is_terminal() {
            return Ok(false);
        }

        tracing::info!(run_id = %run_id, "Cancelling stranded run");
        self.log.append(run_id, &RunEvent::RunCancelled)?;
        self.release_slot(&row.owner_id, run_id);
        self.bus.broadcast(EventPayload::RunCancelled {
            run_id: run_id.clone(),
        });
        Ok(true)
    }

    /// Replay and re-spawn every non-terminal run. Called once at startup.
    pub fn resume_incomplete_runs(self: &Arc<Self>) -> Result<usize> {
        let rows = {
            let conn = get_conn(&self.pool)?;
            runs::list_non_terminal(&conn)?
        };

        let mut resumed = 0;
        for row in rows {
            let run_id = row.run_id.clone();
            let events = match self.log.read(&run_id) {
                Ok(events) => events,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Cannot read run log; skipping resume");
                    continue;
                }
            };
            let snapshot = match RunSnapshot::from_events(&run_id, &events) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Replay failed; skipping resume");
                    continue;
                }
            };
            if snapshot.status.is_terminal() {
                continue;
            }

            tracing::info!(run_id = %run_id, status = %snapshot.status, "Resuming run");
            self.spawn_driver(snapshot);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Number of runs with a live driver task.
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    /// Register the run's cancellation token and spawn its driver task.
    ///
    /// The token enters `active` before the task exists, so a cancel that
    /// lands right after submission still reaches the driver instead of
    /// racing it down the stranded-run path.
    fn spawn_driver(self: &Arc<Self>, snapshot: RunSnapshot) {
        let cancel = self.shutdown.child_token();
        self.active.insert(snapshot.run_id.clone(), cancel.clone());
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(snapshot, cancel).await });
    }

    async fn drive(self: Arc<Self>, snapshot: RunSnapshot, cancel: CancellationToken) {
        let run_id = snapshot.run_id.clone();
        let result = self.drive_inner(snapshot, &cancel).await;
        self.active.remove(&run_id);

        if let Err(e) = result {
            tracing::error!(run_id = %run_id, error = %e, "Run driver aborted");
        }
    }

    async fn drive_inner(&self, snap: RunSnapshot, cancel: &CancellationToken) -> Result<()> {
        let run_id = snap.run_id.clone();
        let owner_id = snap.owner_id.clone();

        if snap.status.is_terminal() {
            return Ok(());
        }

        if snap.status == RunStatus::Pending {
            self.log.append(
                &run_id,
                &RunEvent::RunStatusChanged {
                    status: RunStatus::Running,
                },
            )?;
            self.bus.broadcast(EventPayload::RunStarted {
                run_id: run_id.clone(),
            });
        }

        // Voiceover precedes the scene fan-out; its failure fails the run
        // before any scene work starts.
        let voiceover = match &snap.voiceover_ref {
            Some(v) => v.clone(),
            None => {
                let req = ActivityRequest::new(
                    &run_id,
                    None,
                    "generate_voiceover",
                    SPEECH_TIMEOUT,
                    self.policy.clone(),
                )
                .starting_at(snap.run_attempts("generate_voiceover") + 1);
                let script = snap.params.script.clone();

                match self
                    .executor
                    .execute(&req, cancel, |_| self.speech.synthesize(&script))
                    .await
                {
                    Ok(v) => {
                        self.log.append(
                            &run_id,
                            &RunEvent::VoiceoverReady {
                                voiceover_ref: v.clone(),
                            },
                        )?;
                        v
                    }
                    Err(ActivityError::Cancelled) => {
                        return self.finish_or_park(&run_id, &owner_id).await
                    }
                    Err(e) => {
                        return self
                            .finish_failed(
                                &run_id,
                                &owner_id,
                                vec![FailureDetail::run_level(
                                    "generate_voiceover",
                                    e.to_string(),
                                )],
                            )
                            .await
                    }
                }
            }
        };

        // Scene fan-out: one task per unfinished scene. Scenes are
        // isolated; a failure is recorded and surfaced in the aggregate
        // result while the siblings run to their own terminal states.
        // Only the run-level token stops a scene early.
        let mut set: JoinSet<SceneOutcome> = JoinSet::new();
        let mut outcomes: Vec<SceneOutcome> = Vec::new();

        for (index, scene) in snap.scenes.iter().enumerate() {
            let scene_index = index as u32;
            if scene.status.is_terminal() {
                outcomes.push(SceneOutcome {
                    scene_index,
                    status: scene.status,
                    video_ref: scene.video_ref.clone(),
                    failure: scene.failure.as_ref().map(|reason| {
                        FailureDetail::scene(scene_index, "scene", reason.clone())
                    }),
                    cancelled: false,
                });
                continue;
            }

            let runner = self.scene_runner();
            let run_id = run_id.clone();
            let scene = scene.clone();
            let token = cancel.clone();
            set.spawn(async move {
                match runner.run(&run_id, scene_index, &scene, &token).await {
                    Ok(outcome) => outcome,
                    Err(e) => SceneOutcome {
                        scene_index,
                        status: SceneStatus::Failed,
                        video_ref: None,
                        failure: Some(FailureDetail::scene(
                            scene_index,
                            "scene",
                            e.to_string(),
                        )),
                        cancelled: false,
                    },
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Some(failure) = &outcome.failure {
                        tracing::warn!(
                            run_id = %run_id,
                            scene_index = outcome.scene_index,
                            %failure,
                            "Scene failed"
                        );
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    outcomes.push(SceneOutcome {
                        scene_index: u32::MAX,
                        status: SceneStatus::Failed,
                        video_ref: None,
                        failure: Some(FailureDetail::run_level(
                            "scene",
                            format!("scene task aborted: {e}"),
                        )),
                        cancelled: false,
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            return self.finish_or_park(&run_id, &owner_id).await;
        }

        let failures: Vec<FailureDetail> = outcomes
            .iter()
            .filter_map(|o| o.failure.clone())
            .collect();
        if !failures.is_empty() {
            return self.finish_failed(&run_id, &owner_id, failures).await;
        }

        // All scenes done: assemble clips in scene order.
        outcomes.sort_by_key(|o| o.scene_index);
        let mut clips = Vec::with_capacity(outcomes.len());
        for outcome in &outcomes {
            match &outcome.video_ref {
                Some(clip) => clips.push(clip.clone()),
                None => {
                    return Err(Error::Internal(format!(
                        "run {run_id}: scene {} finished without a clip",
                        outcome.scene_index
                    )))
                }
            }
        }

        self.finalize(&run_id, &owner_id, &snap, clips, voiceover, cancel)
            .await
    }

    async fn finalize(
        &self,
        run_id: &RunId,
        owner_id: &OwnerId,
        snap: &RunSnapshot,
        clips: Vec<ResultRef>,
        voiceover: ResultRef,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if snap.status != RunStatus::Finalizing {
            self.log.append(
                run_id,
                &RunEvent::RunStatusChanged {
                    status: RunStatus::Finalizing,
                },
            )?;
        }
        self.bus.broadcast(EventPayload::RunFinalizing {
            run_id: run_id.clone(),
        });

        let stitch_req = ActivityRequest::new(
            run_id,
            None,
            "stitch_videos",
            MEDIA_TIMEOUT,
            self.policy.clone(),
        )
        .starting_at(snap.run_attempts("stitch_videos") + 1);
        let merged: ResultRef = match self
            .executor
            .execute(&stitch_req, cancel, |_| {
                self.transform.stitch(&clips, &voiceover)
            })
            .await
        {
            Ok(m) => m,
            Err(ActivityError::Cancelled) => {
                return self.finish_or_park(run_id, owner_id).await
            }
            Err(e) => {
                return self
                    .finish_failed(
                        run_id,
                        owner_id,
                        vec![FailureDetail::run_level("stitch_videos", e.to_string())],
                    )
                    .await
            }
        };

        let subtitle_req = ActivityRequest::new(
            run_id,
            None,
            "burn_subtitles",
            MEDIA_TIMEOUT,
            self.policy.clone(),
        )
        .starting_at(snap.run_attempts("burn_subtitles") + 1);
        let script = snap.params.script.clone();
        let language = snap.params.language.clone();
        let final_ref: ResultRef = match self
            .executor
            .execute(&subtitle_req, cancel, |_| {
                self.transform.burn_subtitles(&merged, &script, &language)
            })
            .await
        {
            Ok(f) => f,
            Err(ActivityError::Cancelled) => {
                return self.finish_or_park(run_id, owner_id).await
            }
            Err(e) => {
                return self
                    .finish_failed(
                        run_id,
                        owner_id,
                        vec![FailureDetail::run_level("burn_subtitles", e.to_string())],
                    )
                    .await
            }
        };

        self.log.append(
            run_id,
            &RunEvent::RunCompleted {
                final_ref: final_ref.clone(),
            },
        )?;
        self.release_slot(owner_id, run_id);
        tracing::info!(run_id = %run_id, final_ref = %final_ref, "Run completed");
        self.bus.broadcast(EventPayload::RunCompleted {
            run_id: run_id.clone(),
            final_ref: final_ref.as_str().to_string(),
        });

        self.deliver_webhook(
            run_id,
            RunStatus::Completed,
            "run_completed",
            serde_json::json!({
                "run_id": run_id,
                "final_ref": final_ref,
            }),
        )
        .await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Terminal transitions
    // -----------------------------------------------------------------------

    async fn finish_failed(
        &self,
        run_id: &RunId,
        owner_id: &OwnerId,
        failures: Vec<FailureDetail>,
    ) -> Result<()> {
        let summary = failures
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        tracing::warn!(run_id = %run_id, %summary, "Run failed");

        self.log.append(
            run_id,
            &RunEvent::RunFailed {
                failures: failures.clone(),
            },
        )?;
        self.release_slot(owner_id, run_id);
        self.bus.broadcast(EventPayload::RunFailed {
            run_id: run_id.clone(),
            error: summary,
        });

        self.deliver_webhook(
            run_id,
            RunStatus::Failed,
            "run_failed",
            serde_json::json!({
                "run_id": run_id,
                "failures": failures,
            }),
        )
        .await;
        Ok(())
    }

    /// Distinguish a cancelled run from a shutting-down process. User
    /// cancellation is terminal; shutdown parks the run at its last durable
    /// log entry so the next start resumes it, slot intact.
    async fn finish_or_park(&self, run_id: &RunId, owner_id: &OwnerId) -> Result<()> {
        if self.shutdown.is_cancelled() {
            tracing::info!(run_id = %run_id, "Shutting down; run parked for resume");
            return Ok(());
        }
        self.finish_cancelled(run_id, owner_id).await
    }

    async fn finish_cancelled(&self, run_id: &RunId, owner_id: &OwnerId) -> Result<()> {
        tracing::info!(run_id = %run_id, "Run cancelled");

        self.log.append(run_id, &RunEvent::RunCancelled)?;
        self.release_slot(owner_id, run_id);
        self.bus.broadcast(EventPayload::RunCancelled {
            run_id: run_id.clone(),
        });

        self.deliver_webhook(
            run_id,
            RunStatus::Failed,
            "run_failed",
            serde_json::json!({
                "run_id": run_id,
                "failures": [{"scene_index": null, "activity": "cancel", "reason": "cancelled"}],
            }),
        )
        .await;
        Ok(())
    }

    /// Deliver the terminal webhook. Delivery failures are logged, never
    /// propagated: the run's terminal state is already durable.
    async fn deliver_webhook(
        &self,
        run_id: &RunId,
        status: RunStatus,
        event: &str,
        data: serde_json::Value,
    ) {
        if !self.webhook.is_configured() {
            return;
        }

        let mut data = data;
        if let serde_json::Value::Object(map) = &mut data {
            map.insert("status".to_string(), serde_json::json!(status));
        }

        let req = ActivityRequest::new(
            run_id,
            None,
            "notify_webhook",
            self.webhook_timeout,
            self.policy.clone(),
        );
        // The run's own token is often already cancelled here; webhook
        // delivery only stops with process shutdown.
        let token = self.shutdown.child_token();

        let delivered: std::result::Result<Delivery, _> = self
            .executor
            .execute(&req, &token, |_| self.webhook.notify(event, data.clone()))
            .await;
        match delivered {
            Ok(_) => {
                self.bus.broadcast(EventPayload::WebhookDelivered {
                    run_id: run_id.clone(),
                    status,
                });
            }
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "Webhook delivery failed");
            }
        }
    }

    fn release_slot(&self, owner_id: &OwnerId, run_id: &RunId) {
        match self.admission.release(owner_id, run_id) {
            Ok(true) => {
                tracing::debug!(owner_id = %owner_id, run_id = %run_id, "Slot released")
            }
            Ok(false) => {
                tracing::warn!(owner_id = %owner_id, run_id = %run_id, "Slot was already released")
            }
            Err(e) => {
                tracing::error!(owner_id = %owner_id, run_id = %run_id, error = %e, "Slot release failed")
            }
        }
    }

    fn scene_runner(&self) -> SceneRunner {
        SceneRunner {
            executor: self.executor.clone(),
            inference: self.inference.clone(),
            log: self.log.clone(),
            bus: self.bus.clone(),
            policy: self.policy.clone(),
            poll_interval: self.poll_interval,
            deadline: self.deadline,
            width: self.width,
            height: self.height,
        }
    }
}

fn validate(submission: &RunSubmission) -> Result<()> {
    if submission.run_id.is_empty() {
        return Err(Error::validation("run_id is required"));
    }
    if submission.owner_id.is_empty() {
        return Err(Error::validation("owner_id is required"));
    }
    if submission.scenes.is_empty() {
        return Err(Error::validation("at least one scene is required"));
    }
    for (i, scene) in submission.scenes.iter().enumerate() {
        if scene.image_prompt.trim().is_empty() {
            return Err(Error::validation(format!(
                "scene {i}: image_prompt is required"
            )));
        }
        if scene.video_prompt.trim().is_empty() {
            return Err(Error::validation(format!(
                "scene {i}: video_prompt is required"
            )));
        }
    }
    if submission.params.script.trim().is_empty() {
        return Err(Error::validation("script is required"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(run_id: &str) -> RunSubmission {
        RunSubmission {
            run_id: RunId::new(run_id),
            owner_id: OwnerId::new("u1"),
            scenes: vec![SceneSpec {
                image_prompt: "sunrise".into(),
                video_prompt: "pan".into(),
            }],
            params: RunParams {
                script: "hello".into(),
                ..RunParams::default()
            },
        }
    }

    #[test]
    fn validation_accepts_complete_submission() {
        assert!(validate(&submission("r1")).is_ok());
    }

    #[test]
    fn validation_rejects_empty_fields() {
        let mut s = submission("r1");
        s.run_id = RunId::new("");
        assert!(validate(&s).is_err());

        let mut s = submission("r1");
        s.scenes.clear();
        assert!(validate(&s).is_err());

        let mut s = submission("r1");
        s.scenes[0].video_prompt = "  ".into();
        assert!(validate(&s).is_err());

        let mut s = submission("r1");
        s.params.script = String::new();
        assert!(validate(&s).is_err());
    }
}
