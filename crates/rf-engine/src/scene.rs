//! Per-scene state machine driver.
//!
//! A scene moves Pending -> ImageInFlight -> ImageDone -> VideoInFlight ->
//! VideoDone, with Failed reachable from the in-flight states. The runner
//! resumes from whatever state replay recovered: stages with a recorded
//! artifact are skipped, in-flight stages continue with their remaining
//! attempt budget.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rf_core::events::{EventBus, EventPayload};
use rf_core::{FailureDetail, Result, ResultRef, RunId, SceneStatus};

use crate::activity::{ActivityError, ActivityExecutor, ActivityRequest, RetryPolicy};
use crate::collab::{InferenceClient, InferenceRequest, PollOutcome};
use crate::event::RunEvent;
use crate::log::RunLog;
use crate::replay::SceneSnapshot;

/// Headroom added to the executor's per-attempt timeout so the poll loop's
/// own deadline fires first and reports a precise reason.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Final word on one scene after the runner finishes with it.
#[derive(Debug, Clone)]
pub struct SceneOutcome {
    pub scene_index: u32,
    pub status: SceneStatus,
    pub video_ref: Option<ResultRef>,
    pub failure: Option<FailureDetail>,
    pub cancelled: bool,
}

pub struct SceneRunner {
    pub executor: Arc<ActivityExecutor>,
    pub inference: Arc<dyn InferenceClient>,
    pub log: Arc<RunLog>,
    pub bus: Arc<EventBus>,
    pub policy: RetryPolicy,
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub width: u32,
    pub height: u32,
}

impl SceneRunner {
    /// Drive one scene from its recovered state to a terminal state.
    pub async fn run(
        &self,
        run_id: &RunId,
        scene_index: u32,
        snap: &SceneSnapshot,
        cancel: &CancellationToken,
    ) -> Result<SceneOutcome> {
        let mut status = snap.status;
        let mut image_ref = snap.image_ref.clone();

        if status.is_terminal() {
            return Ok(SceneOutcome {
                scene_index,
                status,
                video_ref: snap.video_ref.clone(),
                failure: snap.failure.as_ref().map(|reason| {
                    FailureDetail::scene(scene_index, "scene", reason.clone())
                }),
                cancelled: false,
            });
        }

        // Image stage.
        if image_ref.is_none() {
            if status == SceneStatus::Pending {
                self.transition(run_id, scene_index, SceneStatus::ImageInFlight, None, None)?;
                status = SceneStatus::ImageInFlight;
            }

            let request = InferenceRequest {
                prompt: snap.image_prompt.clone(),
                source_image: None,
                width: self.width,
                height: self.height,
            };
            match self
                .run_stage(run_id, scene_index, "generate_image", snap, &request, cancel)
                .await
            {
                Ok(artifact) => {
                    self.transition(
                        run_id,
                        scene_index,
                        SceneStatus::ImageDone,
                        Some(&artifact),
                        None,
                    )?;
                    status = SceneStatus::ImageDone;
                    image_ref = Some(artifact);
                }
                Err(ActivityError::Cancelled) => {
                    return Ok(self.cancelled_outcome(scene_index, status));
                }
                Err(err) => {
                    return self.fail(run_id, scene_index, "generate_image", &err);
                }
            }
        }

        // Video stage, consuming the image artifact.
        if status == SceneStatus::ImageDone {
            self.transition(run_id, scene_index, SceneStatus::VideoInFlight, None, None)?;
            status = SceneStatus::VideoInFlight;
        }

        let request = InferenceRequest {
            prompt: snap.video_prompt.clone(),
            source_image: image_ref,
            width: self.width,
            height: self.height,
        };
        match self
            .run_stage(run_id, scene_index, "generate_video", snap, &request, cancel)
            .await
        {
            Ok(artifact) => {
                self.transition(
                    run_id,
                    scene_index,
                    SceneStatus::VideoDone,
                    Some(&artifact),
                    None,
                )?;
                Ok(SceneOutcome {
                    scene_index,
                    status: SceneStatus::VideoDone,
                    video_ref: Some(artifact),
                    failure: None,
                    cancelled: false,
                })
            }
            Err(ActivityError::Cancelled) => Ok(self.cancelled_outcome(scene_index, status)),
            Err(err) => self.fail(run_id, scene_index, "generate_video", &err),
        }
    }

    /// Run one generation stage through the activity executor.
    async fn run_stage(
        &self,
        run_id: &RunId,
        scene_index: u32,
        activity: &str,
        snap: &SceneSnapshot,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ResultRef, ActivityError> {
        let req = ActivityRequest::new(
            run_id,
            Some(scene_index),
            activity,
            self.deadline + TIMEOUT_MARGIN,
            self.policy.clone(),
        )
        .starting_at(snap.attempts_for(activity) + 1);

        self.executor
            .execute(&req, cancel, |_| self.generate(request, cancel))
            .await
    }

    /// Submit a generation and poll it to completion.
    async fn generate(
        &self,
        request: &InferenceRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<ResultRef, ActivityError> {
        let job = self.inference.submit(request).await?;
        let deadline = tokio::time::Instant::now() + self.deadline;

        loop {
            match self.inference.poll(&job).await? {
                PollOutcome::Done(artifact) => return Ok(artifact),
                PollOutcome::Failed(reason) => {
                    // The backend gave up on this submission; a fresh
                    // submission may still succeed.
                    return Err(ActivityError::retryable(format!(
                        "generation {job} failed: {reason}"
                    )));
                }
                PollOutcome::Pending => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ActivityError::retryable(format!(
                    "generation {job} exceeded {}s deadline",
                    self.deadline.as_secs()
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Err(ActivityError::Cancelled),
            }
        }
    }

    fn transition(
        &self,
        run_id: &RunId,
        scene_index: u32,
        status: SceneStatus,
        result_ref: Option<&ResultRef>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.log.append(
            run_id,
            &RunEvent::SceneStatusChanged {
                scene_index,
                status,
                result_ref: result_ref.cloned(),
                reason: reason.map(String::from),
            },
        )?;
        self.bus.broadcast(EventPayload::SceneStatusChanged {
            run_id: run_id.clone(),
            scene_index,
            status,
        });
        Ok(())
    }

    fn fail(
        &self,
        run_id: &RunId,
        scene_index: u32,
        activity: &str,
        err: &ActivityError,
    ) -> Result<SceneOutcome> {
        let reason = err.to_string();
        tracing::warn!(run_id = %run_id, scene_index, activity, %reason, "Scene failed");
        self.transition(run_id, scene_index, SceneStatus::Failed, None, Some(&reason))?;
        Ok(SceneOutcome {
            scene_index,
            status: SceneStatus::Failed,
            video_ref: None,
            failure: Some(FailureDetail::scene(scene_index, activity, reason)),
            cancelled: false,
        })
    }

    fn cancelled_outcome(&self, scene_index: u32, status: SceneStatus) -> SceneOutcome {
        SceneOutcome {
            scene_index,
            status,
            video_ref: None,
            failure: None,
            cancelled: true,
        }
    }
}
