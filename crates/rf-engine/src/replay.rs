//! Log replay: fold a run's event history into a snapshot.
//!
//! Replay is deterministic and validating: the same log always produces
//! the same snapshot, and an illegal transition in the log (which can only
//! mean corruption or a version mismatch) is an error rather than a guess.

use std::collections::HashMap;

use rf_core::{
    Error, FailureDetail, OwnerId, Result, ResultRef, RunId, RunParams, RunStatus, SceneStatus,
};

use crate::event::RunEvent;

/// Replayed state of one scene.
#[derive(Debug, Clone)]
pub struct SceneSnapshot {
    pub image_prompt: String,
    pub video_prompt: String,
    pub status: SceneStatus,
    pub image_ref: Option<ResultRef>,
    pub video_ref: Option<ResultRef>,
    pub failure: Option<String>,
    pub image_attempts: u32,
    pub video_attempts: u32,
}

impl SceneSnapshot {
    /// Attempts already consumed by the given stage activity.
    pub fn attempts_for(&self, activity: &str) -> u32 {
        match activity {
            "generate_image" => self.image_attempts,
            "generate_video" => self.video_attempts,
            _ => 0,
        }
    }
}

/// Replayed state of a run, reconstructed purely from its log.
#[derive(Debug, Clone)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub owner_id: OwnerId,
    pub slot: u32,
    pub params: RunParams,
    pub status: RunStatus,
    pub voiceover_ref: Option<ResultRef>,
    pub final_ref: Option<ResultRef>,
    pub failures: Vec<FailureDetail>,
    pub scenes: Vec<SceneSnapshot>,
    pub cancelled: bool,
    run_level_attempts: HashMap<String, u32>,
}

impl RunSnapshot {
    /// Fold a run's event history into a snapshot.
    ///
    /// The first event must be `RunCreated` and every status transition in
    /// the log must be legal; anything else is rejected.
    pub fn from_events(run_id: &RunId, events: &[RunEvent]) -> Result<Self> {
        let mut iter = events.iter();

        let mut snapshot = match iter.next() {
            Some(RunEvent::RunCreated {
                owner_id,
                slot,
                scenes,
                params,
            }) => Self {
                run_id: run_id.clone(),
                owner_id: owner_id.clone(),
                slot: *slot,
                params: params.clone(),
                status: RunStatus::Pending,
                voiceover_ref: None,
                final_ref: None,
                failures: Vec::new(),
                scenes: scenes
                    .iter()
                    .map(|s| SceneSnapshot {
                        image_prompt: s.image_prompt.clone(),
                        video_prompt: s.video_prompt.clone(),
                        status: SceneStatus::Pending,
                        image_ref: None,
                        video_ref: None,
                        failure: None,
                        image_attempts: 0,
                        video_attempts: 0,
                    })
                    .collect(),
                cancelled: false,
                run_level_attempts: HashMap::new(),
            },
            Some(other) => {
                return Err(Error::Internal(format!(
                    "run {run_id}: log starts with {} instead of run_created",
                    other.name()
                )))
            }
            None => {
                return Err(Error::Internal(format!("run {run_id}: log is empty")))
            }
        };

        for event in iter {
            snapshot.apply(event)?;
        }
        Ok(snapshot)
    }

    fn apply(&mut self, event: &RunEvent) -> Result<()> {
        match event {
            RunEvent::RunCreated { .. } => {
                return Err(self.illegal("duplicate run_created"));
            }
            RunEvent::RunStatusChanged { status } => {
                if !self.status.can_transition_to(*status) {
                    return Err(self.illegal(&format!(
                        "run transition {} -> {status}",
                        self.status
                    )));
                }
                self.status = *status;
            }
            RunEvent::VoiceoverReady { voiceover_ref } => {
                self.voiceover_ref = Some(voiceover_ref.clone());
            }
            RunEvent::SceneStatusChanged {
                scene_index,
                status,
                result_ref,
                reason,
            } => {
                let run_id = self.run_id.clone();
                let scene = self.scene_mut(*scene_index)?;
                if !scene.status.can_transition_to(*status) {
                    return Err(Error::Internal(format!(
                        "run {run_id}: scene {scene_index} transition {} -> {status}",
                        scene.status
                    )));
                }
                scene.status = *status;
                match status {
                    SceneStatus::ImageDone => scene.image_ref = result_ref.clone(),
                    SceneStatus::VideoDone => scene.video_ref = result_ref.clone(),
                    SceneStatus::Failed => scene.failure = reason.clone(),
                    _ => {}
                }
            }
            RunEvent::AttemptStarted {
                scene_index,
                activity,
                ..
            } => match scene_index {
                Some(idx) => {
                    let idx = *idx;
                    let activity = activity.clone();
                    let scene = self.scene_mut(idx)?;
                    match activity.as_str() {
                        "generate_image" => scene.image_attempts += 1,
                        "generate_video" => scene.video_attempts += 1,
                        _ => {}
                    }
                }
                None => {
                    *self
                        .run_level_attempts
                        .entry(activity.clone())
                        .or_insert(0) += 1;
                }
            },
            RunEvent::AttemptFinished { .. } => {
                // Outcomes live in the activity result cache; nothing to
                // fold here.
            }
            RunEvent::RunCompleted { final_ref } => {
                if !self.status.can_transition_to(RunStatus::Completed) {
                    return Err(self.illegal(&format!(
                        "run completed from {}",
                        self.status
                    )));
                }
                self.status = RunStatus::Completed;
                self.final_ref = Some(final_ref.clone());
            }
            RunEvent::RunFailed { failures } => {
                if self.status.is_terminal() {
                    return Err(self.illegal("run failed after terminal state"));
                }
                self.status = RunStatus::Failed;
                self.failures = failures.clone();
            }
            RunEvent::RunCancelled => {
                if self.status.is_terminal() {
                    return Err(self.illegal("run cancelled after terminal state"));
                }
                self.status = RunStatus::Failed;
                self.cancelled = true;
                self.failures = vec![FailureDetail::run_level("cancel", "cancelled")];
            }
        }
        Ok(())
    }

    /// Attempts already consumed by a run-level activity.
    pub fn run_attempts(&self, activity: &str) -> u32 {
        self.run_level_attempts.get(activity).copied().unwrap_or(0)
    }

    fn scene_mut(&mut self, index: u32) -> Result<&mut SceneSnapshot> {
        let run_id = self.run_id.clone();
        let len = self.scenes.len();
        self.scenes.get_mut(index as usize).ok_or_else(|| {
            Error::Internal(format!(
                "run {run_id}: event references scene {index} but run has {len} scenes"
            ))
        })
    }

    fn illegal(&self, what: &str) -> Error {
        Error::Internal(format!("run {}: illegal replay: {what}", self.run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rf_core::{AttemptOutcome, SceneSpec};

    fn created(n_scenes: usize) -> RunEvent {
        RunEvent::RunCreated {
            owner_id: OwnerId::new("u1"),
            slot: 0,
            scenes: (0..n_scenes)
                .map(|i| SceneSpec {
                    image_prompt: format!("image {i}"),
                    video_prompt: format!("video {i}"),
                })
                .collect(),
            params: RunParams::default(),
        }
    }

    fn scene_event(idx: u32, status: SceneStatus, result: Option<&str>) -> RunEvent {
        RunEvent::SceneStatusChanged {
            scene_index: idx,
            status,
            result_ref: result.map(ResultRef::new),
            reason: None,
        }
    }

    #[test]
    fn fresh_run_snapshot() {
        let run = RunId::new("r1");
        let snap = RunSnapshot::from_events(&run, &[created(2)]).unwrap();
        assert_eq!(snap.status, RunStatus::Pending);
        assert_eq!(snap.scenes.len(), 2);
        assert!(snap.scenes.iter().all(|s| s.status == SceneStatus::Pending));
    }

    #[test]
    fn mid_run_snapshot_recovers_progress() {
        let run = RunId::new("r1");
        let events = vec![
            created(2),
            RunEvent::RunStatusChanged {
                status: RunStatus::Running,
            },
            RunEvent::VoiceoverReady {
                voiceover_ref: ResultRef::new("voice.mp3"),
            },
            scene_event(0, SceneStatus::ImageInFlight, None),
            RunEvent::AttemptStarted {
                scene_index: Some(0),
                activity: "generate_image".into(),
                attempt: 1,
                idempotency_key: "r1:0:generate_image:1".into(),
            },
            scene_event(0, SceneStatus::ImageDone, Some("img0.png")),
            scene_event(0, SceneStatus::VideoInFlight, None),
            scene_event(1, SceneStatus::ImageInFlight, None),
        ];
        let snap = RunSnapshot::from_events(&run, &events).unwrap();

        assert_eq!(snap.status, RunStatus::Running);
        assert_eq!(snap.voiceover_ref.as_ref().unwrap().as_str(), "voice.mp3");
        assert_eq!(snap.scenes[0].status, SceneStatus::VideoInFlight);
        assert_eq!(snap.scenes[0].image_ref.as_ref().unwrap().as_str(), "img0.png");
        assert_eq!(snap.scenes[0].image_attempts, 1);
        assert_eq!(snap.scenes[1].status, SceneStatus::ImageInFlight);
    }

    #[test]
    fn replay_is_deterministic() {
        let run = RunId::new("r1");
        let events = vec![
            created(1),
            RunEvent::RunStatusChanged {
                status: RunStatus::Running,
            },
            scene_event(0, SceneStatus::ImageInFlight, None),
        ];
        let a = RunSnapshot::from_events(&run, &events).unwrap();
        let b = RunSnapshot::from_events(&run, &events).unwrap();
        assert_eq!(a.status, b.status);
        assert_eq!(a.scenes[0].status, b.scenes[0].status);
    }

    #[test]
    fn completed_run_snapshot() {
        let run = RunId::new("r1");
        let events = vec![
            created(1),
            RunEvent::RunStatusChanged {
                status: RunStatus::Running,
            },
            scene_event(0, SceneStatus::ImageInFlight, None),
            scene_event(0, SceneStatus::ImageDone, Some("img.png")),
            scene_event(0, SceneStatus::VideoInFlight, None),
            scene_event(0, SceneStatus::VideoDone, Some("clip.mp4")),
            RunEvent::RunStatusChanged {
                status: RunStatus::Finalizing,
            },
            RunEvent::RunCompleted {
                final_ref: ResultRef::new("final.mp4"),
            },
        ];
        let snap = RunSnapshot::from_events(&run, &events).unwrap();
        assert_eq!(snap.status, RunStatus::Completed);
        assert_eq!(snap.final_ref.unwrap().as_str(), "final.mp4");
    }

    #[test]
    fn cancellation_folds_to_failed() {
        let run = RunId::new("r1");
        let events = vec![
            created(1),
            RunEvent::RunStatusChanged {
                status: RunStatus::Running,
            },
            RunEvent::RunCancelled,
        ];
        let snap = RunSnapshot::from_events(&run, &events).unwrap();
        assert_eq!(snap.status, RunStatus::Failed);
        assert!(snap.cancelled);
        assert_eq!(snap.failures[0].reason, "cancelled");
    }

    #[test]
    fn run_level_attempts_are_counted() {
        let run = RunId::new("r1");
        let events = vec![
            created(1),
            RunEvent::AttemptStarted {
                scene_index: None,
                activity: "generate_voiceover".into(),
                attempt: 1,
                idempotency_key: "r1:-:generate_voiceover:1".into(),
            },
            RunEvent::AttemptFinished {
                scene_index: None,
                activity: "generate_voiceover".into(),
                idempotency_key: "r1:-:generate_voiceover:1".into(),
                outcome: AttemptOutcome::RetryableFailure,
                result: None,
                detail: Some("connection reset".into()),
            },
            RunEvent::AttemptStarted {
                scene_index: None,
                activity: "generate_voiceover".into(),
                attempt: 2,
                idempotency_key: "r1:-:generate_voiceover:2".into(),
            },
        ];
        let snap = RunSnapshot::from_events(&run, &events).unwrap();
        assert_eq!(snap.run_attempts("generate_voiceover"), 2);
        assert_eq!(snap.run_attempts("stitch_videos"), 0);
    }

    #[test]
    fn rejects_empty_log() {
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &[]).is_err());
    }

    #[test]
    fn rejects_log_not_starting_with_creation() {
        let events = vec![RunEvent::RunStatusChanged {
            status: RunStatus::Running,
        }];
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &events).is_err());
    }

    #[test]
    fn rejects_illegal_run_transition() {
        let events = vec![
            created(1),
            RunEvent::RunStatusChanged {
                status: RunStatus::Finalizing,
            },
        ];
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &events).is_err());
    }

    #[test]
    fn rejects_illegal_scene_transition() {
        let events = vec![created(1), scene_event(0, SceneStatus::VideoDone, None)];
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &events).is_err());
    }

    #[test]
    fn rejects_unknown_scene_index() {
        let events = vec![created(1), scene_event(5, SceneStatus::ImageInFlight, None)];
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &events).is_err());
    }

    #[test]
    fn rejects_events_after_terminal() {
        let events = vec![
            created(1),
            RunEvent::RunFailed { failures: vec![] },
            RunEvent::RunCancelled,
        ];
        assert!(RunSnapshot::from_events(&RunId::new("r1"), &events).is_err());
    }
}
