//! Durable run log events.
//!
//! These are the records appended to `run_log`; together they are the
//! authoritative history of a run. The serialized form is part of the
//! storage format: variants and field names must stay stable across
//! releases, and new variants must only be added, never repurposed.

use serde::{Deserialize, Serialize};

use rf_core::{
    AttemptOutcome, FailureDetail, OwnerId, ResultRef, RunParams, RunStatus, SceneSpec, SceneStatus,
};

/// A single event in a run's durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// First event of every run: the full submission manifest. Replay can
    /// reconstruct a run from its log alone, with no other lookups.
    RunCreated {
        owner_id: OwnerId,
        slot: u32,
        scenes: Vec<SceneSpec>,
        params: RunParams,
    },
    /// Run moved to a new (non-terminal) status.
    RunStatusChanged { status: RunStatus },
    /// The run-level voiceover artifact is ready.
    VoiceoverReady { voiceover_ref: ResultRef },
    /// A scene moved to a new status, with the stage artifact or failure
    /// reason that accompanied the transition.
    SceneStatusChanged {
        scene_index: u32,
        status: SceneStatus,
        result_ref: Option<ResultRef>,
        reason: Option<String>,
    },
    /// An activity attempt is about to run its side effect.
    AttemptStarted {
        scene_index: Option<u32>,
        activity: String,
        attempt: u32,
        idempotency_key: String,
    },
    /// An activity attempt finished with the given outcome.
    AttemptFinished {
        scene_index: Option<u32>,
        activity: String,
        idempotency_key: String,
        outcome: AttemptOutcome,
        result: Option<serde_json::Value>,
        detail: Option<String>,
    },
    /// Terminal: the run finished with its final artifact.
    RunCompleted { final_ref: ResultRef },
    /// Terminal: the run failed with the collected failure details.
    RunFailed { failures: Vec<FailureDetail> },
    /// Terminal: the run was cancelled by the caller.
    RunCancelled,
}

impl RunEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunCreated { .. } => "run_created",
            Self::RunStatusChanged { .. } => "run_status_changed",
            Self::VoiceoverReady { .. } => "voiceover_ready",
            Self::SceneStatusChanged { .. } => "scene_status_changed",
            Self::AttemptStarted { .. } => "attempt_started",
            Self::AttemptFinished { .. } => "attempt_finished",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunCancelled => "run_cancelled",
        }
    }

    /// True for events that end the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunFailed { .. } | Self::RunCancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_tagged_snake_case() {
        let event = RunEvent::SceneStatusChanged {
            scene_index: 1,
            status: SceneStatus::ImageDone,
            result_ref: Some(ResultRef::new("img.png")),
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "scene_status_changed");
        assert_eq!(json["status"], "image_done");
        assert_eq!(json["result_ref"], "img.png");
    }

    #[test]
    fn roundtrip_all_variants() {
        let events = vec![
            RunEvent::RunCreated {
                owner_id: OwnerId::new("u1"),
                slot: 0,
                scenes: vec![SceneSpec {
                    image_prompt: "a".into(),
                    video_prompt: "b".into(),
                }],
                params: RunParams::default(),
            },
            RunEvent::RunStatusChanged {
                status: RunStatus::Running,
            },
            RunEvent::VoiceoverReady {
                voiceover_ref: ResultRef::new("voice.mp3"),
            },
            RunEvent::SceneStatusChanged {
                scene_index: 0,
                status: SceneStatus::Failed,
                result_ref: None,
                reason: Some("retries exhausted".into()),
            },
            RunEvent::AttemptStarted {
                scene_index: Some(0),
                activity: "generate_image".into(),
                attempt: 2,
                idempotency_key: "r1:0:generate_image:2".into(),
            },
            RunEvent::AttemptFinished {
                scene_index: None,
                activity: "stitch_videos".into(),
                idempotency_key: "r1:-:stitch_videos:1".into(),
                outcome: AttemptOutcome::Success,
                result: Some(serde_json::json!("merged.mp4")),
                detail: None,
            },
            RunEvent::RunCompleted {
                final_ref: ResultRef::new("final.mp4"),
            },
            RunEvent::RunFailed {
                failures: vec![FailureDetail::scene(0, "generate_video", "timeout")],
            },
            RunEvent::RunCancelled,
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: RunEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event, back);
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(RunEvent::RunCancelled.is_terminal());
        assert!(RunEvent::RunFailed { failures: vec![] }.is_terminal());
        assert!(!RunEvent::RunStatusChanged {
            status: RunStatus::Running
        }
        .is_terminal());
    }
}
