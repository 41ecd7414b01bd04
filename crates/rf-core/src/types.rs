//! Domain types for runs, scenes, and activity attempts.
//!
//! Status enums serialize in snake_case and implement `Display` manually for
//! consistent string representation in logs and database rows. Transition
//! checks live next to the enums so every caller (engine, replay, queries)
//! enforces the same rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
///
/// Runs move strictly forward: `Pending` → `Running` → `Finalizing` →
/// `Completed`, with `Failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Finalizing,
    Completed,
    Failed,
}

impl RunStatus {
    /// Ordering rank for forward-only transition checks.
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Finalizing => 2,
            Self::Completed => 3,
            Self::Failed => 3,
        }
    }

    /// True when this status admits a transition to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Completed => self == Self::Finalizing,
            _ => next.rank() == self.rank() + 1,
        }
    }

    /// True for `Completed` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Finalizing => write!(f, "finalizing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// SceneStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a single scene within a run.
///
/// The image stage must finish before the video stage begins, and the video
/// stage consumes the image result. `Failed` is reachable from any in-flight
/// state; `VideoDone` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Pending,
    ImageInFlight,
    ImageDone,
    VideoInFlight,
    VideoDone,
    Failed,
}

impl SceneStatus {
    /// True when this status admits a transition to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: SceneStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::ImageInFlight)
                | (Self::ImageInFlight, Self::ImageDone)
                | (Self::ImageInFlight, Self::Failed)
                | (Self::ImageDone, Self::VideoInFlight)
                | (Self::VideoInFlight, Self::VideoDone)
                | (Self::VideoInFlight, Self::Failed)
        )
    }

    /// True for `VideoDone` and `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::VideoDone | Self::Failed)
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::ImageInFlight => write!(f, "image_in_flight"),
            Self::ImageDone => write!(f, "image_done"),
            Self::VideoInFlight => write!(f, "video_in_flight"),
            Self::VideoDone => write!(f, "video_done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SceneStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "image_in_flight" => Ok(Self::ImageInFlight),
            "image_done" => Ok(Self::ImageDone),
            "video_in_flight" => Ok(Self::VideoInFlight),
            "video_done" => Ok(Self::VideoDone),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown scene status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptOutcome
// ---------------------------------------------------------------------------

/// Outcome of a single activity attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Success,
    RetryableFailure,
    FatalFailure,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::RetryableFailure => write!(f, "retryable_failure"),
            Self::FatalFailure => write!(f, "fatal_failure"),
        }
    }
}

impl FromStr for AttemptOutcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "retryable_failure" => Ok(Self::RetryableFailure),
            "fatal_failure" => Ok(Self::FatalFailure),
            other => Err(format!("unknown attempt outcome: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ResultRef
// ---------------------------------------------------------------------------

/// Opaque reference to a produced artifact (image, clip, audio track, or the
/// final render). The orchestrator never inspects the contents; it only
/// threads references between activities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultRef(String);

impl ResultRef {
    /// Wrap an artifact reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Borrow the inner reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResultRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResultRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// SceneSpec / RunParams
// ---------------------------------------------------------------------------

/// Per-scene generation inputs supplied at run submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSpec {
    /// Prompt for the still-image stage.
    pub image_prompt: String,
    /// Prompt for the image-to-video stage.
    pub video_prompt: String,
}

/// Run-wide generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    /// Narration script for voiceover and subtitles.
    pub script: String,
    /// Subtitle language code (e.g. "en").
    #[serde(default = "default_language")]
    pub language: String,
    /// Output frame width in pixels.
    #[serde(default = "default_width")]
    pub width: u32,
    /// Output frame height in pixels.
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_language() -> String {
    "en".to_string()
}

fn default_width() -> u32 {
    1080
}

fn default_height() -> u32 {
    1920
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            script: String::new(),
            language: default_language(),
            width: default_width(),
            height: default_height(),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureDetail
// ---------------------------------------------------------------------------

/// Where and why a run (or one of its scenes) failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    /// Scene index, or `None` for run-level activities (voiceover, stitch).
    pub scene_index: Option<u32>,
    /// Name of the activity that failed.
    pub activity: String,
    /// Human-readable failure reason.
    pub reason: String,
}

impl FailureDetail {
    /// Failure attributed to a specific scene.
    #[must_use]
    pub fn scene(scene_index: u32, activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            scene_index: Some(scene_index),
            activity: activity.into(),
            reason: reason.into(),
        }
    }

    /// Failure attributed to a run-level activity.
    #[must_use]
    pub fn run_level(activity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            scene_index: None,
            activity: activity.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scene_index {
            Some(i) => write!(f, "scene {} [{}]: {}", i, self.activity, self.reason),
            None => write!(f, "[{}]: {}", self.activity, self.reason),
        }
    }
}
