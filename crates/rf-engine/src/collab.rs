//! Collaborator traits: the seams between the orchestration core and the
//! outside world.
//!
//! The engine never talks to an inference backend, speech synthesizer, or
//! media toolchain directly; it goes through these traits. Production
//! implementations live in [`crate::clients`], tests substitute scripted
//! fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use rf_core::ResultRef;

use crate::activity::ActivityError;

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Opaque identifier assigned by the inference backend to a submitted
/// generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteJobId(String);

impl RemoteJobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One generation request: a still image from a prompt, or a video clip
/// from a prompt plus a source image.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub source_image: Option<ResultRef>,
    pub width: u32,
    pub height: u32,
}

/// Status of a submitted generation.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Still being generated.
    Pending,
    /// Finished; the artifact is available.
    Done(ResultRef),
    /// The backend failed this generation. The attempt may still be
    /// retried by resubmitting.
    Failed(String),
}

/// Submit-and-poll interface to the image/video generation backend.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Submit a generation, returning the backend's job identifier.
    async fn submit(&self, request: &InferenceRequest) -> Result<RemoteJobId, ActivityError>;

    /// Check the status of a submitted generation.
    async fn poll(&self, job: &RemoteJobId) -> Result<PollOutcome, ActivityError>;
}

// ---------------------------------------------------------------------------
// Speech
// ---------------------------------------------------------------------------

/// Interface to the voiceover synthesis backend.
#[async_trait]
pub trait SpeechClient: Send + Sync {
    /// Synthesize a narration track for the given script.
    async fn synthesize(&self, script: &str) -> Result<ResultRef, ActivityError>;
}

// ---------------------------------------------------------------------------
// Media assembly
// ---------------------------------------------------------------------------

/// Interface to the local media toolchain used during finalization.
#[async_trait]
pub trait MediaTransform: Send + Sync {
    /// Concatenate scene clips in order and lay the voiceover under them.
    async fn stitch(
        &self,
        clips: &[ResultRef],
        voiceover: &ResultRef,
    ) -> Result<ResultRef, ActivityError>;

    /// Burn subtitles derived from the script into the merged video.
    async fn burn_subtitles(
        &self,
        merged: &ResultRef,
        script: &str,
        language: &str,
    ) -> Result<ResultRef, ActivityError>;
}
