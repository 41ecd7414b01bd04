//! rf-engine: durable orchestration core.
//!
//! Runs are driven by an append-only event log: every state transition is
//! appended to the log (and mirrored into the query index in the same
//! transaction) before the corresponding side effect is acted on. After a
//! crash, replaying the log reconstructs exactly where each run stood and
//! the orchestrator resumes from there, skipping side effects whose results
//! were already recorded.

pub mod activity;
pub mod admission;
pub mod clients;
pub mod collab;
pub mod event;
pub mod log;
pub mod replay;
pub mod run;
pub mod scene;
pub mod webhook;

pub use activity::{ActivityError, ActivityExecutor, ActivityRequest, RetryPolicy};
pub use admission::{AdmissionController, ConfigTierLookup, TierLookup};
pub use collab::{InferenceClient, InferenceRequest, MediaTransform, PollOutcome, RemoteJobId, SpeechClient};
pub use event::RunEvent;
pub use log::RunLog;
pub use replay::{RunSnapshot, SceneSnapshot};
pub use run::{Orchestrator, RunSubmission};
pub use webhook::WebhookNotifier;
