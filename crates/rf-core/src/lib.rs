//! Shared foundation for the reelforge workspace.
//!
//! Contains the unified error type, typed identifiers, domain types for
//! runs/scenes/activity attempts, the application event bus, and
//! configuration loading. Every other crate in the workspace depends on
//! this one and nothing here depends on persistence or HTTP.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::{EventId, OwnerId, RunId};
pub use types::{
    AttemptOutcome, FailureDetail, ResultRef, RunParams, RunStatus, SceneSpec, SceneStatus,
};
