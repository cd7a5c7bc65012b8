//! Typed error hierarchy for the deputy orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `UpdaterError` — container driver and job execution failures
//! - `RegistryError` — job registry bookkeeping failures
//! - `HostError` — host PR API failures (converted to boolean outcomes
//!   inside the output processor, never allowed to crash the scheduler)

use thiserror::Error;

/// Errors from running a single update job. Imaging failures (pulling or
/// starting the container) are a distinct class from updater failures
/// (non-zero exit inside the container) so the caller can report them
/// separately. Both are terminal for that job only.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("Failed to pull or start updater container: {0}")]
    Imaging(String),

    #[error("Updater exited with non-zero code {exit_code} during {phase}")]
    Updater { phase: String, exit_code: i64 },

    #[error("Updater reported a job error: {error_type}")]
    JobReported { error_type: String },

    #[error("Invalid update configuration: {0}")]
    Build(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the in-memory job registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job id {id} is already registered")]
    JobIdCollision { id: String },

    #[error("Job {id} is not registered")]
    UnknownJob { id: String },
}

/// Errors from the host's pull-request API.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Pull request {id} not found")]
    PullRequestNotFound { id: i64 },

    #[error("Host API request failed: {0}")]
    Api(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
