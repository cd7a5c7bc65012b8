//! Container execution driver for update jobs.
//!
//! | Module      | Responsibility                                       |
//! |-------------|------------------------------------------------------|
//! | `proxy`     | Handle describing the external credential proxy      |
//! | `container` | Docker-backed runner: stage, pull, exec, tear down   |
//!
//! The scheduler drives jobs through the [`JobExecutor`] trait so tests can
//! substitute an in-process executor for the Docker-backed one.

pub mod container;
pub mod proxy;

use async_trait::async_trait;

use crate::errors::UpdaterError;
use crate::job::spec::JobSpec;
use crate::job::registry::JobTokens;

pub use container::UpdaterRunner;
pub use proxy::ProxyHandle;

/// One registered job handed to an executor: the descriptor the updater
/// will fetch, its minted tokens, and the control-plane base URL.
#[derive(Debug, Clone)]
pub struct JobAssignment {
    pub spec: JobSpec,
    pub tokens: JobTokens,
    pub api_url: String,
}

/// Runs one update job to completion. The Docker-backed implementation
/// lives in [`container`]; tests drive the scheduler with an in-process
/// stand-in.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, assignment: &JobAssignment) -> Result<(), UpdaterError>;
}
