//! In-memory host client used by unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::HostError;

use super::{
    HostClient, PullRequestClose, PullRequestRecord, PullRequestSpec, PullRequestUpdate,
};

/// Recording fake: stores every mutation and serves canned read data.
#[derive(Default)]
pub struct RecordingHost {
    state: Mutex<RecordingState>,
}

#[derive(Default)]
struct RecordingState {
    next_pr_id: i64,
    branches: Vec<String>,
    active: Vec<PullRequestRecord>,
    created: Vec<PullRequestSpec>,
    updated: Vec<PullRequestUpdate>,
    abandoned: Vec<PullRequestClose>,
    approved: Vec<i64>,
}

impl RecordingHost {
    pub fn new() -> Self {
        let host = Self::default();
        host.state.lock().unwrap().next_pr_id = 100;
        host
    }

    pub fn with_branches(self, branches: &[&str]) -> Self {
        self.state.lock().unwrap().branches =
            branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn with_active_pr(self, record: PullRequestRecord) -> Self {
        self.state.lock().unwrap().active.push(record);
        self
    }

    pub fn created(&self) -> Vec<PullRequestSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<PullRequestUpdate> {
        self.state.lock().unwrap().updated.clone()
    }

    pub fn abandoned(&self) -> Vec<PullRequestClose> {
        self.state.lock().unwrap().abandoned.clone()
    }

    pub fn approved(&self) -> Vec<i64> {
        self.state.lock().unwrap().approved.clone()
    }
}

#[async_trait]
impl HostClient for RecordingHost {
    async fn create_pull_request(
        &self,
        spec: PullRequestSpec,
    ) -> Result<Option<i64>, HostError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_pr_id;
        state.next_pr_id += 1;
        state.branches.push(spec.source_branch.clone());
        state.created.push(spec);
        Ok(Some(id))
    }

    async fn update_pull_request(&self, update: PullRequestUpdate) -> Result<bool, HostError> {
        self.state.lock().unwrap().updated.push(update);
        Ok(true)
    }

    async fn abandon_pull_request(&self, close: PullRequestClose) -> Result<bool, HostError> {
        self.state.lock().unwrap().abandoned.push(close);
        Ok(true)
    }

    async fn get_default_branch(&self) -> Result<String, HostError> {
        Ok("main".to_string())
    }

    async fn get_branch_names(&self) -> Result<Vec<String>, HostError> {
        Ok(self.state.lock().unwrap().branches.clone())
    }

    async fn get_active_pull_request_properties(
        &self,
        _creator: &str,
    ) -> Result<Vec<PullRequestRecord>, HostError> {
        Ok(self.state.lock().unwrap().active.clone())
    }

    async fn approve_pull_request(&self, pr_id: i64) -> Result<bool, HostError> {
        self.state.lock().unwrap().approved.push(pr_id);
        Ok(true)
    }
}
