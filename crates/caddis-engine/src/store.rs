//! Job state storage trait
//!
//! The store gateway is the single source of truth: all cross-command state
//! passes through it. Implementations must make `bulk_update` atomic so a
//! mid-command crash never leaves a half-updated job.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use caddis_model::{ActionId, WorkflowAction, WorkflowJob};
use std::collections::HashMap;
use std::sync::Arc;

/// All mutations of one command, applied as a single transaction
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    /// Updated job record, if the command touched it
    pub job: Option<WorkflowJob>,

    /// Updated action records
    pub actions: Vec<WorkflowAction>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, job: WorkflowJob) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_action(mut self, action: WorkflowAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// Trait for job/action state persistence
///
/// The per-job lock returned by `job_lock` serializes commands touching the
/// same job: every command handler acquires it before loading state.
#[async_trait]
pub trait JobStateStore: Send + Sync {
    /// Get a job by id
    async fn get_job(&self, job_id: &str) -> Result<Option<WorkflowJob>>;

    /// Get an action by composite id
    async fn get_action(&self, id: &ActionId) -> Result<Option<WorkflowAction>>;

    /// Insert a new job record
    async fn insert_job(&self, job: &WorkflowJob) -> Result<()>;

    /// Insert a new action record
    async fn insert_action(&self, action: &WorkflowAction) -> Result<()>;

    /// Apply one command's mutations atomically
    async fn bulk_update(&self, update: JobUpdate) -> Result<()>;

    /// All actions owned by a job
    async fn actions_for_job(&self, job_id: &str) -> Result<Vec<WorkflowAction>>;

    /// Pending actions whose last progress is older than the cutoff,
    /// oldest first, at most `limit`
    async fn pending_actions(
        &self,
        stale_before: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowAction>>;

    /// Per-job mutual-exclusion lock
    fn job_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>>;
}

/// In-memory state store (tests and single-process deployments)
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    jobs: std::sync::RwLock<HashMap<String, WorkflowJob>>,
    actions: std::sync::RwLock<HashMap<String, WorkflowAction>>,
    locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStateStore for MemoryStateStore {
    async fn get_job(&self, job_id: &str) -> Result<Option<WorkflowJob>> {
        Ok(self.jobs.read().unwrap().get(job_id).cloned())
    }

    async fn get_action(&self, id: &ActionId) -> Result<Option<WorkflowAction>> {
        Ok(self.actions.read().unwrap().get(&id.to_string()).cloned())
    }

    async fn insert_job(&self, job: &WorkflowJob) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn insert_action(&self, action: &WorkflowAction) -> Result<()> {
        self.actions
            .write()
            .unwrap()
            .insert(action.id.to_string(), action.clone());
        Ok(())
    }

    async fn bulk_update(&self, update: JobUpdate) -> Result<()> {
        // Take both write locks before applying anything so the update is
        // atomic with respect to readers
        let mut jobs = self.jobs.write().unwrap();
        let mut actions = self.actions.write().unwrap();

        if let Some(job) = update.job {
            if !jobs.contains_key(&job.id) {
                return Err(EngineError::Store(format!("unknown job: {}", job.id)));
            }
            jobs.insert(job.id.clone(), job);
        }
        for action in update.actions {
            let key = action.id.to_string();
            if !actions.contains_key(&key) {
                return Err(EngineError::Store(format!("unknown action: {key}")));
            }
            actions.insert(key, action);
        }
        Ok(())
    }

    async fn actions_for_job(&self, job_id: &str) -> Result<Vec<WorkflowAction>> {
        Ok(self
            .actions
            .read()
            .unwrap()
            .values()
            .filter(|a| a.id.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn pending_actions(
        &self,
        stale_before: chrono::DateTime<chrono::Utc>,
        limit: usize,
    ) -> Result<Vec<WorkflowAction>> {
        let mut stale: Vec<WorkflowAction> = self
            .actions
            .read()
            .unwrap()
            .values()
            .filter(|a| a.pending && a.last_check_at.unwrap_or(a.created_at) <= stale_before)
            .cloned()
            .collect();
        stale.sort_by_key(|a| a.last_check_at.unwrap_or(a.created_at));
        stale.truncate(limit);
        Ok(stale)
    }

    fn job_lock(&self, job_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .clone()
    }
}
