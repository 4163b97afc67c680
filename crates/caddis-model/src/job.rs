//! Workflow job records
//!
//! A job is one running workflow instance. It owns its actions; the job's
//! status and its actions' statuses must stay mutually consistent (no action
//! may be `Running` while the job is `Killed`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, not yet started
    #[default]
    Prep,
    /// Executing actions
    Running,
    /// Paused for operator intervention
    Suspended,
    /// Terminal: all actions completed successfully
    Succeeded,
    /// Terminal: killed
    Killed,
    /// Terminal: failed
    Failed,
}

impl JobStatus {
    /// Terminal job states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Killed | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Prep => "PREP",
            JobStatus::Running => "RUNNING",
            JobStatus::Suspended => "SUSPENDED",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Killed => "KILLED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One running workflow instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowJob {
    /// Unique job id
    pub id: String,

    /// Workflow application name
    pub app_name: String,

    /// Current lifecycle state
    pub status: JobStatus,

    /// Node names on the live execution path(s) of the DAG
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub execution_paths: Vec<String>,

    /// Per-job override of the transient-retry maximum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Per-job override of the transient-retry interval, in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_interval_secs: Option<u64>,

    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Last mutation time
    pub last_modified_at: chrono::DateTime<chrono::Utc>,
}

impl WorkflowJob {
    /// Create a new job in `Prep` with a fresh id
    pub fn new(app_name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_name: app_name.into(),
            status: JobStatus::Prep,
            execution_paths: Vec::new(),
            max_retries: None,
            retry_interval_secs: None,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// Create a running job (convenience for tests and the DAG engine)
    pub fn running(app_name: impl Into<String>) -> Self {
        let mut job = Self::new(app_name);
        job.status = JobStatus::Running;
        job
    }

    /// Mark a node name as a live execution head
    pub fn with_execution_path(mut self, node: impl Into<String>) -> Self {
        self.execution_paths.push(node.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    pub fn is_suspended(&self) -> bool {
        self.status == JobStatus::Suspended
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True when the node is on a live execution path of the DAG
    pub fn is_execution_head(&self, node: &str) -> bool {
        self.execution_paths.iter().any(|n| n == node)
    }

    /// Record a mutation for last-modified tracking
    pub fn touch(&mut self) {
        self.last_modified_at = chrono::Utc::now();
    }
}
