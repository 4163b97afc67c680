//! Workflow action records
//!
//! An action is one DAG node's runtime instance within a running job. It is
//! created `Prep` when the DAG engine activates the node and is then driven
//! through the lifecycle state machine by the engine's commands.

use crate::{ModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Composite identity of an action: owning job id plus node name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionId {
    /// Owning job id
    pub job_id: String,

    /// Node name within the job's DAG
    pub name: String,
}

impl ActionId {
    /// Create a new action id
    pub fn new(job_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_id, self.name)
    }
}

impl FromStr for ActionId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('@') {
            Some((job, name)) if !job.is_empty() && !name.is_empty() => {
                Ok(Self::new(job, name))
            }
            _ => Err(ModelError::InvalidActionId(s.to_string())),
        }
    }
}

/// Action lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Created, waiting for a start command
    #[default]
    Prep,
    /// Started against the external system, completion pending
    Running,
    /// Start failed transiently, a delayed retry is scheduled
    StartRetry,
    /// Start requires operator intervention (update + resume)
    StartManual,
    /// Execution finished, an end command will finalize
    Done,
    /// End failed transiently, a delayed retry is scheduled
    EndRetry,
    /// End requires operator intervention
    EndManual,
    /// Finished with a user-level retry pending
    UserRetry,
    /// Terminal: completed successfully
    Ok,
    /// Terminal: completed with an error signal
    Error,
    /// Terminal: killed
    Killed,
    /// Terminal: failed fatally
    Failed,
}

impl ActionStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Ok | ActionStatus::Error | ActionStatus::Killed | ActionStatus::Failed
        )
    }

    /// States holding a scheduled delayed retry
    pub fn is_retry(&self) -> bool {
        matches!(self, ActionStatus::StartRetry | ActionStatus::EndRetry)
    }

    /// States parked for operator intervention
    pub fn is_manual(&self) -> bool {
        matches!(self, ActionStatus::StartManual | ActionStatus::EndManual)
    }

    /// States a start command accepts
    pub fn start_allowed(&self) -> bool {
        matches!(
            self,
            ActionStatus::Prep
                | ActionStatus::StartRetry
                | ActionStatus::StartManual
                | ActionStatus::UserRetry
        )
    }

    /// States an end command accepts
    pub fn end_allowed(&self) -> bool {
        matches!(
            self,
            ActionStatus::Done | ActionStatus::EndRetry | ActionStatus::EndManual
        )
    }

    /// Check whether the state machine allows an edge
    pub fn can_transition_to(&self, to: ActionStatus) -> bool {
        use ActionStatus::*;

        if self.is_terminal() {
            return false;
        }
        // Kill/fail cascades and suspend apply to any live state
        if matches!(to, Killed | Failed | StartManual) {
            return true;
        }
        match (self, to) {
            (Prep | StartRetry | StartManual | UserRetry, Running | Done | StartRetry) => true,
            (Running, Running | Done) => true,
            (Done | EndRetry | EndManual, Ok | Error | EndRetry | EndManual | UserRetry) => true,
            (StartManual, Prep) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Prep => "PREP",
            ActionStatus::Running => "RUNNING",
            ActionStatus::StartRetry => "START_RETRY",
            ActionStatus::StartManual => "START_MANUAL",
            ActionStatus::Done => "DONE",
            ActionStatus::EndRetry => "END_RETRY",
            ActionStatus::EndManual => "END_MANUAL",
            ActionStatus::UserRetry => "USER_RETRY",
            ActionStatus::Ok => "OK",
            ActionStatus::Error => "ERROR",
            ActionStatus::Killed => "KILLED",
            ActionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Transition hint consumed by the DAG engine after an action ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalValue {
    /// Follow the OK edge
    Ok,
    /// Follow the error-handling edge
    Error,
}

/// One DAG node's runtime instance within a running workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAction {
    /// Composite identity (owning job + node name)
    pub id: ActionId,

    /// Executor plugin key (e.g. "shell", "query")
    pub action_type: String,

    /// Current lifecycle state
    pub status: ActionStatus,

    /// True while a lifecycle command is in flight or scheduled
    pub pending: bool,

    /// Transient-failure retry counter
    pub retries: u32,

    /// User-level retry counter (terminal error/failed re-runs)
    pub user_retries: u32,

    /// Maximum user-level retries (0 disables them)
    pub user_retry_max: u32,

    /// Transition hint for the DAG engine, set at finalization
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_value: Option<SignalValue>,

    /// Handle into the external execution system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Last status reported by the external execution system
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_status: Option<String>,

    /// Error code from the last classified failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Error message from the last classified failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Executor configuration (node definition payload)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conf: Option<serde_json::Value>,

    /// Free-form output produced by the executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Creation time
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Time the first start attempt ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Time the action reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,

    /// Time a command last made progress on this action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl WorkflowAction {
    /// Create a new action in `Prep`, pending a start command
    pub fn new(
        job_id: impl Into<String>,
        name: impl Into<String>,
        action_type: impl Into<String>,
    ) -> Self {
        Self {
            id: ActionId::new(job_id, name),
            action_type: action_type.into(),
            status: ActionStatus::Prep,
            pending: true,
            retries: 0,
            user_retries: 0,
            user_retry_max: 0,
            signal_value: None,
            external_id: None,
            external_status: None,
            error_code: None,
            error_message: None,
            conf: None,
            data: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            ended_at: None,
            last_check_at: None,
        }
    }

    /// Set the executor configuration payload
    pub fn with_conf(mut self, conf: serde_json::Value) -> Self {
        self.conf = Some(conf);
        self
    }

    /// Enable user-level retries
    pub fn with_user_retry_max(mut self, max: u32) -> Self {
        self.user_retry_max = max;
        self
    }

    /// Move to a new status, validating the edge
    pub fn transition(&mut self, to: ActionStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ModelError::IllegalTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Record a classified failure on the record
    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.error_code = Some(code.into());
        self.error_message = Some(message.into());
    }

    /// Clear a previously recorded failure
    pub fn clear_error(&mut self) {
        self.error_code = None;
        self.error_message = None;
    }

    /// True once a user-level retry is still available
    pub fn user_retry_available(&self) -> bool {
        self.user_retries < self.user_retry_max
    }

    /// Mark progress for staleness tracking
    pub fn touch(&mut self) {
        self.last_check_at = Some(chrono::Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_roundtrip() {
        let id = ActionId::new("job-1", "shell-node");
        assert_eq!(id.to_string(), "job-1@shell-node");

        let parsed: ActionId = "job-1@shell-node".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_action_id_invalid() {
        assert!("no-separator".parse::<ActionId>().is_err());
        assert!("@name".parse::<ActionId>().is_err());
        assert!("job@".parse::<ActionId>().is_err());
    }

    #[test]
    fn test_status_predicates() {
        assert!(ActionStatus::Ok.is_terminal());
        assert!(ActionStatus::Failed.is_terminal());
        assert!(!ActionStatus::Running.is_terminal());

        assert!(ActionStatus::Prep.start_allowed());
        assert!(ActionStatus::UserRetry.start_allowed());
        assert!(!ActionStatus::Running.start_allowed());

        assert!(ActionStatus::Done.end_allowed());
        assert!(ActionStatus::EndManual.end_allowed());
        assert!(!ActionStatus::Prep.end_allowed());

        assert!(ActionStatus::StartRetry.is_retry());
        assert!(ActionStatus::StartManual.is_manual());
    }

    #[test]
    fn test_transitions() {
        let mut action = WorkflowAction::new("job-1", "n", "shell");
        action.transition(ActionStatus::Running).unwrap();
        action.transition(ActionStatus::Done).unwrap();
        action.transition(ActionStatus::Ok).unwrap();

        // Terminal states are absorbing
        assert!(action.transition(ActionStatus::Running).is_err());
    }

    #[test]
    fn test_kill_from_any_live_state() {
        for status in [
            ActionStatus::Prep,
            ActionStatus::Running,
            ActionStatus::StartRetry,
            ActionStatus::Done,
            ActionStatus::EndManual,
        ] {
            assert!(status.can_transition_to(ActionStatus::Killed));
            assert!(status.can_transition_to(ActionStatus::Failed));
            assert!(status.can_transition_to(ActionStatus::StartManual));
        }
        assert!(!ActionStatus::Ok.can_transition_to(ActionStatus::Killed));
    }

    #[test]
    fn test_user_retry_bookkeeping() {
        let mut action = WorkflowAction::new("job-1", "n", "shell").with_user_retry_max(2);
        assert!(action.user_retry_available());
        action.user_retries = 2;
        assert!(!action.user_retry_available());
    }

    #[test]
    fn test_error_bookkeeping() {
        let mut action = WorkflowAction::new("job-1", "n", "shell");
        action.set_error("E100", "connection refused");
        assert_eq!(action.error_code.as_deref(), Some("E100"));

        action.clear_error();
        assert!(action.error_code.is_none());
        assert!(action.error_message.is_none());
    }

    #[test]
    fn test_action_serialization() {
        let action = WorkflowAction::new("job-1", "shell-node", "shell")
            .with_conf(serde_json::json!({"command": "true"}));

        let json = serde_json::to_string(&action).unwrap();
        let parsed: WorkflowAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, parsed);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ActionStatus::StartManual).unwrap();
        assert_eq!(json, "\"START_MANUAL\"");
        assert_eq!(ActionStatus::StartManual.to_string(), "START_MANUAL");
    }
}
