//! Execution context passed to executor hooks
//!
//! The context is the persistence-and-signaling facade between an executor
//! and the engine core. An executor reports progress exclusively through
//! the setters here; after each hook returns, the core inspects which
//! setters were called to decide the action's next state.

use caddis_model::{ActionStatus, SignalValue, WorkflowJob};
use serde::{Deserialize, Serialize};

/// Data recorded by `start` for asynchronous executors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartData {
    /// Handle into the external execution system
    pub external_id: String,

    /// Initial status reported by the external system
    pub external_status: String,
}

/// Data recorded when execution completes (by `start` for synchronous
/// executors, by `check` for asynchronous ones)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
    /// Final status reported by the external system
    pub external_status: String,

    /// Free-form output captured for downstream nodes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Data recorded by `end` to finalize the action
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndData {
    /// Terminal action status (`Ok`, `Error`, `Killed` or `Failed`)
    pub status: ActionStatus,

    /// Transition hint for the DAG engine
    pub signal: SignalValue,
}

/// Context provided to executor hooks
#[derive(Debug, Clone)]
pub struct ActionContext {
    job: WorkflowJob,
    retrying: bool,
    callback_url_base: String,
    start_data: Option<StartData>,
    execution_data: Option<ExecutionData>,
    end_data: Option<EndData>,
    external_status: Option<String>,
}

impl ActionContext {
    /// Create a context for one hook invocation
    pub fn new(job: WorkflowJob) -> Self {
        Self {
            job,
            retrying: false,
            callback_url_base: String::new(),
            start_data: None,
            execution_data: None,
            end_data: None,
            external_status: None,
        }
    }

    /// Mark this invocation as a retry of an earlier attempt
    pub fn with_retrying(mut self, retrying: bool) -> Self {
        self.retrying = retrying;
        self
    }

    /// Set the callback URL template handed to external systems
    pub fn with_callback_url_base(mut self, base: impl Into<String>) -> Self {
        self.callback_url_base = base.into();
        self
    }

    /// The owning workflow job (read-only snapshot)
    pub fn workflow(&self) -> &WorkflowJob {
        &self.job
    }

    /// Whether this hook call is a retry of a failed attempt
    pub fn is_retry(&self) -> bool {
        self.retrying
    }

    /// Callback URL with the given status placeholder substituted
    pub fn callback_url(&self, status_placeholder: &str) -> String {
        self.callback_url_base.replace("{status}", status_placeholder)
    }

    /// Record that the external job was launched (asynchronous completion)
    pub fn set_start_data(
        &mut self,
        external_id: impl Into<String>,
        external_status: impl Into<String>,
    ) {
        self.start_data = Some(StartData {
            external_id: external_id.into(),
            external_status: external_status.into(),
        });
    }

    /// Record that execution finished (synchronous completion)
    pub fn set_execution_data(
        &mut self,
        external_status: impl Into<String>,
        data: Option<serde_json::Value>,
    ) {
        self.execution_data = Some(ExecutionData {
            external_status: external_status.into(),
            data,
        });
    }

    /// Record the terminal outcome from the `end` hook
    pub fn set_end_data(&mut self, status: ActionStatus, signal: SignalValue) {
        self.end_data = Some(EndData { status, signal });
    }

    /// Update the last externally-reported status without completing
    pub fn set_external_status(&mut self, status: impl Into<String>) {
        self.external_status = Some(status.into());
    }

    pub fn start_data(&self) -> Option<&StartData> {
        self.start_data.as_ref()
    }

    pub fn execution_data(&self) -> Option<&ExecutionData> {
        self.execution_data.as_ref()
    }

    pub fn end_data(&self) -> Option<&EndData> {
        self.end_data.as_ref()
    }

    pub fn external_status(&self) -> Option<&str> {
        self.external_status.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> WorkflowJob {
        WorkflowJob::running("test-app")
    }

    #[test]
    fn test_context_new() {
        let ctx = ActionContext::new(test_job());
        assert_eq!(ctx.workflow().app_name, "test-app");
        assert!(!ctx.is_retry());
        assert!(ctx.start_data().is_none());
        assert!(ctx.execution_data().is_none());
        assert!(ctx.end_data().is_none());
    }

    #[test]
    fn test_context_retrying() {
        let ctx = ActionContext::new(test_job()).with_retrying(true);
        assert!(ctx.is_retry());
    }

    #[test]
    fn test_callback_url_substitution() {
        let ctx = ActionContext::new(test_job())
            .with_callback_url_base("http://host:8080/callback?id=a1&status={status}");
        assert_eq!(
            ctx.callback_url("$externalStatus"),
            "http://host:8080/callback?id=a1&status=$externalStatus"
        );
    }

    #[test]
    fn test_start_data() {
        let mut ctx = ActionContext::new(test_job());
        ctx.set_start_data("job_2024", "SUBMITTED");

        let data = ctx.start_data().unwrap();
        assert_eq!(data.external_id, "job_2024");
        assert_eq!(data.external_status, "SUBMITTED");
    }

    #[test]
    fn test_execution_data() {
        let mut ctx = ActionContext::new(test_job());
        ctx.set_execution_data("OK", Some(serde_json::json!({"exitCode": 0})));

        let data = ctx.execution_data().unwrap();
        assert_eq!(data.external_status, "OK");
        assert_eq!(data.data.as_ref().unwrap()["exitCode"], 0);
    }

    #[test]
    fn test_end_data() {
        let mut ctx = ActionContext::new(test_job());
        ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok);

        let data = ctx.end_data().unwrap();
        assert_eq!(data.status, ActionStatus::Ok);
        assert_eq!(data.signal, SignalValue::Ok);
    }

    #[test]
    fn test_external_status_only() {
        let mut ctx = ActionContext::new(test_job());
        ctx.set_external_status("RUNNING");
        assert_eq!(ctx.external_status(), Some("RUNNING"));
        assert!(ctx.execution_data().is_none());
    }
}
