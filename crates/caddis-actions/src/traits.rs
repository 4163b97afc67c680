//! Action executor trait definition
//!
//! Each action type plugs into the engine through this trait. The engine
//! drives the four lifecycle hooks and never sees the action's business
//! logic; executors report progress only through the `ActionContext` and
//! report failures only through `ExecutorFault`.

use crate::context::ActionContext;
use crate::error::{ExecutorError, Result};
use async_trait::async_trait;
use caddis_model::WorkflowAction;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Default transient-retry bound when neither the job nor the
/// configuration overrides it
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before re-running a transiently failed command
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// External statuses treated as completed by the default
/// `is_completed` implementation
const COMPLETED_STATUSES: &[&str] = &["SUCCEEDED", "FAILED", "KILLED", "OK", "ERROR", "DONE"];

/// Core trait for action executors
///
/// # Contract
///
/// - `start` must, before returning, call exactly one of
///   `ActionContext::set_start_data` (asynchronous completion, expect later
///   `check` calls) or `ActionContext::set_execution_data` (synchronous
///   completion). Calling neither is a contract violation the engine
///   treats as a fatal job failure.
/// - `check` is only called while the action is running; it must call
///   `set_execution_data` once the external job has finished, or return
///   without touching the context while still in progress.
/// - `end` must call `set_end_data` with a terminal status; omission is
///   handled like the `start` case.
/// - `kill` is best-effort; its errors are logged, never propagated.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executor plugin key (used for registration and lookup)
    fn action_type(&self) -> &str;

    /// Launch the action against the external system
    async fn start(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()>;

    /// Poll an asynchronously completing action
    async fn check(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()>;

    /// Finalize a completed action with a terminal status
    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()>;

    /// Best-effort cancellation of the external job
    async fn kill(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()>;

    /// Stateless predicate used by the external callback path: should this
    /// externally reported status trigger a check command?
    fn is_completed(
        &self,
        _external_id: &str,
        external_status: &str,
        _data: Option<&serde_json::Value>,
    ) -> bool {
        COMPLETED_STATUSES.contains(&external_status)
    }

    /// Apply an operator attribute update to a parked action
    ///
    /// Most executors reject updates outright.
    fn update_attributes(
        &self,
        _action: &mut WorkflowAction,
        _attrs: &HashMap<String, String>,
    ) -> Result<()> {
        Err(ExecutorError::non_transient(
            "UPDATE_UNSUPPORTED",
            format!("{} actions do not support attribute updates", self.action_type()),
        )
        .into())
    }

    /// Transient-retry bound for this executor type
    fn max_retries(&self) -> u32 {
        DEFAULT_MAX_RETRIES
    }

    /// Delay between transient retries for this executor type
    fn retry_interval(&self) -> Duration {
        DEFAULT_RETRY_INTERVAL
    }

    /// Whether escalating this executor's action to a manual state should
    /// suspend the owning job (control-flow executors return false)
    fn suspends_job_on_error(&self) -> bool {
        true
    }

    /// Whether running actions of this type depend on process-local
    /// session state that does not survive a restart
    fn uses_session(&self) -> bool {
        false
    }
}

/// Registry of executors by action type
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor
    pub fn register<E: ActionExecutor + 'static>(&mut self, executor: E) {
        let key = executor.action_type().to_string();
        self.executors.insert(key, Arc::new(executor));
    }

    /// Register an executor (Arc version for shared ownership)
    pub fn register_arc(&mut self, executor: Arc<dyn ActionExecutor>) {
        let key = executor.action_type().to_string();
        self.executors.insert(key, executor);
    }

    /// Look up an executor by action type
    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(action_type).cloned()
    }

    pub fn has(&self, action_type: &str) -> bool {
        self.executors.contains_key(action_type)
    }

    pub fn action_types(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("executors", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A synchronous-completion executor that always succeeds (for testing)
pub struct EchoExecutor {
    action_type: String,
}

impl EchoExecutor {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
        }
    }
}

#[async_trait]
impl ActionExecutor for EchoExecutor {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn start(&self, ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        ctx.set_execution_data("OK", None);
        Ok(())
    }

    async fn check(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }

    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        use caddis_model::{ActionStatus, SignalValue};
        match action.external_status.as_deref() {
            Some("OK") => ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok),
            _ => ctx.set_end_data(ActionStatus::Error, SignalValue::Error),
        }
        Ok(())
    }

    async fn kill(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }
}

/// An executor whose hooks fail with a fixed fault (for testing)
pub struct FailingExecutor {
    action_type: String,
    fault: crate::error::ExecutorFault,
}

impl FailingExecutor {
    pub fn new(action_type: impl Into<String>, fault: impl Into<crate::error::ExecutorFault>) -> Self {
        Self {
            action_type: action_type.into(),
            fault: fault.into(),
        }
    }
}

#[async_trait]
impl ActionExecutor for FailingExecutor {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn start(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Err(self.fault.clone())
    }

    async fn check(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Err(self.fault.clone())
    }

    async fn end(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Err(self.fault.clone())
    }

    async fn kill(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }
}

/// An asynchronous-completion executor that finishes after a fixed number
/// of check calls (for testing the polling path)
pub struct AsyncStubExecutor {
    action_type: String,
    checks_until_done: u32,
    checks_seen: std::sync::atomic::AtomicU32,
}

impl AsyncStubExecutor {
    pub fn new(action_type: impl Into<String>, checks_until_done: u32) -> Self {
        Self {
            action_type: action_type.into(),
            checks_until_done,
            checks_seen: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn checks_seen(&self) -> u32 {
        self.checks_seen.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for AsyncStubExecutor {
    fn action_type(&self) -> &str {
        &self.action_type
    }

    async fn start(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        ctx.set_start_data(format!("ext-{}", action.id), "SUBMITTED");
        Ok(())
    }

    async fn check(&self, ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        let seen = self
            .checks_seen
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        if seen >= self.checks_until_done {
            ctx.set_execution_data("SUCCEEDED", None);
        } else {
            ctx.set_external_status("RUNNING");
        }
        Ok(())
    }

    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        use caddis_model::{ActionStatus, SignalValue};
        match action.external_status.as_deref() {
            Some("SUCCEEDED") => ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok),
            _ => ctx.set_end_data(ActionStatus::Error, SignalValue::Error),
        }
        Ok(())
    }

    async fn kill(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }
}
