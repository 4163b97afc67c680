//! Control-node executor
//!
//! Decision-style control nodes evaluate instantly inside the engine and
//! never touch an external system. The executor completes synchronously in
//! `start` and never suspends the owning job when it errors: a stuck
//! control node is a workflow-definition problem, not an operational one.

use crate::context::ActionContext;
use crate::error::{ExecutorError, Result};
use crate::traits::ActionExecutor;
use async_trait::async_trait;
use caddis_model::{ActionStatus, SignalValue, WorkflowAction};

/// Executor for decision and other control-flow nodes
#[derive(Debug, Default)]
pub struct ControlExecutor;

impl ControlExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ActionExecutor for ControlExecutor {
    fn action_type(&self) -> &str {
        "control"
    }

    async fn start(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        // The DAG engine pre-resolves the taken branch into the conf; a
        // control node only has to surface it as action data.
        let data = action.conf.clone();
        ctx.set_execution_data("OK", data);
        Ok(())
    }

    async fn check(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }

    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        match action.external_status.as_deref() {
            Some("OK") => ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok),
            other => {
                return Err(ExecutorError::failed(
                    "CTL001",
                    format!("control node finished with unexpected status {other:?}"),
                )
                .into())
            }
        }
        Ok(())
    }

    async fn kill(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        Ok(())
    }

    fn suspends_job_on_error(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caddis_model::WorkflowJob;

    #[tokio::test]
    async fn test_control_completes_synchronously() {
        let executor = ControlExecutor::new();
        let mut ctx = ActionContext::new(WorkflowJob::running("app"));
        let mut action = WorkflowAction::new("job-1", "decision-1", "control")
            .with_conf(serde_json::json!({"branch": "to-shell"}));

        executor.start(&mut ctx, &mut action).await.unwrap();

        let data = ctx.execution_data().unwrap();
        assert_eq!(data.external_status, "OK");
        assert_eq!(data.data.as_ref().unwrap()["branch"], "to-shell");
    }

    #[tokio::test]
    async fn test_control_end() {
        let executor = ControlExecutor::new();
        let mut ctx = ActionContext::new(WorkflowJob::running("app"));
        let mut action = WorkflowAction::new("job-1", "decision-1", "control");
        action.external_status = Some("OK".to_string());

        executor.end(&mut ctx, &mut action).await.unwrap();
        assert_eq!(ctx.end_data().unwrap().status, ActionStatus::Ok);
    }

    #[test]
    fn test_control_never_suspends_job() {
        assert!(!ControlExecutor::new().suspends_job_on_error());
    }
}
