//! Shell action executor
//!
//! Runs a command on the engine host and completes synchronously: `start`
//! waits for the process and records execution data in one step, so shell
//! actions never go through the asynchronous check path.

use crate::classifier::{ErrorRegistryBuilder, MatchRule};
use crate::context::ActionContext;
use crate::error::{ErrorType, ExecutorError, Failure, Result};
use crate::traits::ActionExecutor;
use async_trait::async_trait;
use caddis_model::{ActionStatus, SignalValue, WorkflowAction};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Configuration payload of a shell action node
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellConf {
    /// Program to run
    pub command: String,

    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Executor for `shell` actions
#[derive(Debug, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Register this executor's failure classifications
    pub fn register_errors(builder: &mut ErrorRegistryBuilder) {
        builder
            .register(
                "shell",
                MatchRule::Exact("io.not_found".into()),
                ErrorType::NonTransient,
                "SH001",
            )
            .register(
                "shell",
                MatchRule::Ancestor("io".into()),
                ErrorType::Transient,
                "SH002",
            );
    }

    fn parse_conf(action: &WorkflowAction) -> std::result::Result<ShellConf, ExecutorError> {
        let conf = action.conf.as_ref().ok_or_else(|| {
            ExecutorError::error("SH010", "shell action has no configuration")
        })?;
        serde_json::from_value(conf.clone())
            .map_err(|e| ExecutorError::error("SH011", format!("invalid shell configuration: {e}")))
    }
}

#[async_trait]
impl ActionExecutor for ShellExecutor {
    fn action_type(&self) -> &str {
        "shell"
    }

    async fn start(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        let conf = Self::parse_conf(action)?;
        debug!(action = %action.id, command = %conf.command, "running shell command");

        let output = tokio::process::Command::new(&conf.command)
            .args(&conf.args)
            .envs(&conf.env)
            .output()
            .await
            .map_err(|e| Failure::from_io(&e))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let data = serde_json::json!({
            "exitCode": exit_code,
            "stdout": String::from_utf8_lossy(&output.stdout).trim_end(),
            "stderr": String::from_utf8_lossy(&output.stderr).trim_end(),
        });

        let status = if output.status.success() { "OK" } else { "ERROR" };
        ctx.set_execution_data(status, Some(data));
        Ok(())
    }

    async fn check(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        // Shell actions complete synchronously in start
        Ok(())
    }

    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> Result<()> {
        match action.external_status.as_deref() {
            Some("OK") => ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok),
            _ => ctx.set_end_data(ActionStatus::Error, SignalValue::Error),
        }
        Ok(())
    }

    async fn kill(&self, _ctx: &mut ActionContext, _action: &mut WorkflowAction) -> Result<()> {
        // The process is reaped inside start; nothing external to cancel
        Ok(())
    }

    fn update_attributes(
        &self,
        action: &mut WorkflowAction,
        attrs: &HashMap<String, String>,
    ) -> Result<()> {
        let mut conf = match &action.conf {
            Some(value) => value.clone(),
            None => serde_json::json!({}),
        };
        let obj = conf.as_object_mut().ok_or_else(|| {
            ExecutorError::error("SH011", "shell configuration is not an object")
        })?;

        for (key, value) in attrs {
            match key.as_str() {
                "command" => {
                    obj.insert("command".to_string(), serde_json::Value::String(value.clone()));
                }
                "args" => {
                    let args: Vec<serde_json::Value> = value
                        .split_whitespace()
                        .map(|s| serde_json::Value::String(s.to_string()))
                        .collect();
                    obj.insert("args".to_string(), serde_json::Value::Array(args));
                }
                other => {
                    return Err(ExecutorError::non_transient(
                        "UPDATE_UNSUPPORTED",
                        format!("shell actions do not support updating '{other}'"),
                    )
                    .into());
                }
            }
        }

        action.conf = Some(conf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorFault;
    use caddis_model::WorkflowJob;

    fn test_ctx() -> ActionContext {
        ActionContext::new(WorkflowJob::running("test-app"))
    }

    fn shell_action(command: &str, args: &[&str]) -> WorkflowAction {
        WorkflowAction::new("job-1", "sh-node", "shell").with_conf(serde_json::json!({
            "command": command,
            "args": args,
        }))
    }

    #[tokio::test]
    async fn test_shell_success() {
        let executor = ShellExecutor::new();
        let mut ctx = test_ctx();
        let mut action = shell_action("sh", &["-c", "echo hello"]);

        executor.start(&mut ctx, &mut action).await.unwrap();

        let data = ctx.execution_data().unwrap();
        assert_eq!(data.external_status, "OK");
        let output = data.data.as_ref().unwrap();
        assert_eq!(output["exitCode"], 0);
        assert_eq!(output["stdout"], "hello");
    }

    #[tokio::test]
    async fn test_shell_nonzero_exit() {
        let executor = ShellExecutor::new();
        let mut ctx = test_ctx();
        let mut action = shell_action("sh", &["-c", "exit 3"]);

        executor.start(&mut ctx, &mut action).await.unwrap();

        let data = ctx.execution_data().unwrap();
        assert_eq!(data.external_status, "ERROR");
        assert_eq!(data.data.as_ref().unwrap()["exitCode"], 3);
    }

    #[tokio::test]
    async fn test_shell_missing_binary_raises_io_fault() {
        let executor = ShellExecutor::new();
        let mut ctx = test_ctx();
        let mut action = shell_action("/no/such/binary", &[]);

        let fault = executor.start(&mut ctx, &mut action).await.unwrap_err();
        match fault {
            ExecutorFault::Raw(failure) => assert_eq!(failure.kind.as_str(), "io.not_found"),
            other => panic!("expected raw fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_missing_conf() {
        let executor = ShellExecutor::new();
        let mut ctx = test_ctx();
        let mut action = WorkflowAction::new("job-1", "sh-node", "shell");

        let fault = executor.start(&mut ctx, &mut action).await.unwrap_err();
        match fault {
            ExecutorFault::Typed(err) => assert_eq!(err.code, "SH010"),
            other => panic!("expected typed fault, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_end_maps_external_status() {
        let executor = ShellExecutor::new();
        let mut action = shell_action("sh", &[]);

        action.external_status = Some("OK".to_string());
        let mut ctx = test_ctx();
        executor.end(&mut ctx, &mut action).await.unwrap();
        assert_eq!(ctx.end_data().unwrap().status, ActionStatus::Ok);

        action.external_status = Some("ERROR".to_string());
        let mut ctx = test_ctx();
        executor.end(&mut ctx, &mut action).await.unwrap();
        assert_eq!(ctx.end_data().unwrap().status, ActionStatus::Error);
        assert_eq!(ctx.end_data().unwrap().signal, SignalValue::Error);
    }

    #[test]
    fn test_shell_update_command() {
        let executor = ShellExecutor::new();
        let mut action = shell_action("sh", &["-c", "false"]);

        let mut attrs = HashMap::new();
        attrs.insert("command".to_string(), "env".to_string());
        executor.update_attributes(&mut action, &attrs).unwrap();

        let conf: ShellConf = serde_json::from_value(action.conf.clone().unwrap()).unwrap();
        assert_eq!(conf.command, "env");
    }

    #[test]
    fn test_shell_update_unknown_attr_rejected() {
        let executor = ShellExecutor::new();
        let mut action = shell_action("sh", &[]);

        let mut attrs = HashMap::new();
        attrs.insert("workdir".to_string(), "/tmp".to_string());
        assert!(executor.update_attributes(&mut action, &attrs).is_err());
    }

    #[test]
    fn test_shell_registered_errors() {
        let mut builder = ErrorRegistryBuilder::new();
        ShellExecutor::register_errors(&mut builder);
        let registry = builder.build();

        let err = registry.classify("shell", &Failure::new("io.not_found", "no such file"));
        assert_eq!(err.code, "SH001");
        assert_eq!(err.error_type, ErrorType::NonTransient);

        let err = registry.classify("shell", &Failure::new("io.connection.reset", "reset"));
        assert_eq!(err.code, "SH002");
        assert_eq!(err.error_type, ErrorType::Transient);
    }
}
