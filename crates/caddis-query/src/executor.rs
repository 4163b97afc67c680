//! Query script action executor
//!
//! Runs a multi-statement query script with asynchronous completion: each
//! statement executes as its own unit of work on the engine's command
//! scheduler, stage polling re-arms itself through the delay queue, and the
//! owning action is completed through a check command once the session
//! reaches an outcome.

use crate::client::{
    QueryClient, QueryClientError, StageId, StageState, StatementHandle, SubmitOutcome,
};
use crate::session::{QuerySession, SessionManager, SessionOutcome, StatementRecord};
use async_trait::async_trait;
use caddis_actions::{
    ActionContext, ActionExecutor, ErrorRegistryBuilder, ErrorType, ExecutorError, ExecutorFault,
    Failure, MatchRule, Result as ExecResult,
};
use caddis_engine::{Command, CommandScheduler, DelayQueue, PRIORITY_END};
use caddis_model::{ActionId, ActionStatus, SignalValue, WorkflowAction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Handles into the engine's queues used to schedule statement work
#[derive(Clone)]
pub struct QueryRuntime {
    pub scheduler: CommandScheduler,
    pub delay: DelayQueue,
}

/// Connection factory for the external query service
#[async_trait]
pub trait QueryClientFactory: Send + Sync {
    async fn connect(&self) -> std::result::Result<Arc<dyn QueryClient>, QueryClientError>;
}

/// Factory handing out one shared client (tests, embedded services)
pub struct StaticClientFactory {
    client: Arc<dyn QueryClient>,
}

impl StaticClientFactory {
    pub fn new(client: Arc<dyn QueryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueryClientFactory for StaticClientFactory {
    async fn connect(&self) -> std::result::Result<Arc<dyn QueryClient>, QueryClientError> {
        Ok(self.client.clone())
    }
}

/// Executor for `query` actions
pub struct QueryScriptExecutor {
    sessions: Arc<SessionManager>,
    factory: Arc<dyn QueryClientFactory>,
    runtime: QueryRuntime,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl QueryScriptExecutor {
    pub fn new(factory: Arc<dyn QueryClientFactory>, runtime: QueryRuntime) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new()),
            factory,
            runtime,
            poll_interval: Duration::from_secs(10),
            poll_max_attempts: 5,
        }
    }

    /// Delay between stage poll rounds
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Consecutive transient client failures tolerated before a statement
    /// is failed
    pub fn with_poll_max_attempts(mut self, attempts: u32) -> Self {
        self.poll_max_attempts = attempts;
        self
    }

    /// The live session map (shared with the notification path)
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Register this executor's failure classifications
    pub fn register_errors(builder: &mut ErrorRegistryBuilder) {
        builder
            .register(
                "query",
                MatchRule::Ancestor("query.connection".into()),
                ErrorType::Transient,
                "QE101",
            )
            .register(
                "query",
                MatchRule::Ancestor("query".into()),
                ErrorType::Error,
                "QE100",
            );
    }

    /// External stage progress notification
    ///
    /// Updates the status table of the action's live session; the
    /// dependency-inversion map marks un-notified upstream stages when a
    /// downstream completion arrives first. Returns false for unknown
    /// sessions.
    pub fn notify_stage(&self, action_id: &ActionId, stage: &StageId, state: StageState) -> bool {
        match self.sessions.get(action_id) {
            Some(session) => {
                session.record_stage(session.cursor(), stage, state);
                true
            }
            None => false,
        }
    }

    fn parse_statements(action: &WorkflowAction) -> std::result::Result<Vec<String>, ExecutorError> {
        let conf = action
            .conf
            .as_ref()
            .ok_or_else(|| ExecutorError::error("QS010", "query action has no configuration"))?;

        if let Some(list) = conf.get("statements").and_then(|v| v.as_array()) {
            let statements: Vec<String> = list
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !statements.is_empty() {
                return Ok(statements);
            }
        } else if let Some(script) = conf.get("script").and_then(|v| v.as_str()) {
            let statements: Vec<String> = script
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if !statements.is_empty() {
                return Ok(statements);
            }
        }
        Err(ExecutorError::error("QS011", "query action has no statements"))
    }
}

fn client_failure(err: QueryClientError) -> ExecutorFault {
    let kind = match &err {
        QueryClientError::ConnectionLost(_) => "query.connection.lost",
        QueryClientError::StatementFailed(_) => "query.statement",
        QueryClientError::Service(_) => "query.service",
    };
    Failure::new(kind, err.to_string()).into()
}

#[async_trait]
impl ActionExecutor for QueryScriptExecutor {
    fn action_type(&self) -> &str {
        "query"
    }

    async fn start(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> ExecResult<()> {
        let statements = Self::parse_statements(action)?;
        let client = self.factory.connect().await.map_err(client_failure)?;

        let session = Arc::new(QuerySession::new(action.id.clone(), statements, client));
        self.sessions.insert(session.clone());

        let driver = StatementDriver {
            session,
            runtime: self.runtime.clone(),
            poll_interval: self.poll_interval,
            poll_max_attempts: self.poll_max_attempts,
        };
        driver.spawn_statement(0, 0);

        ctx.set_start_data(action.id.to_string(), "RUNNING");
        Ok(())
    }

    async fn check(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> ExecResult<()> {
        let session = self.sessions.get(&action.id).ok_or_else(|| {
            ExecutorError::failed("QS001", "query session lost, action cannot be resumed")
        })?;

        match session.outcome() {
            None => ctx.set_external_status("RUNNING"),
            Some(SessionOutcome::Succeeded) => {
                ctx.set_execution_data("SUCCEEDED", Some(session.synthesize_data()));
            }
            Some(SessionOutcome::Failed) => {
                ctx.set_execution_data("FAILED", Some(session.synthesize_data()));
            }
            Some(SessionOutcome::Killed) => {
                ctx.set_execution_data("KILLED", Some(session.synthesize_data()));
            }
        }
        Ok(())
    }

    async fn end(&self, ctx: &mut ActionContext, action: &mut WorkflowAction) -> ExecResult<()> {
        match action.external_status.as_deref() {
            Some("SUCCEEDED") => ctx.set_end_data(ActionStatus::Ok, SignalValue::Ok),
            Some("KILLED") => ctx.set_end_data(ActionStatus::Killed, SignalValue::Error),
            _ => ctx.set_end_data(ActionStatus::Error, SignalValue::Error),
        }
        self.sessions.remove(&action.id);
        Ok(())
    }

    async fn kill(&self, _ctx: &mut ActionContext, action: &mut WorkflowAction) -> ExecResult<()> {
        if let Some(session) = self.sessions.get(&action.id) {
            session.kill();
            if let Some(statement_id) = session.current_statement_id() {
                if let Err(e) = session.client().cancel(&statement_id).await {
                    debug!(action = %action.id, error = %e, "statement cancel failed");
                }
            }
            if let Err(e) = session.client().close().await {
                debug!(action = %action.id, error = %e, "connection close failed");
            }
        }
        Ok(())
    }

    fn is_completed(
        &self,
        _external_id: &str,
        external_status: &str,
        _data: Option<&serde_json::Value>,
    ) -> bool {
        matches!(external_status, "SUCCEEDED" | "FAILED" | "KILLED")
    }

    fn uses_session(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for QueryScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryScriptExecutor")
            .field("sessions", &self.sessions.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Per-session driver running statements on the engine's scheduler
#[derive(Clone)]
struct StatementDriver {
    session: Arc<QuerySession>,
    runtime: QueryRuntime,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

impl StatementDriver {
    fn spawn_statement(&self, index: usize, attempt: u32) {
        let driver = self.clone();
        let key = format!("query-{}-stmt{index}", self.session.action_id());
        let cmd = Command::task(key, async move {
            driver.run_statement(index, attempt).await;
        });
        if let Err(e) = self.runtime.scheduler.queue(cmd) {
            warn!(action = %self.session.action_id(), error = %e, "statement task rejected");
        }
    }

    fn spawn_statement_delayed(&self, index: usize, attempt: u32, delay: Duration) {
        let driver = self.clone();
        let key = format!("query-{}-stmt{index}", self.session.action_id());
        let cmd = Command::task(key, async move {
            driver.run_statement(index, attempt).await;
        });
        self.runtime.delay.push(cmd, delay);
    }

    fn spawn_poll(
        &self,
        index: usize,
        handle: StatementHandle,
        attempt: u32,
        delay: Option<Duration>,
    ) {
        let driver = self.clone();
        let key = format!("query-{}-poll{index}", self.session.action_id());
        let cmd = Command::task(key, async move {
            driver.poll_stages(index, handle, attempt).await;
        });
        match delay {
            Some(delay) => {
                self.runtime.delay.push(cmd, delay);
            }
            None => {
                if let Err(e) = self.runtime.scheduler.queue(cmd) {
                    warn!(action = %self.session.action_id(), error = %e, "poll task rejected");
                }
            }
        }
    }

    /// Queue a check for the owning action once the session has an outcome
    fn trigger_check(&self) {
        let cmd = Command::check(self.session.action_id()).with_priority(PRIORITY_END);
        if let Err(e) = self.runtime.scheduler.queue(cmd) {
            warn!(action = %self.session.action_id(), error = %e, "completion check rejected");
        }
    }

    fn advance(&self, index: usize) {
        if index + 1 < self.session.statement_count() {
            self.spawn_statement(index + 1, 0);
        } else {
            self.trigger_check();
        }
    }

    fn fail(&self, index: usize, statement: &str, error: impl std::fmt::Display) {
        self.session
            .fail_statement(StatementRecord::failed(index, statement, error.to_string()));
        self.trigger_check();
    }

    async fn run_statement(self, index: usize, attempt: u32) {
        if self.session.is_killed() {
            return;
        }
        let Some(statement) = self.session.statement(index).map(str::to_string) else {
            return;
        };
        debug!(action = %self.session.action_id(), index, "submitting statement");

        match self.session.client().submit(&statement).await {
            Ok(SubmitOutcome::Finished { rows_affected }) => {
                self.session.complete_statement(StatementRecord::succeeded(
                    index,
                    &statement,
                    rows_affected,
                ));
                self.advance(index);
            }
            Ok(SubmitOutcome::Submitted { handle }) => {
                let graph = match self
                    .session
                    .client()
                    .stage_graph(&handle.statement_id)
                    .await
                {
                    Ok(graph) => graph,
                    Err(e) if e.is_transient() && attempt < self.poll_max_attempts => {
                        debug!(error = %e, "transient graph fetch failure, retrying");
                        self.spawn_statement_delayed(index, attempt + 1, self.poll_interval);
                        return;
                    }
                    Err(e) => {
                        self.fail(index, &statement, e);
                        return;
                    }
                };
                self.session
                    .begin_statement(index, &handle.statement_id, &handle.stages, &graph);
                self.spawn_poll(index, handle, 0, None);
            }
            Err(e) if e.is_transient() && attempt < self.poll_max_attempts => {
                debug!(error = %e, "transient submit failure, retrying");
                self.spawn_statement_delayed(index, attempt + 1, self.poll_interval);
            }
            Err(e) => self.fail(index, &statement, e),
        }
    }

    async fn poll_stages(self, index: usize, handle: StatementHandle, attempt: u32) {
        if self.session.is_killed() {
            return;
        }
        let statement = self
            .session
            .statement(index)
            .unwrap_or_default()
            .to_string();

        for stage in handle.stages.clone() {
            if matches!(self.session.stage_status(index, &stage), Some(s) if s.is_terminal()) {
                continue;
            }
            match self
                .session
                .client()
                .poll_stage(&handle.statement_id, &stage)
                .await
            {
                Ok(state) => {
                    self.session.record_stage(index, &stage, state);
                    if state == StageState::Failed {
                        self.fail(index, &statement, format!("stage {stage} failed"));
                        return;
                    }
                }
                Err(e) if e.is_transient() && attempt < self.poll_max_attempts => {
                    debug!(error = %e, stage = %stage, "transient poll failure, retrying");
                    self.spawn_poll(index, handle.clone(), attempt + 1, Some(self.poll_interval));
                    return;
                }
                Err(e) => {
                    self.fail(index, &statement, e);
                    return;
                }
            }
        }

        if self.session.stages_succeeded(index, &handle.stages) {
            self.session
                .complete_statement(StatementRecord::succeeded(index, &statement, 0));
            self.advance(index);
        } else {
            self.spawn_poll(index, handle, 0, Some(self.poll_interval));
        }
    }
}
