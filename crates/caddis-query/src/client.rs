//! Query service client abstraction
//!
//! The external query service is consumed through this trait only. A
//! statement either finishes synchronously inside the service or spawns
//! asynchronous stage jobs the bridge has to watch.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// Identifier of one stage job inside the external service
pub type StageId = String;

/// Error type for query client operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryClientError {
    /// Connection to the service was lost; safe to retry
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The statement itself failed inside the service
    #[error("statement failed: {0}")]
    StatementFailed(String),

    /// Any other service-side error
    #[error("service error: {0}")]
    Service(String),
}

impl QueryClientError {
    /// Whether the operation may be retried against a fresh connection
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryClientError::ConnectionLost(_))
    }
}

/// Result type for query client operations
pub type Result<T> = std::result::Result<T, QueryClientError>;

/// State of one stage job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageState::Succeeded | StageState::Failed)
    }
}

/// Outcome of submitting one statement
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The statement finished synchronously inside the service
    Finished { rows_affected: u64 },

    /// The statement spawned asynchronous stage jobs to watch
    Submitted { handle: StatementHandle },
}

/// Handle to a submitted statement and its stage jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementHandle {
    pub statement_id: String,
    pub stages: Vec<StageId>,
}

/// Directed stage dependency graph: child stage → direct upstream stages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageGraph {
    upstreams: HashMap<StageId, Vec<StageId>>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `child` depends on `parent`
    pub fn add_edge(&mut self, child: impl Into<StageId>, parent: impl Into<StageId>) {
        self.upstreams
            .entry(child.into())
            .or_default()
            .push(parent.into());
    }

    /// Direct upstream stages of a stage
    pub fn parents(&self, stage: &str) -> &[StageId] {
        self.upstreams
            .get(stage)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Transitive upstream closure of a stage (excluding the stage itself)
    pub fn ancestors(&self, stage: &str) -> Vec<StageId> {
        let mut seen = Vec::new();
        let mut frontier: Vec<&str> = vec![stage];
        while let Some(current) = frontier.pop() {
            for parent in self.parents(current) {
                if !seen.contains(parent) {
                    seen.push(parent.clone());
                    frontier.push(parent);
                }
            }
        }
        seen
    }
}

/// Client for the external query service
#[async_trait]
pub trait QueryClient: Send + Sync {
    /// Submit one statement for execution
    async fn submit(&self, statement: &str) -> Result<SubmitOutcome>;

    /// Fetch the stage dependency graph of a submitted statement
    async fn stage_graph(&self, statement_id: &str) -> Result<StageGraph>;

    /// Poll the state of one stage job
    async fn poll_stage(&self, statement_id: &str, stage: &StageId) -> Result<StageState>;

    /// Best-effort cancellation of a submitted statement
    async fn cancel(&self, statement_id: &str) -> Result<()>;

    /// Force-terminate the connection
    async fn close(&self) -> Result<()>;
}

/// Scripted outcomes for one statement (test client)
#[derive(Debug, Default)]
struct ScriptedStatement {
    outcome: Option<Result<SubmitOutcome>>,
    graph: StageGraph,
    polls: HashMap<StageId, VecDeque<Result<StageState>>>,
}

/// A scriptable in-memory query client (for tests)
#[derive(Debug, Default)]
pub struct ScriptedQueryClient {
    statements: Mutex<HashMap<String, ScriptedStatement>>,
    cancelled: Mutex<Vec<String>>,
    closed: std::sync::atomic::AtomicBool,
}

impl ScriptedQueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a submit outcome for a statement text
    pub fn on_submit(&self, statement: &str, outcome: Result<SubmitOutcome>) {
        self.statements
            .lock()
            .unwrap()
            .entry(statement.to_string())
            .or_default()
            .outcome = Some(outcome);
    }

    /// Script the stage graph returned for a statement text
    pub fn with_graph(&self, statement: &str, graph: StageGraph) {
        self.statements
            .lock()
            .unwrap()
            .entry(statement.to_string())
            .or_default()
            .graph = graph;
    }

    /// Queue a poll result for a stage; the last result repeats
    pub fn push_poll(&self, statement: &str, stage: &str, result: Result<StageState>) {
        self.statements
            .lock()
            .unwrap()
            .entry(statement.to_string())
            .or_default()
            .polls
            .entry(stage.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryClient for ScriptedQueryClient {
    async fn submit(&self, statement: &str) -> Result<SubmitOutcome> {
        let mut statements = self.statements.lock().unwrap();
        let scripted = statements
            .entry(statement.to_string())
            .or_default();
        match scripted.outcome.take() {
            Some(outcome) => {
                // Repeat terminal outcomes on duplicate submits
                scripted.outcome = Some(outcome.clone());
                outcome
            }
            None => Ok(SubmitOutcome::Finished { rows_affected: 0 }),
        }
    }

    async fn stage_graph(&self, statement_id: &str) -> Result<StageGraph> {
        // Statement ids in the scripted client equal the statement text
        Ok(self
            .statements
            .lock()
            .unwrap()
            .get(statement_id)
            .map(|s| s.graph.clone())
            .unwrap_or_default())
    }

    async fn poll_stage(&self, statement_id: &str, stage: &StageId) -> Result<StageState> {
        let mut statements = self.statements.lock().unwrap();
        let polls = statements
            .entry(statement_id.to_string())
            .or_default()
            .polls
            .entry(stage.clone())
            .or_default();
        match polls.len() {
            0 => Ok(StageState::Succeeded),
            1 => polls.front().cloned().unwrap(),
            _ => polls.pop_front().unwrap(),
        }
    }

    async fn cancel(&self, statement_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(statement_id.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transience() {
        assert!(QueryClientError::ConnectionLost("reset".into()).is_transient());
        assert!(!QueryClientError::StatementFailed("syntax".into()).is_transient());
        assert!(!QueryClientError::Service("500".into()).is_transient());
    }

    #[test]
    fn test_stage_graph_ancestors() {
        // a -> b -> d, a -> c -> d (diamond)
        let mut graph = StageGraph::new();
        graph.add_edge("b", "a");
        graph.add_edge("c", "a");
        graph.add_edge("d", "b");
        graph.add_edge("d", "c");

        let mut ancestors = graph.ancestors("d");
        ancestors.sort();
        assert_eq!(ancestors, vec!["a", "b", "c"]);
        assert_eq!(graph.ancestors("a"), Vec::<StageId>::new());
        assert_eq!(graph.parents("d"), &["b", "c"]);
    }

    #[tokio::test]
    async fn test_scripted_client_submit() {
        let client = ScriptedQueryClient::new();
        client.on_submit("select 1", Ok(SubmitOutcome::Finished { rows_affected: 1 }));
        client.on_submit(
            "bad",
            Err(QueryClientError::StatementFailed("syntax".into())),
        );

        assert_eq!(
            client.submit("select 1").await.unwrap(),
            SubmitOutcome::Finished { rows_affected: 1 }
        );
        // Duplicate submits repeat the scripted outcome
        assert!(client.submit("select 1").await.is_ok());
        assert!(client.submit("bad").await.is_err());
        // Unscripted statements finish trivially
        assert!(client.submit("anything").await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_client_poll_sequence() {
        let client = ScriptedQueryClient::new();
        client.push_poll("stmt", "s1", Ok(StageState::Running));
        client.push_poll("stmt", "s1", Ok(StageState::Succeeded));

        let stage = "s1".to_string();
        assert_eq!(
            client.poll_stage("stmt", &stage).await.unwrap(),
            StageState::Running
        );
        // Last result repeats
        assert_eq!(
            client.poll_stage("stmt", &stage).await.unwrap(),
            StageState::Succeeded
        );
        assert_eq!(
            client.poll_stage("stmt", &stage).await.unwrap(),
            StageState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_scripted_client_cancel_and_close() {
        let client = ScriptedQueryClient::new();
        client.cancel("stmt-1").await.unwrap();
        client.close().await.unwrap();

        assert_eq!(client.cancelled(), vec!["stmt-1"]);
        assert!(client.is_closed());
    }
}
