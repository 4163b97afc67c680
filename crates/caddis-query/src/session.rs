//! In-memory query sessions
//!
//! A session coordinates one query action's statement cursor, its stage
//! status table and its cancellation token. Sessions live only in the
//! process-local `SessionManager`; the store never sees them.

use crate::client::{QueryClient, StageGraph, StageId, StageState};
use caddis_model::ActionId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Final outcome of a whole query session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionOutcome {
    Succeeded,
    Failed,
    Killed,
}

/// Audit record of one executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRecord {
    pub index: usize,
    pub statement: String,
    pub succeeded: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatementRecord {
    pub fn succeeded(index: usize, statement: impl Into<String>, rows_affected: u64) -> Self {
        Self {
            index,
            statement: statement.into(),
            succeeded: true,
            rows_affected: Some(rows_affected),
            error: None,
        }
    }

    pub fn failed(index: usize, statement: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            index,
            statement: statement.into(),
            succeeded: false,
            rows_affected: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    cursor: usize,
    /// Status table keyed by (statement index, stage id)
    stage_status: HashMap<(usize, StageId), StageState>,
    /// Stage → transitive upstream stages of the current statement
    inversion: HashMap<StageId, Vec<StageId>>,
    /// External id of the statement currently submitted, if any
    current_statement_id: Option<String>,
    records: Vec<StatementRecord>,
    outcome: Option<SessionOutcome>,
}

/// Coordinator for one query action's multi-statement execution
pub struct QuerySession {
    action_id: ActionId,
    client: Arc<dyn QueryClient>,
    statements: Vec<String>,
    state: Mutex<SessionState>,
    token: CancellationToken,
}

impl QuerySession {
    pub fn new(action_id: ActionId, statements: Vec<String>, client: Arc<dyn QueryClient>) -> Self {
        Self {
            action_id,
            client,
            statements,
            state: Mutex::new(SessionState::default()),
            token: CancellationToken::new(),
        }
    }

    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    pub fn client(&self) -> &Arc<dyn QueryClient> {
        &self.client
    }

    /// Cancellation token checked cooperatively by statements and polls
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn statement(&self, index: usize) -> Option<&str> {
        self.statements.get(index).map(String::as_str)
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn cursor(&self) -> usize {
        self.state.lock().unwrap().cursor
    }

    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.state.lock().unwrap().outcome.clone()
    }

    pub fn records(&self) -> Vec<StatementRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Install the stage table and dependency-inversion map for a
    /// statement's stage jobs
    pub fn begin_statement(
        &self,
        index: usize,
        statement_id: &str,
        stages: &[StageId],
        graph: &StageGraph,
    ) {
        let mut state = self.state.lock().unwrap();
        state.inversion.clear();
        state.current_statement_id = Some(statement_id.to_string());
        for stage in stages {
            state
                .stage_status
                .insert((index, stage.clone()), StageState::Pending);
            state.inversion.insert(stage.clone(), graph.ancestors(stage));
        }
    }

    /// External id of the statement currently submitted
    pub fn current_statement_id(&self) -> Option<String> {
        self.state.lock().unwrap().current_statement_id.clone()
    }

    /// Update a stage's status
    ///
    /// A completion for a downstream stage retroactively marks every
    /// un-notified upstream stage succeeded, compensating for out-of-order
    /// callback delivery.
    pub fn record_stage(&self, index: usize, stage: &StageId, status: StageState) {
        let mut state = self.state.lock().unwrap();
        state.stage_status.insert((index, stage.clone()), status);
        if status == StageState::Succeeded {
            let upstreams = state.inversion.get(stage).cloned().unwrap_or_default();
            for upstream in upstreams {
                let key = (index, upstream.clone());
                let current = state.stage_status.get(&key).copied();
                if !matches!(current, Some(s) if s.is_terminal()) {
                    debug!(
                        action = %self.action_id,
                        stage = %upstream,
                        "marking upstream stage succeeded from downstream completion"
                    );
                    state.stage_status.insert(key, StageState::Succeeded);
                }
            }
        }
    }

    /// Status of one stage
    pub fn stage_status(&self, index: usize, stage: &str) -> Option<StageState> {
        self.state
            .lock()
            .unwrap()
            .stage_status
            .get(&(index, stage.to_string()))
            .copied()
    }

    /// True once every given stage of the statement has succeeded
    pub fn stages_succeeded(&self, index: usize, stages: &[StageId]) -> bool {
        let state = self.state.lock().unwrap();
        stages.iter().all(|stage| {
            matches!(
                state.stage_status.get(&(index, stage.clone())),
                Some(StageState::Succeeded)
            )
        })
    }

    /// Any stage of the statement that has failed
    pub fn failed_stage(&self, index: usize, stages: &[StageId]) -> Option<StageId> {
        let state = self.state.lock().unwrap();
        stages
            .iter()
            .find(|stage| {
                matches!(
                    state.stage_status.get(&(index, (*stage).clone())),
                    Some(StageState::Failed)
                )
            })
            .cloned()
    }

    /// Record a completed statement and advance the cursor
    pub fn complete_statement(&self, record: StatementRecord) {
        let mut state = self.state.lock().unwrap();
        state.cursor = record.index + 1;
        state.current_statement_id = None;
        state.records.push(record);
        if state.cursor >= self.statements.len() && state.outcome.is_none() {
            state.outcome = Some(SessionOutcome::Succeeded);
        }
    }

    /// Record a failed statement; earlier records are preserved for audit
    pub fn fail_statement(&self, record: StatementRecord) {
        let mut state = self.state.lock().unwrap();
        state.records.push(record);
        state.outcome = Some(SessionOutcome::Failed);
    }

    /// Flag the session killed and cancel cooperative work
    pub fn kill(&self) {
        self.token.cancel();
        let mut state = self.state.lock().unwrap();
        if state.outcome.is_none() {
            state.outcome = Some(SessionOutcome::Killed);
        }
    }

    pub fn is_killed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completion data handed back to the lifecycle engine
    pub fn synthesize_data(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        serde_json::json!({
            "statements": state.records,
            "outcome": state.outcome,
        })
    }
}

impl std::fmt::Debug for QuerySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySession")
            .field("action", &self.action_id)
            .field("statements", &self.statements.len())
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}

/// Process-local map of live sessions keyed by action id
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Arc<QuerySession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<QuerySession>) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.action_id().to_string(), session);
    }

    pub fn get(&self, action_id: &ActionId) -> Option<Arc<QuerySession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(&action_id.to_string())
            .cloned()
    }

    pub fn remove(&self, action_id: &ActionId) -> Option<Arc<QuerySession>> {
        self.sessions.lock().unwrap().remove(&action_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ScriptedQueryClient;

    fn session(statements: &[&str]) -> QuerySession {
        QuerySession::new(
            ActionId::new("job-1", "query-node"),
            statements.iter().map(|s| s.to_string()).collect(),
            Arc::new(ScriptedQueryClient::new()),
        )
    }

    #[test]
    fn test_cursor_advances_to_success() {
        let session = session(&["s1", "s2"]);
        assert_eq!(session.cursor(), 0);
        assert!(session.outcome().is_none());

        session.complete_statement(StatementRecord::succeeded(0, "s1", 3));
        assert_eq!(session.cursor(), 1);
        assert!(session.outcome().is_none());

        session.complete_statement(StatementRecord::succeeded(1, "s2", 0));
        assert_eq!(session.outcome(), Some(SessionOutcome::Succeeded));
    }

    #[test]
    fn test_failure_preserves_earlier_records() {
        let session = session(&["s1", "s2"]);
        session.complete_statement(StatementRecord::succeeded(0, "s1", 3));
        session.fail_statement(StatementRecord::failed(1, "s2", "stage st-9 failed"));

        assert_eq!(session.outcome(), Some(SessionOutcome::Failed));
        let records = session.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].succeeded);
        assert_eq!(records[0].rows_affected, Some(3));
        assert!(!records[1].succeeded);
        assert_eq!(records[1].error.as_deref(), Some("stage st-9 failed"));
    }

    #[test]
    fn test_dependency_inversion_marks_upstreams() {
        // Stage graph: c depends on a and b; completion callback for c
        // arrives before any notification for a or b
        let mut graph = StageGraph::new();
        graph.add_edge("c", "a");
        graph.add_edge("c", "b");

        let session = session(&["s1"]);
        let stages: Vec<StageId> = vec!["a".into(), "b".into(), "c".into()];
        session.begin_statement(0, "s1", &stages, &graph);

        session.record_stage(0, &"c".to_string(), StageState::Succeeded);

        assert_eq!(session.stage_status(0, "a"), Some(StageState::Succeeded));
        assert_eq!(session.stage_status(0, "b"), Some(StageState::Succeeded));
        assert!(session.stages_succeeded(0, &stages));
    }

    #[test]
    fn test_inversion_does_not_overwrite_failed_upstream() {
        let mut graph = StageGraph::new();
        graph.add_edge("b", "a");

        let session = session(&["s1"]);
        let stages: Vec<StageId> = vec!["a".into(), "b".into()];
        session.begin_statement(0, "s1", &stages, &graph);

        session.record_stage(0, &"a".to_string(), StageState::Failed);
        session.record_stage(0, &"b".to_string(), StageState::Succeeded);

        assert_eq!(session.stage_status(0, "a"), Some(StageState::Failed));
        assert_eq!(
            session.failed_stage(0, &stages),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_kill_preserves_records() {
        let session = session(&["s1", "s2"]);
        session.complete_statement(StatementRecord::succeeded(0, "s1", 1));
        session.kill();

        assert!(session.is_killed());
        assert_eq!(session.outcome(), Some(SessionOutcome::Killed));
        assert_eq!(session.records().len(), 1);
        assert!(session.token().is_cancelled());
    }

    #[test]
    fn test_synthesize_data() {
        let session = session(&["s1"]);
        session.complete_statement(StatementRecord::succeeded(0, "s1", 7));

        let data = session.synthesize_data();
        assert_eq!(data["outcome"], "SUCCEEDED");
        assert_eq!(data["statements"][0]["rowsAffected"], 7);
        assert_eq!(data["statements"][0]["succeeded"], true);
    }

    #[test]
    fn test_session_manager() {
        let manager = SessionManager::new();
        let session = Arc::new(session(&["s1"]));
        let id = session.action_id().clone();

        manager.insert(session);
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&id).is_some());

        manager.remove(&id);
        assert!(manager.is_empty());
        assert!(manager.get(&id).is_none());
    }
}
