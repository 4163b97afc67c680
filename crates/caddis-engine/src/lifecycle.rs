//! Lifecycle command handlers
//!
//! Every handler follows the same shape: acquire the owning job's lock,
//! load state, verify the state-machine precondition, invoke the executor
//! hook, interpret the result, and persist all mutations as one bulk
//! update before queueing any follow-up command. A crash between persist
//! and enqueue is recovered by the sweep, which re-dispatches stale
//! pending work.

use crate::command::Command;
use crate::engine::Engine;
use crate::error::{precondition, EngineError, Result};
use crate::events::EngineEvent;
use crate::sla::SlaEvent;
use crate::store::JobUpdate;
use caddis_actions::{ActionExecutor, ErrorType, ExecutorError, ExecutorFault};
use caddis_model::{ActionId, ActionStatus, JobStatus, SignalValue, WorkflowAction, WorkflowJob};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which lifecycle hook failed, selecting the retry and manual targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Check,
    End,
}

impl Phase {
    fn retry_state(self) -> ActionStatus {
        match self {
            Phase::Start => ActionStatus::StartRetry,
            Phase::Check => ActionStatus::Running,
            Phase::End => ActionStatus::EndRetry,
        }
    }

    fn manual_state(self) -> ActionStatus {
        match self {
            Phase::Start | Phase::Check => ActionStatus::StartManual,
            Phase::End => ActionStatus::EndManual,
        }
    }

    fn command(self, id: &ActionId) -> Command {
        match self {
            Phase::Start => Command::start(id),
            Phase::Check => Command::check(id),
            Phase::End => Command::end(id),
        }
    }
}

impl Engine {
    /// Launch an action against its external system
    pub(crate) async fn handle_start(&self, id: &ActionId) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;

        precondition(action.pending, format!("action {id} is not pending"))?;
        precondition(
            action.status.start_allowed(),
            format!("action {id} in status {} is not startable", action.status),
        )?;
        precondition(
            job.is_running(),
            format!("job {} is {}", job.id, job.status),
        )?;

        let executor = self.executor_for(&action)?;
        let mut ctx = self.context_for(&job, &action);

        if action.started_at.is_none() {
            action.started_at = Some(chrono::Utc::now());
            self.sla().record(SlaEvent::action_started(&action.id));
        }

        match executor.start(&mut ctx, &mut action).await {
            Ok(()) => {
                if let Some(exec) = ctx.execution_data().cloned() {
                    // Synchronous completion: straight to DONE
                    action.clear_error();
                    action.retries = 0;
                    action.external_status = Some(exec.external_status);
                    if let Some(data) = exec.data {
                        action.data = Some(data);
                    }
                    action.transition(ActionStatus::Done)?;
                    action.touch();
                    job.touch();
                    self.store()
                        .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                        .await?;
                    self.emit(EngineEvent::ActionStarted { id: id.clone() });
                    self.queue_or_log(Command::end(id));
                } else if let Some(start) = ctx.start_data().cloned() {
                    // Asynchronous completion: poll until a check succeeds
                    action.clear_error();
                    action.retries = 0;
                    action.external_id = Some(start.external_id);
                    action.external_status = Some(start.external_status);
                    action.transition(ActionStatus::Running)?;
                    action.touch();
                    job.touch();
                    self.store()
                        .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                        .await?;
                    self.emit(EngineEvent::ActionStarted { id: id.clone() });
                    self.queue_delayed(Command::check(id), self.config().check_interval());
                } else {
                    let err = ExecutorError::failed(
                        "START_DATA_MISSING",
                        format!(
                            "executor '{}' returned without start or execution data",
                            action.action_type
                        ),
                    );
                    return self.fail_job(job, action, err).await;
                }
                Ok(())
            }
            Err(fault) => {
                self.handle_failure(job, action, &executor, fault, Phase::Start)
                    .await
            }
        }
    }

    /// Poll an asynchronously completing action
    pub(crate) async fn handle_check(&self, id: &ActionId) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;

        precondition(action.pending, format!("action {id} is not pending"))?;
        precondition(
            action.status == ActionStatus::Running,
            format!("action {id} in status {} is not checkable", action.status),
        )?;
        precondition(
            job.is_running() || job.is_suspended(),
            format!("job {} is {}", job.id, job.status),
        )?;

        let executor = self.executor_for(&action)?;
        let mut ctx = self.context_for(&job, &action);

        match executor.check(&mut ctx, &mut action).await {
            Ok(()) => {
                if let Some(exec) = ctx.execution_data().cloned() {
                    action.clear_error();
                    action.retries = 0;
                    action.external_status = Some(exec.external_status);
                    if let Some(data) = exec.data {
                        action.data = Some(data);
                    }
                    action.transition(ActionStatus::Done)?;
                    action.touch();
                    job.touch();
                    self.store()
                        .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                        .await?;
                    self.queue_or_log(Command::end(id));
                } else {
                    // Still in progress: record the external status and
                    // re-arm the poll
                    if let Some(status) = ctx.external_status() {
                        action.external_status = Some(status.to_string());
                    }
                    action.touch();
                    self.store()
                        .bulk_update(JobUpdate::new().with_action(action))
                        .await?;
                    self.queue_delayed(Command::check(id), self.config().check_interval());
                }
                Ok(())
            }
            Err(fault) => {
                self.handle_failure(job, action, &executor, fault, Phase::Check)
                    .await
            }
        }
    }

    /// Finalize a completed action with a terminal status
    pub(crate) async fn handle_end(&self, id: &ActionId) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;

        precondition(action.pending, format!("action {id} is not pending"))?;
        precondition(
            action.status.end_allowed(),
            format!("action {id} in status {} is not endable", action.status),
        )?;
        precondition(
            job.is_running(),
            format!("job {} is {}", job.id, job.status),
        )?;

        let executor = self.executor_for(&action)?;
        let mut ctx = self.context_for(&job, &action);

        match executor.end(&mut ctx, &mut action).await {
            Ok(()) => match ctx.end_data().copied() {
                Some(end) if end.status.is_terminal() => {
                    self.finalize_terminal(job, action, end.status, end.signal, &executor)
                        .await
                }
                Some(end) => {
                    let err = ExecutorError::failed(
                        "END_DATA_INVALID",
                        format!("end hook set non-terminal status {}", end.status),
                    );
                    self.fail_job(job, action, err).await
                }
                None => {
                    let err = ExecutorError::failed(
                        "END_DATA_MISSING",
                        format!(
                            "executor '{}' returned without end data",
                            action.action_type
                        ),
                    );
                    self.fail_job(job, action, err).await
                }
            },
            Err(fault) => {
                self.handle_failure(job, action, &executor, fault, Phase::End)
                    .await
            }
        }
    }

    /// Park an action for operator intervention
    pub(crate) async fn handle_suspend(&self, id: &ActionId) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;

        precondition(
            !action.status.is_terminal(),
            format!("action {id} already terminal"),
        )?;

        if action.status != ActionStatus::StartManual {
            action.transition(ActionStatus::StartManual)?;
        }
        action.pending = false;
        action.touch();
        job.touch();
        self.store()
            .bulk_update(JobUpdate::new().with_job(job).with_action(action))
            .await?;
        self.emit(EngineEvent::ActionSuspended { id: id.clone() });
        Ok(())
    }

    /// Un-park a manually parked action
    ///
    /// When the action sits on the job's live execution head it restarts
    /// in place; otherwise it resets to `Prep` for re-evaluation by the
    /// DAG engine. Resuming also un-suspends a job that was suspended by
    /// the action's manual escalation.
    pub(crate) async fn handle_resume(&self, id: &ActionId) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;

        precondition(
            action.status == ActionStatus::StartManual,
            format!("action {id} in status {} is not resumable", action.status),
        )?;
        precondition(
            job.is_running() || job.is_suspended(),
            format!("job {} is {}", job.id, job.status),
        )?;

        if job.is_suspended() {
            job.status = JobStatus::Running;
        }
        action.clear_error();

        if job.is_execution_head(&action.id.name) {
            action.pending = true;
            action.touch();
            job.touch();
            self.store()
                .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                .await?;
            self.queue_or_log(Command::start(id));
        } else {
            action.transition(ActionStatus::Prep)?;
            action.pending = false;
            action.touch();
            job.touch();
            self.store()
                .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                .await?;
            debug!(action = %id, "action reset to prep for dag re-evaluation");
        }
        Ok(())
    }

    /// Apply operator attribute updates to a parked action
    pub(crate) async fn handle_update(
        &self,
        id: &ActionId,
        attrs: &HashMap<String, String>,
    ) -> Result<()> {
        let lock = self.store().job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut action = self.load_action(id).await?;
        precondition(
            matches!(action.status, ActionStatus::StartManual | ActionStatus::Prep),
            format!("action {id} in status {} is not updatable", action.status),
        )?;

        let executor = self.executor_for(&action)?;
        executor
            .update_attributes(&mut action, attrs)
            .map_err(|fault| {
                EngineError::Executor(self.errors().resolve(&action.action_type, fault))
            })?;

        action.touch();
        self.store()
            .bulk_update(JobUpdate::new().with_action(action))
            .await?;
        info!(action = %id, "action attributes updated");
        Ok(())
    }

    /// Notify the DAG engine of a terminal action status
    pub(crate) async fn handle_signal(&self, id: &ActionId) -> Result<()> {
        let action = self.load_action(id).await?;
        let signal = action.signal_value.unwrap_or(SignalValue::Error);
        info!(action = %id, status = %action.status, signal = ?signal, "signaling dag engine");
        self.emit(EngineEvent::ActionSignal {
            id: id.clone(),
            status: action.status,
            signal,
        });
        Ok(())
    }

    /// Kill a job and every non-terminal action in it
    pub(crate) async fn handle_kill_job(&self, job_id: &str) -> Result<()> {
        let lock = self.store().job_lock(job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(job_id).await?;
        precondition(!job.is_terminal(), format!("job {job_id} already terminal"))?;

        let now = chrono::Utc::now();
        let mut update = JobUpdate::new();
        for mut action in self.store().actions_for_job(job_id).await? {
            if action.status.is_terminal() {
                continue;
            }
            self.kill_action_best_effort(&job, &mut action).await;
            action.transition(ActionStatus::Killed)?;
            action.pending = false;
            action.ended_at = Some(now);
            self.sla()
                .record(SlaEvent::action_ended(&action.id, ActionStatus::Killed));
            update.actions.push(action);
        }

        job.status = JobStatus::Killed;
        job.touch();
        self.sla()
            .record(SlaEvent::job_ended(&job.id, JobStatus::Killed));
        update.job = Some(job);
        self.store().bulk_update(update).await?;

        self.emit(EngineEvent::JobKilled {
            job_id: job_id.to_string(),
        });
        Ok(())
    }

    /// Branch on the classified error type of a failed hook
    async fn handle_failure(
        &self,
        mut job: WorkflowJob,
        mut action: WorkflowAction,
        executor: &Arc<dyn ActionExecutor>,
        fault: ExecutorFault,
        phase: Phase,
    ) -> Result<()> {
        let err = self.errors().resolve(&action.action_type, fault);
        warn!(
            action = %action.id,
            phase = ?phase,
            error_type = %err.error_type,
            code = %err.code,
            "executor failure"
        );
        action.set_error(&err.code, &err.message);

        match err.error_type {
            ErrorType::Transient => {
                let policy = self.config().retry_policy(&job, executor.as_ref());
                if action.retries < policy.max_retries {
                    action.retries += 1;
                    if action.status != phase.retry_state() {
                        action.transition(phase.retry_state())?;
                    }
                    action.touch();
                    job.touch();
                    let id = action.id.clone();
                    self.store()
                        .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                        .await?;
                    self.queue_delayed(phase.command(&id), policy.interval);
                    Ok(())
                } else {
                    action.retries = 0;
                    self.escalate_manual(job, action, executor, phase).await
                }
            }
            ErrorType::NonTransient => self.escalate_manual(job, action, executor, phase).await,
            ErrorType::Error => match phase {
                Phase::Start | Phase::Check => {
                    // Soft failure: force DONE with an error signal so the
                    // DAG's error-handling edge can run
                    action.signal_value = Some(SignalValue::Error);
                    if action.external_status.is_none() {
                        action.external_status = Some("ERROR".to_string());
                    }
                    if action.status != ActionStatus::Done {
                        action.transition(ActionStatus::Done)?;
                    }
                    action.touch();
                    job.touch();
                    let id = action.id.clone();
                    self.store()
                        .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                        .await?;
                    self.queue_or_log(Command::end(&id));
                    Ok(())
                }
                Phase::End => {
                    self.finalize_terminal(
                        job,
                        action,
                        ActionStatus::Error,
                        SignalValue::Error,
                        executor,
                    )
                    .await
                }
            },
            ErrorType::Failed => self.fail_job(job, action, err).await,
        }
    }

    /// Park the action in the phase's manual state, suspending the job
    /// unless the executor opts out
    async fn escalate_manual(
        &self,
        mut job: WorkflowJob,
        mut action: WorkflowAction,
        executor: &Arc<dyn ActionExecutor>,
        phase: Phase,
    ) -> Result<()> {
        if action.status != phase.manual_state() {
            action.transition(phase.manual_state())?;
        }
        action.pending = false;
        action.touch();

        if executor.suspends_job_on_error() && job.is_running() {
            job.status = JobStatus::Suspended;
            self.emit(EngineEvent::JobSuspended {
                job_id: job.id.clone(),
            });
        }
        job.touch();

        let id = action.id.clone();
        let status = action.status;
        self.store()
            .bulk_update(JobUpdate::new().with_job(job).with_action(action))
            .await?;
        warn!(action = %id, status = %status, "action escalated to manual");
        self.emit(EngineEvent::ActionSuspended { id });
        Ok(())
    }

    /// Write a terminal status, record the SLA milestone and signal the
    /// DAG engine — or route through a user-level retry when one remains
    async fn finalize_terminal(
        &self,
        mut job: WorkflowJob,
        mut action: WorkflowAction,
        status: ActionStatus,
        signal: SignalValue,
        executor: &Arc<dyn ActionExecutor>,
    ) -> Result<()> {
        if matches!(status, ActionStatus::Error | ActionStatus::Failed)
            && action.user_retry_available()
        {
            let policy = self.config().retry_policy(&job, executor.as_ref());
            action.user_retries += 1;
            action.transition(ActionStatus::UserRetry)?;
            action.pending = true;
            action.touch();
            job.touch();
            let id = action.id.clone();
            let attempt = action.user_retries;
            self.store()
                .bulk_update(JobUpdate::new().with_job(job).with_action(action))
                .await?;
            info!(action = %id, attempt, "user retry scheduled");
            self.queue_delayed(Command::start(&id), policy.interval);
            return Ok(());
        }

        if status == ActionStatus::Failed {
            let err = ExecutorError::failed(
                action
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "ACTION_FAILED".to_string()),
                action
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "action finished with FAILED status".to_string()),
            );
            return self.fail_job(job, action, err).await;
        }

        action.transition(status)?;
        action.signal_value = Some(signal);
        action.pending = false;
        action.retries = 0;
        action.ended_at = Some(chrono::Utc::now());
        action.touch();
        job.touch();
        self.sla().record(SlaEvent::action_ended(&action.id, status));

        let id = action.id.clone();
        self.store()
            .bulk_update(JobUpdate::new().with_job(job).with_action(action))
            .await?;
        info!(action = %id, status = %status, "action finalized");
        self.queue_or_log(Command::signal(&id));
        Ok(())
    }

    /// Fatal failure: fail the action, kill its live siblings, fail the job
    pub(crate) async fn fail_job(
        &self,
        mut job: WorkflowJob,
        mut action: WorkflowAction,
        err: ExecutorError,
    ) -> Result<()> {
        warn!(job = %job.id, action = %action.id, code = %err.code, "failing job");

        action.set_error(&err.code, &err.message);
        if !action.status.is_terminal() {
            action.transition(ActionStatus::Failed)?;
        }
        action.signal_value = Some(SignalValue::Error);
        action.pending = false;
        let now = chrono::Utc::now();
        action.ended_at = Some(now);
        action.touch();

        let mut update = JobUpdate::new();
        for mut sibling in self.store().actions_for_job(&job.id).await? {
            if sibling.id == action.id || sibling.status.is_terminal() {
                continue;
            }
            self.kill_action_best_effort(&job, &mut sibling).await;
            sibling.transition(ActionStatus::Killed)?;
            sibling.pending = false;
            sibling.ended_at = Some(now);
            self.sla()
                .record(SlaEvent::action_ended(&sibling.id, ActionStatus::Killed));
            update.actions.push(sibling);
        }

        job.status = JobStatus::Failed;
        job.touch();
        self.sla()
            .record(SlaEvent::action_ended(&action.id, ActionStatus::Failed));
        self.sla()
            .record(SlaEvent::job_ended(&job.id, JobStatus::Failed));

        let job_id = job.id.clone();
        let action_id = action.id.clone();
        update.job = Some(job);
        update.actions.push(action);
        self.store().bulk_update(update).await?;

        self.emit(EngineEvent::JobFailed { job_id });
        self.queue_or_log(Command::signal(&action_id));
        Ok(())
    }

    /// Invoke the executor's kill hook, logging failures instead of
    /// propagating them: the kill path must not itself fail the job
    async fn kill_action_best_effort(&self, job: &WorkflowJob, action: &mut WorkflowAction) {
        if let Ok(executor) = self.executor_for(action) {
            let mut ctx = self.context_for(job, action);
            if let Err(fault) = executor.kill(&mut ctx, action).await {
                warn!(action = %action.id, error = %fault, "kill failed, ignoring");
            }
        }
    }
}
