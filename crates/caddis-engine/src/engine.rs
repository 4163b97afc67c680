//! Engine wiring and command dispatch
//!
//! The engine owns the scheduler, the delay queue and the injected
//! collaborators (store gateway, executor registry, error registry, SLA
//! recorder). A fixed pool of workers drains the scheduler and dispatches
//! each command to its lifecycle handler by pattern matching.

use crate::command::{Command, CommandKind};
use crate::config::EngineConfig;
use crate::delay::DelayQueue;
use crate::error::{precondition, EngineError, Result};
use crate::events::EngineEvent;
use crate::scheduler::CommandScheduler;
use crate::sla::{LogSlaRecorder, SlaRecorder};
use crate::store::{JobStateStore, JobUpdate};
use caddis_actions::{ActionContext, ActionExecutor, ErrorRegistry, ExecutorRegistry};
use caddis_model::{ActionId, ActionStatus, JobStatus, WorkflowAction, WorkflowJob};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The action lifecycle engine
pub struct Engine {
    store: Arc<dyn JobStateStore>,
    executors: Arc<ExecutorRegistry>,
    errors: Arc<ErrorRegistry>,
    scheduler: CommandScheduler,
    delay: DelayQueue,
    events: broadcast::Sender<EngineEvent>,
    sla: Arc<dyn SlaRecorder>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create an engine with fresh queues sized from the configuration
    pub fn new(
        store: Arc<dyn JobStateStore>,
        executors: Arc<ExecutorRegistry>,
        errors: Arc<ErrorRegistry>,
        config: EngineConfig,
    ) -> Self {
        let scheduler = CommandScheduler::new(config.scheduler.capacity);
        Self::with_queues(store, executors, errors, config, scheduler, DelayQueue::new())
    }

    /// Create an engine around externally constructed queues
    ///
    /// Subsystems that schedule their own work (the query bridge) hold
    /// clones of the same queues, so those must exist before the executor
    /// registry is built.
    pub fn with_queues(
        store: Arc<dyn JobStateStore>,
        executors: Arc<ExecutorRegistry>,
        errors: Arc<ErrorRegistry>,
        config: EngineConfig,
        scheduler: CommandScheduler,
        delay: DelayQueue,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            store,
            executors,
            errors,
            scheduler,
            delay,
            events,
            sla: Arc::new(LogSlaRecorder),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the default SLA recorder
    pub fn with_sla_recorder(mut self, recorder: Arc<dyn SlaRecorder>) -> Self {
        self.sla = recorder;
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Handle to the ready-command queue
    pub fn scheduler(&self) -> CommandScheduler {
        self.scheduler.clone()
    }

    /// Handle to the delay queue
    pub fn delay_queue(&self) -> DelayQueue {
        self.delay.clone()
    }

    /// The store gateway
    pub fn store(&self) -> &Arc<dyn JobStateStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Recover persisted state, then spawn the worker pool, the delay
    /// drain loop and the recovery sweep
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.recover_on_start().await?;

        for worker in 0..self.config.scheduler.workers {
            let engine = Arc::clone(self);
            let token = self.shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let cmd = tokio::select! {
                        _ = token.cancelled() => break,
                        cmd = engine.scheduler.next() => cmd,
                    };
                    engine.dispatch(cmd).await;
                }
                debug!(worker, "command worker stopped");
            });
        }

        tokio::spawn(
            self.delay
                .clone()
                .run_drain(self.scheduler.clone(), self.shutdown.clone()),
        );

        if self.config.recovery.enabled {
            let engine = Arc::clone(self);
            let token = self.shutdown.clone();
            let interval = Duration::from_secs(self.config.recovery.interval_secs);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = engine.sweep().await {
                                warn!(error = %e, "recovery sweep failed");
                            }
                        }
                    }
                }
            });
        }

        info!(
            workers = self.config.scheduler.workers,
            executors = ?self.executors.action_types(),
            "lifecycle engine started"
        );
        Ok(())
    }

    /// Stop the worker pool and background loops
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Enqueue a command on the ready queue
    pub fn queue(&self, cmd: Command) -> Result<bool> {
        self.scheduler.queue(cmd)
    }

    /// Enqueue a command to become ready after `delay`
    pub fn queue_delayed(&self, cmd: Command, delay: Duration) -> bool {
        self.delay.push(cmd, delay)
    }

    /// Enqueue, tolerating rejection: the triggering event source is
    /// responsible for re-raising dropped work
    pub(crate) fn queue_or_log(&self, cmd: Command) {
        let key = cmd.key.clone();
        match self.scheduler.queue(cmd) {
            Ok(true) => {}
            Ok(false) => debug!(key = %key, "command coalesced"),
            Err(e) => warn!(key = %key, error = %e, "command rejected"),
        }
    }

    /// Run one command to completion
    pub(crate) async fn dispatch(&self, cmd: Command) {
        let Command { key, kind, .. } = cmd;
        let name = kind.name();
        let result = match kind {
            CommandKind::Start(id) => self.handle_start(&id).await,
            CommandKind::Check(id) => self.handle_check(&id).await,
            CommandKind::End(id) => self.handle_end(&id).await,
            CommandKind::Suspend(id) => self.handle_suspend(&id).await,
            CommandKind::Resume(id) => self.handle_resume(&id).await,
            CommandKind::Update { id, attrs } => self.handle_update(&id, &attrs).await,
            CommandKind::Signal(id) => self.handle_signal(&id).await,
            CommandKind::KillJob(job_id) => self.handle_kill_job(&job_id).await,
            CommandKind::Task { task, .. } => {
                task().await;
                Ok(())
            }
        };
        match result {
            Ok(()) => {}
            Err(EngineError::Precondition(msg)) => {
                debug!(command = name, key = %key, "command skipped: {msg}");
            }
            Err(e) => error!(command = name, key = %key, error = %e, "command failed"),
        }
    }

    /// External callback entry point
    ///
    /// Consults the executor's `is_completed` predicate and, when it holds,
    /// queues a prioritized check command; otherwise only records the
    /// externally reported status.
    pub async fn callback(
        &self,
        id: &ActionId,
        external_status: &str,
        data: Option<serde_json::Value>,
    ) -> Result<()> {
        let lock = self.store.job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut action = self.load_action(id).await?;
        precondition(
            action.status == ActionStatus::Running,
            format!("callback for action in status {}", action.status),
        )?;

        let executor = self.executor_for(&action)?;
        let completed = executor.is_completed(
            action.external_id.as_deref().unwrap_or_default(),
            external_status,
            data.as_ref(),
        );

        action.external_status = Some(external_status.to_string());
        if let Some(data) = data {
            action.data = Some(data);
        }
        action.touch();
        self.store
            .bulk_update(JobUpdate::new().with_action(action))
            .await?;

        if completed {
            self.queue_or_log(Command::check(id).with_priority(crate::command::PRIORITY_END));
        }
        Ok(())
    }

    /// Re-derive in-flight work from the store after a restart
    ///
    /// Running actions whose executor depends on process-local session
    /// state are forced to manual instead of silently resumed.
    pub(crate) async fn recover_on_start(self: &Arc<Self>) -> Result<()> {
        let pending = self
            .store
            .pending_actions(chrono::Utc::now(), usize::MAX)
            .await?;
        for action in pending {
            if action.status == ActionStatus::Running {
                let uses_session = self
                    .executors
                    .get(&action.action_type)
                    .map(|e| e.uses_session())
                    .unwrap_or(false);
                if uses_session {
                    warn!(action = %action.id, "session-backed action found running at startup, forcing manual");
                    if let Err(e) = self.force_manual(&action.id).await {
                        warn!(action = %action.id, error = %e, "failed to force manual");
                    }
                    continue;
                }
            }
            self.redispatch(&action);
        }
        Ok(())
    }

    /// Periodic sweep: re-dispatch pending work with no recent progress
    pub(crate) async fn sweep(&self) -> Result<()> {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::seconds(self.config.recovery.stale_after_secs as i64);
        let stale = self.store.pending_actions(cutoff, 1000).await?;
        if !stale.is_empty() {
            debug!(count = stale.len(), "recovery sweep re-dispatching stale work");
        }
        for action in stale {
            self.redispatch(&action);
        }
        Ok(())
    }

    /// Queue the command a pending action's status implies
    fn redispatch(&self, action: &WorkflowAction) {
        let cmd = match action.status {
            ActionStatus::Prep
            | ActionStatus::StartRetry
            | ActionStatus::UserRetry => Command::start(&action.id),
            ActionStatus::Running => Command::check(&action.id),
            ActionStatus::Done | ActionStatus::EndRetry => Command::end(&action.id),
            // Manual and terminal states hold no scheduled work
            _ => return,
        };
        self.queue_or_log(cmd);
    }

    /// Force a running action to manual after its session was lost
    async fn force_manual(&self, id: &ActionId) -> Result<()> {
        let lock = self.store.job_lock(&id.job_id);
        let _guard = lock.lock().await;

        let mut job = self.load_job(&id.job_id).await?;
        let mut action = self.load_action(id).await?;
        if action.status.is_terminal() {
            return Ok(());
        }

        action.transition(ActionStatus::StartManual)?;
        action.pending = false;
        action.set_error(
            "SESSION_LOST",
            "in-memory session not recoverable after restart",
        );
        action.touch();

        let suspends = self
            .executors
            .get(&action.action_type)
            .map(|e| e.suspends_job_on_error())
            .unwrap_or(true);
        if suspends && job.is_running() {
            job.status = JobStatus::Suspended;
            self.emit(EngineEvent::JobSuspended {
                job_id: job.id.clone(),
            });
        }
        job.touch();

        let id = action.id.clone();
        self.store
            .bulk_update(JobUpdate::new().with_job(job).with_action(action))
            .await?;
        self.emit(EngineEvent::ActionSuspended { id });
        Ok(())
    }

    pub(crate) async fn load_job(&self, job_id: &str) -> Result<WorkflowJob> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))
    }

    pub(crate) async fn load_action(&self, id: &ActionId) -> Result<WorkflowAction> {
        self.store
            .get_action(id)
            .await?
            .ok_or_else(|| EngineError::ActionNotFound(id.to_string()))
    }

    pub(crate) fn executor_for(&self, action: &WorkflowAction) -> Result<Arc<dyn ActionExecutor>> {
        self.executors
            .get(&action.action_type)
            .ok_or_else(|| EngineError::ExecutorMissing(action.action_type.clone()))
    }

    pub(crate) fn context_for(&self, job: &WorkflowJob, action: &WorkflowAction) -> ActionContext {
        let callback_base = self
            .config
            .callback_url_base
            .replace("{id}", &action.id.to_string());
        ActionContext::new(job.clone())
            .with_retrying(action.retries > 0)
            .with_callback_url_base(callback_base)
    }

    pub(crate) fn sla(&self) -> &Arc<dyn SlaRecorder> {
        &self.sla
    }

    pub(crate) fn errors(&self) -> &Arc<ErrorRegistry> {
        &self.errors
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("executors", &self.executors.action_types())
            .field("scheduler", &self.scheduler)
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}
