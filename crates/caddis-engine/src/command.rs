//! Schedulable units of lifecycle work
//!
//! Commands are a closed set of tagged variants dispatched through the
//! scheduler's runner loop by pattern matching. Each variant holds only the
//! data it needs to resume work after a crash: an action id, never live
//! state. The `Task` variant carries boxed async work so subsystems (the
//! query bridge) can run their own steps on the same scheduler.

use caddis_model::ActionId;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;

/// Priority for polling checks and background tasks
pub const PRIORITY_CHECK: u8 = 0;
/// Priority for start/resume/update work
pub const PRIORITY_START: u8 = 1;
/// Priority for finalization (end, signal, callback-triggered checks)
pub const PRIORITY_END: u8 = 2;
/// Priority for suspend/kill control work
pub const PRIORITY_CONTROL: u8 = 3;

/// Boxed async work carried by `CommandKind::Task`
pub type BoxedTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The closed set of command variants
pub enum CommandKind {
    /// Launch an action (from `Prep` or a retry/manual/user-retry state)
    Start(ActionId),
    /// Poll an asynchronously completing action
    Check(ActionId),
    /// Finalize a completed action
    End(ActionId),
    /// Park an action for operator intervention
    Suspend(ActionId),
    /// Un-park a manually parked action
    Resume(ActionId),
    /// Apply operator attribute updates to a parked action
    Update {
        id: ActionId,
        attrs: HashMap<String, String>,
    },
    /// Notify the DAG engine of a terminal action status
    Signal(ActionId),
    /// Kill a job and every non-terminal action in it
    KillJob(String),
    /// Generic async work sharing the scheduler's worker pool
    Task { label: String, task: BoxedTask },
}

impl CommandKind {
    /// Stable variant name for logging
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Start(_) => "start",
            CommandKind::Check(_) => "check",
            CommandKind::End(_) => "end",
            CommandKind::Suspend(_) => "suspend",
            CommandKind::Resume(_) => "resume",
            CommandKind::Update { .. } => "update",
            CommandKind::Signal(_) => "signal",
            CommandKind::KillJob(_) => "kill-job",
            CommandKind::Task { .. } => "task",
        }
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Update { id, attrs } => f
                .debug_struct("Update")
                .field("id", id)
                .field("attrs", attrs)
                .finish(),
            CommandKind::Task { label, .. } => {
                f.debug_struct("Task").field("label", label).finish_non_exhaustive()
            }
            CommandKind::KillJob(job) => f.debug_tuple("KillJob").field(job).finish(),
            other => {
                let id = match other {
                    CommandKind::Start(id)
                    | CommandKind::Check(id)
                    | CommandKind::End(id)
                    | CommandKind::Suspend(id)
                    | CommandKind::Resume(id)
                    | CommandKind::Signal(id) => id,
                    _ => unreachable!(),
                };
                f.debug_tuple(match other {
                    CommandKind::Start(_) => "Start",
                    CommandKind::Check(_) => "Check",
                    CommandKind::End(_) => "End",
                    CommandKind::Suspend(_) => "Suspend",
                    CommandKind::Resume(_) => "Resume",
                    _ => "Signal",
                })
                .field(id)
                .finish()
            }
        }
    }
}

/// A schedulable unit of work
///
/// The logical key deduplicates queued work: two commands with the same
/// key coalesce in the scheduler and in the delay queue.
#[derive(Debug)]
pub struct Command {
    /// Logical dedup key
    pub key: String,

    /// Queue ordering among ready items (higher runs first)
    pub priority: u8,

    pub kind: CommandKind,
}

impl Command {
    pub fn start(id: &ActionId) -> Self {
        Self {
            key: format!("start-{id}"),
            priority: PRIORITY_START,
            kind: CommandKind::Start(id.clone()),
        }
    }

    pub fn check(id: &ActionId) -> Self {
        Self {
            key: format!("check-{id}"),
            priority: PRIORITY_CHECK,
            kind: CommandKind::Check(id.clone()),
        }
    }

    pub fn end(id: &ActionId) -> Self {
        Self {
            key: format!("end-{id}"),
            priority: PRIORITY_END,
            kind: CommandKind::End(id.clone()),
        }
    }

    pub fn suspend(id: &ActionId) -> Self {
        Self {
            key: format!("suspend-{id}"),
            priority: PRIORITY_CONTROL,
            kind: CommandKind::Suspend(id.clone()),
        }
    }

    pub fn resume(id: &ActionId) -> Self {
        Self {
            key: format!("resume-{id}"),
            priority: PRIORITY_START,
            kind: CommandKind::Resume(id.clone()),
        }
    }

    pub fn update(id: &ActionId, attrs: HashMap<String, String>) -> Self {
        Self {
            key: format!("update-{id}"),
            priority: PRIORITY_START,
            kind: CommandKind::Update {
                id: id.clone(),
                attrs,
            },
        }
    }

    pub fn signal(id: &ActionId) -> Self {
        Self {
            key: format!("signal-{id}"),
            priority: PRIORITY_END,
            kind: CommandKind::Signal(id.clone()),
        }
    }

    pub fn kill_job(job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            key: format!("kill-job-{job_id}"),
            priority: PRIORITY_CONTROL,
            kind: CommandKind::KillJob(job_id),
        }
    }

    /// Wrap arbitrary async work for the scheduler's worker pool
    pub fn task<F>(label: impl Into<String>, fut: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let label = label.into();
        Self {
            key: format!("task-{label}"),
            priority: PRIORITY_CHECK,
            kind: CommandKind::Task {
                label,
                task: Box::new(move || -> BoxFuture<'static, ()> { Box::pin(fut) }),
            },
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}
