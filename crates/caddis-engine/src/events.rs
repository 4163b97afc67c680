//! Engine event stream
//!
//! Events are broadcast to external subscribers — foremost the DAG engine,
//! which consumes `ActionSignal` to advance workflow execution.

use caddis_model::{ActionId, ActionStatus, SignalValue};

/// Event emitted by the lifecycle engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// An action was launched against the external system
    ActionStarted { id: ActionId },

    /// An action reached a terminal status; the DAG engine should advance
    ActionSignal {
        id: ActionId,
        status: ActionStatus,
        signal: SignalValue,
    },

    /// An action was parked for operator intervention
    ActionSuspended { id: ActionId },

    /// A job was suspended because an action escalated to manual
    JobSuspended { job_id: String },

    /// A job failed fatally
    JobFailed { job_id: String },

    /// A job was killed
    JobKilled { job_id: String },
}
