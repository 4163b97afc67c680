//! SLA milestone recording
//!
//! An SLA event is an audit record of an action or job crossing a status
//! milestone, consumed by an external monitoring collaborator behind the
//! `SlaRecorder` trait.

use caddis_model::{ActionId, ActionStatus, JobStatus};
use tracing::info;

/// Milestone kinds recorded by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaMilestone {
    /// First start attempt ran
    ActionStarted,
    /// Action reached a terminal status
    ActionEnded(ActionStatus),
    /// Job reached a terminal status
    JobEnded(JobStatus),
}

/// One milestone crossing
#[derive(Debug, Clone, PartialEq)]
pub struct SlaEvent {
    /// Action id or job id the milestone belongs to
    pub entity_id: String,

    pub milestone: SlaMilestone,

    pub at: chrono::DateTime<chrono::Utc>,
}

impl SlaEvent {
    pub fn action_started(id: &ActionId) -> Self {
        Self {
            entity_id: id.to_string(),
            milestone: SlaMilestone::ActionStarted,
            at: chrono::Utc::now(),
        }
    }

    pub fn action_ended(id: &ActionId, status: ActionStatus) -> Self {
        Self {
            entity_id: id.to_string(),
            milestone: SlaMilestone::ActionEnded(status),
            at: chrono::Utc::now(),
        }
    }

    pub fn job_ended(job_id: &str, status: JobStatus) -> Self {
        Self {
            entity_id: job_id.to_string(),
            milestone: SlaMilestone::JobEnded(status),
            at: chrono::Utc::now(),
        }
    }
}

/// Trait for the external SLA monitoring collaborator
pub trait SlaRecorder: Send + Sync {
    /// Record a milestone crossing
    fn record(&self, event: SlaEvent);
}

/// Default recorder: milestones go to the log
#[derive(Debug, Default, Clone)]
pub struct LogSlaRecorder;

impl SlaRecorder for LogSlaRecorder {
    fn record(&self, event: SlaEvent) {
        info!(entity = %event.entity_id, milestone = ?event.milestone, "sla event");
    }
}

/// A recorder that collects all events (for tests)
#[derive(Debug, Default)]
pub struct CollectingSlaRecorder {
    events: std::sync::Mutex<Vec<SlaEvent>>,
}

impl CollectingSlaRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SlaEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<SlaEvent> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl SlaRecorder for CollectingSlaRecorder {
    fn record(&self, event: SlaEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_recorder() {
        let recorder = CollectingSlaRecorder::new();
        let id = ActionId::new("job-1", "node-a");

        recorder.record(SlaEvent::action_started(&id));
        recorder.record(SlaEvent::action_ended(&id, ActionStatus::Ok));
        recorder.record(SlaEvent::job_ended("job-1", JobStatus::Succeeded));

        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].milestone, SlaMilestone::ActionStarted);
        assert_eq!(
            events[1].milestone,
            SlaMilestone::ActionEnded(ActionStatus::Ok)
        );
        assert_eq!(events[0].entity_id, "job-1@node-a");
        assert_eq!(
            recorder.last().unwrap().milestone,
            SlaMilestone::JobEnded(JobStatus::Succeeded)
        );
    }

    #[test]
    fn test_log_recorder_does_not_panic() {
        let recorder = LogSlaRecorder;
        recorder.record(SlaEvent::job_ended("job-1", JobStatus::Failed));
    }
}
