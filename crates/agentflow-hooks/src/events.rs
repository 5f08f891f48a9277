//! Hook event types.

use serde::{Deserialize, Serialize};

/// Events that hooks can subscribe to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// The scheduler loop has started.
    SchedulerStarted,
    /// The scheduler loop has stopped.
    SchedulerStopped,
    /// A due task was handed to the flow engine.
    TaskDispatched {
        task_id: String,
        execution_id: String,
    },
    /// A run finished successfully.
    TaskCompleted {
        task_id: String,
        execution_id: String,
        duration_ms: i64,
    },
    /// A run failed (engine error, timeout, missing flow).
    TaskFailed {
        task_id: String,
        execution_id: String,
        error: String,
    },
    /// A due task was not dispatched.
    TaskSkipped { task_id: String, reason: String },
}

impl SchedulerEvent {
    /// Name used to route the event to subscribers.
    pub fn type_name(&self) -> &'static str {
        match self {
            SchedulerEvent::SchedulerStarted => "scheduler_started",
            SchedulerEvent::SchedulerStopped => "scheduler_stopped",
            SchedulerEvent::TaskDispatched { .. } => "task_dispatched",
            SchedulerEvent::TaskCompleted { .. } => "task_completed",
            SchedulerEvent::TaskFailed { .. } => "task_failed",
            SchedulerEvent::TaskSkipped { .. } => "task_skipped",
        }
    }
}
