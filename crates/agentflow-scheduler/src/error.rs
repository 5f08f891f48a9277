use std::time::Duration;

use agentflow_storage::StorageError;
use agentflow_types::ExecutionStatus;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid task: {0}")]
    Validation(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("Flow not found: {0}")]
    FlowNotFound(String),
    #[error("Flow engine error: {0}")]
    Engine(String),
    #[error("Flow execution timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("Task {0} is already running")]
    AlreadyRunning(String),
    #[error("Execution {id} is already {status}")]
    InvalidTransition { id: String, status: ExecutionStatus },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
