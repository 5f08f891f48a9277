//! Execution record lifecycle: running → completed | error.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use serde_json::{Map, Value};

use agentflow_storage::SchedulerStorage;
use agentflow_types::{
    ExecutionLog, ExecutionStatus, LogLevel, ScheduledTask, ScheduledTaskExecution,
};

use crate::adapter::LogSink;
use crate::error::{Result, SchedulerError};

/// Creates, finalizes and prunes execution records.
pub struct ExecutionRecorder {
    storage: Arc<SchedulerStorage>,
}

impl ExecutionRecorder {
    pub fn new(storage: Arc<SchedulerStorage>) -> Self {
        Self { storage }
    }

    /// Allocate a `running` record and persist it before the flow starts, so
    /// a crash mid-run leaves a visible record behind.
    pub async fn begin(&self, task: &ScheduledTask) -> Result<ScheduledTaskExecution> {
        let record = ScheduledTaskExecution::begin(task);
        self.storage.save_execution(&record).await?;
        Ok(record)
    }

    /// Mark a running record as completed.
    pub async fn complete(
        &self,
        record: &mut ScheduledTaskExecution,
        outputs: Map<String, Value>,
        logs: Vec<ExecutionLog>,
    ) -> Result<()> {
        finish(record, ExecutionStatus::Completed)?;
        record.outputs = Some(outputs);
        record.logs = logs;
        self.storage.save_execution(record).await?;
        Ok(())
    }

    /// Mark a running record as failed.
    pub async fn fail(
        &self,
        record: &mut ScheduledTaskExecution,
        error: &str,
        logs: Vec<ExecutionLog>,
    ) -> Result<()> {
        finish(record, ExecutionStatus::Error)?;
        record.error = Some(error.to_string());
        record.logs = logs;
        self.storage.save_execution(record).await?;
        Ok(())
    }

    /// Delete all but the `max_count` newest records of a task.
    pub async fn retain(&self, task_id: &str, max_count: usize) -> Result<usize> {
        let deleted = self
            .storage
            .cleanup_old_executions(task_id, max_count)
            .await?;
        if deleted > 0 {
            tracing::debug!(task_id, deleted, "Pruned old execution records");
        }
        Ok(deleted)
    }
}

fn finish(record: &mut ScheduledTaskExecution, status: ExecutionStatus) -> Result<()> {
    if record.status.is_terminal() {
        return Err(SchedulerError::InvalidTransition {
            id: record.id.clone(),
            status: record.status,
        });
    }
    let end = Utc::now();
    record.status = status;
    record.end_time = Some(end);
    record.duration = Some((end - record.start_time).num_milliseconds());
    Ok(())
}

/// Append-only log buffer filled by the engine's log callback.
#[derive(Clone, Default)]
pub struct LogCollector {
    entries: Arc<Mutex<Vec<ExecutionLog>>>,
}

impl LogCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, log: ExecutionLog) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(log);
    }

    /// Callback that records every log event for `task_id`.
    pub fn sink(&self, task_id: &str) -> LogSink {
        let collector = self.clone();
        let task_id = task_id.to_string();
        Arc::new(move |log: ExecutionLog| {
            if log.level == LogLevel::Error {
                tracing::warn!(task_id = %task_id, node = ?log.node_name, "{}", log.message);
            } else {
                tracing::debug!(task_id = %task_id, node = ?log.node_name, "{}", log.message);
            }
            collector.push(log);
        })
    }

    /// Append `logs` not already seen through the callback.
    pub fn merge(&self, logs: Vec<ExecutionLog>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let seen: HashSet<String> = entries.iter().map(|l| l.id.clone()).collect();
        entries.extend(logs.into_iter().filter(|l| !seen.contains(&l.id)));
    }

    pub fn snapshot(&self) -> Vec<ExecutionLog> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
