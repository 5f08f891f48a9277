use rusqlite::OptionalExtension;

use agentflow_types::{ExecutionStatus, ScheduledTaskExecution};

use crate::{Result, SchedulerStorage, decode_all, decode_opt, encode, query_data};

impl SchedulerStorage {
    // ─── Execution Records ───────────────────────────────────

    /// Insert or replace an execution record.
    pub async fn save_execution(&self, execution: &ScheduledTaskExecution) -> Result<()> {
        let data = encode(execution)?;
        let id = execution.id.clone();
        let task_id = execution.task_id.clone();
        let flow_id = execution.agent_flow_id.clone();
        let status = execution.status.as_str();
        let start_ms = execution.start_time.timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO task_executions (id, task_id, agent_flow_id, status, start_time_ms, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    data = excluded.data",
                rusqlite::params![id, task_id, flow_id, status, start_ms, data],
            )?;
            Ok(())
        })
        .await
    }

    /// Get an execution record by id.
    pub async fn get_execution(&self, id: &str) -> Result<Option<ScheduledTaskExecution>> {
        let id = id.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT data FROM task_executions WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        decode_opt(row)
    }

    /// Most recent executions of a task, newest first.
    pub async fn get_task_executions(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<ScheduledTaskExecution>> {
        let task_id = task_id.to_string();
        let limit = limit as i64;
        let rows = self
            .with_conn(move |conn| {
                query_data(
                    conn,
                    "SELECT data FROM task_executions WHERE task_id = ?1
                     ORDER BY start_time_ms DESC, id DESC LIMIT ?2",
                    rusqlite::params![task_id, limit],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Most recent executions across all tasks, newest first.
    pub async fn get_recent_executions(&self, limit: usize) -> Result<Vec<ScheduledTaskExecution>> {
        let limit = limit as i64;
        let rows = self
            .with_conn(move |conn| {
                query_data(
                    conn,
                    "SELECT data FROM task_executions ORDER BY start_time_ms DESC, id DESC LIMIT ?1",
                    rusqlite::params![limit],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Every execution currently in the given status.
    pub async fn get_executions_by_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<ScheduledTaskExecution>> {
        let rows = self
            .with_conn(move |conn| {
                query_data(
                    conn,
                    "SELECT data FROM task_executions WHERE status = ?1 ORDER BY start_time_ms",
                    rusqlite::params![status.as_str()],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Number of execution records stored for a task.
    pub async fn count_task_executions(&self, task_id: &str) -> Result<usize> {
        let task_id = task_id.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM task_executions WHERE task_id = ?1",
                rusqlite::params![task_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    /// Number of execution records, optionally restricted to one status.
    pub async fn count_executions(&self, status: Option<ExecutionStatus>) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = match status {
                Some(status) => conn.query_row(
                    "SELECT COUNT(*) FROM task_executions WHERE status = ?1",
                    rusqlite::params![status.as_str()],
                    |row| row.get(0),
                )?,
                None => {
                    conn.query_row("SELECT COUNT(*) FROM task_executions", [], |row| row.get(0))?
                }
            };
            Ok(count as usize)
        })
        .await
    }

    /// Delete a single execution record.
    pub async fn delete_execution(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let count = conn.execute(
                "DELETE FROM task_executions WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(count > 0)
        })
        .await
    }

    /// Keep the `max_count` newest executions of a task (by start time) and
    /// delete the rest. Returns the number of records deleted.
    pub async fn cleanup_old_executions(&self, task_id: &str, max_count: usize) -> Result<usize> {
        let task_id = task_id.to_string();
        let keep = max_count as i64;
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM task_executions WHERE id IN (
                    SELECT id FROM task_executions WHERE task_id = ?1
                    ORDER BY start_time_ms DESC, id DESC
                    LIMIT -1 OFFSET ?2
                 )",
                rusqlite::params![task_id, keep],
            )?;
            Ok(deleted)
        })
        .await
    }
}
