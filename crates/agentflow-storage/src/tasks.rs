use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use agentflow_types::ScheduledTask;

use crate::{Result, SchedulerStorage, decode_all, decode_opt, encode, query_data};

impl SchedulerStorage {
    // ─── Scheduled Tasks ───────────────────────────────────

    /// Insert or replace a scheduled task.
    pub async fn save_task(&self, task: &ScheduledTask) -> Result<()> {
        let data = encode(task)?;
        let id = task.id.clone();
        let flow_id = task.agent_flow_id.clone();
        let enabled = task.schedule.enabled;
        let next_run_ms = task.schedule.next_run.map(|t| t.timestamp_millis());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO scheduled_tasks (id, agent_flow_id, enabled, next_run_ms, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    agent_flow_id = excluded.agent_flow_id,
                    enabled = excluded.enabled,
                    next_run_ms = excluded.next_run_ms,
                    data = excluded.data",
                rusqlite::params![id, flow_id, enabled as i32, next_run_ms, data],
            )?;
            Ok(())
        })
        .await
    }

    /// Get a task by id.
    pub async fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        let id = id.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT data FROM scheduled_tasks WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        decode_opt(row)
    }

    /// List every task, soonest `next_run` first.
    pub async fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = self
            .with_conn(|conn| {
                query_data(
                    conn,
                    "SELECT data FROM scheduled_tasks ORDER BY next_run_ms IS NULL, next_run_ms, id",
                    [],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Tasks bound to the given workflow.
    pub async fn get_tasks_by_flow(&self, agent_flow_id: &str) -> Result<Vec<ScheduledTask>> {
        let flow_id = agent_flow_id.to_string();
        let rows = self
            .with_conn(move |conn| {
                query_data(
                    conn,
                    "SELECT data FROM scheduled_tasks WHERE agent_flow_id = ?1 ORDER BY id",
                    rusqlite::params![flow_id],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Tasks with `schedule.enabled = true`.
    pub async fn get_enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        let rows = self
            .with_conn(|conn| {
                query_data(
                    conn,
                    "SELECT data FROM scheduled_tasks WHERE enabled = 1 ORDER BY next_run_ms, id",
                    [],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Enabled tasks whose `next_run` is at or before `now`, oldest first.
    pub async fn get_tasks_due_for_execution(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTask>> {
        let now_ms = now.timestamp_millis();
        let rows = self
            .with_conn(move |conn| {
                query_data(
                    conn,
                    "SELECT data FROM scheduled_tasks
                     WHERE enabled = 1 AND next_run_ms IS NOT NULL AND next_run_ms <= ?1
                     ORDER BY next_run_ms, id",
                    rusqlite::params![now_ms],
                )
            })
            .await?;
        let tasks: Vec<ScheduledTask> = decode_all(rows)?;
        // Millisecond column truncation can admit a task a few micros early.
        Ok(tasks.into_iter().filter(|t| t.is_due(now)).collect())
    }

    /// Delete a task and all of its execution records.
    /// Returns `false` if the task did not exist.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        let (removed, executions) = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let executions = tx.execute(
                    "DELETE FROM task_executions WHERE task_id = ?1",
                    rusqlite::params![id],
                )?;
                let removed = tx.execute(
                    "DELETE FROM scheduled_tasks WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                tx.commit()?;
                Ok((removed > 0, executions))
            })
            .await?;
        if removed {
            tracing::debug!(executions, "Deleted task and its execution history");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use agentflow_types::{
        InputKind, ScheduleInterval, ScheduledInputValue, ScheduledTaskExecution, TaskSchedule,
    };

    use super::*;

    fn task(flow: &str, next_run: Option<DateTime<Utc>>) -> ScheduledTask {
        let mut schedule = TaskSchedule::new(ScheduleInterval::ThirtySeconds);
        schedule.next_run = next_run;
        ScheduledTask::new(flow, schedule, vec![], "tester")
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let mut schedule = TaskSchedule::new(ScheduleInterval::Minutes);
        schedule.minute_interval = Some(15);
        schedule.next_run = Some(Utc::now());
        schedule.last_run = Some(Utc::now() - Duration::minutes(15));
        let mut t = ScheduledTask::new(
            "flow-1",
            schedule,
            vec![ScheduledInputValue {
                node_id: "n1".into(),
                node_name: "Count".into(),
                value: "42".into(),
                kind: InputKind::Number,
                file_metadata: None,
            }],
            "tester",
        );
        t.metadata.last_error = Some("boom".into());
        t.metadata.total_runs = 3;

        storage.save_task(&t).await.unwrap();
        let loaded = storage.get_task(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded, t);
    }

    #[tokio::test]
    async fn test_get_task_not_found() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        assert!(storage.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_task() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let mut t = task("flow-1", None);
        storage.save_task(&t).await.unwrap();

        t.schedule.enabled = false;
        t.metadata.total_runs = 7;
        storage.save_task(&t).await.unwrap();

        let all = storage.list_tasks().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].metadata.total_runs, 7);
        assert!(storage.get_enabled_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_due_tasks() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let now = Utc::now();

        let past = task("flow-1", Some(now - Duration::seconds(5)));
        let older = task("flow-1", Some(now - Duration::minutes(5)));
        let future = task("flow-1", Some(now + Duration::minutes(5)));
        let never = task("flow-1", None);
        let mut disabled = task("flow-1", Some(now - Duration::seconds(5)));
        disabled.schedule.enabled = false;

        for t in [&past, &older, &future, &never, &disabled] {
            storage.save_task(t).await.unwrap();
        }

        let due = storage.get_tasks_due_for_execution(now).await.unwrap();
        let ids: Vec<_> = due.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec![older.id.as_str(), past.id.as_str()]);
    }

    #[tokio::test]
    async fn test_tasks_by_flow() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        storage.save_task(&task("flow-a", None)).await.unwrap();
        storage.save_task(&task("flow-a", None)).await.unwrap();
        storage.save_task(&task("flow-b", None)).await.unwrap();

        assert_eq!(storage.get_tasks_by_flow("flow-a").await.unwrap().len(), 2);
        assert_eq!(storage.get_tasks_by_flow("flow-b").await.unwrap().len(), 1);
        assert!(storage.get_tasks_by_flow("flow-c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let t = task("flow-1", None);
        let other = task("flow-1", None);
        storage.save_task(&t).await.unwrap();
        storage.save_task(&other).await.unwrap();

        for _ in 0..3 {
            storage
                .save_execution(&ScheduledTaskExecution::begin(&t))
                .await
                .unwrap();
        }
        storage
            .save_execution(&ScheduledTaskExecution::begin(&other))
            .await
            .unwrap();

        assert!(storage.delete_task(&t.id).await.unwrap());
        assert!(storage.get_task(&t.id).await.unwrap().is_none());
        assert_eq!(storage.count_task_executions(&t.id).await.unwrap(), 0);
        assert_eq!(storage.count_task_executions(&other.id).await.unwrap(), 1);

        assert!(!storage.delete_task(&t.id).await.unwrap());
    }
}
