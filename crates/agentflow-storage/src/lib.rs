//! agentflow-storage: SQLite-based persistence for scheduled tasks.
//!
//! Tasks, execution records, stored workflows and custom node definitions
//! are kept as JSON documents next to the columns they are looked up by.

mod executions;
mod tasks;
mod workflows;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Blocking task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("Record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        agent_flow_id TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        next_run_ms INTEGER,
        data TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_tasks_flow ON scheduled_tasks(agent_flow_id);
    CREATE INDEX IF NOT EXISTS idx_tasks_enabled ON scheduled_tasks(enabled);
    CREATE INDEX IF NOT EXISTS idx_tasks_next_run ON scheduled_tasks(next_run_ms);

    CREATE TABLE IF NOT EXISTS task_executions (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL,
        agent_flow_id TEXT NOT NULL,
        status TEXT NOT NULL,
        start_time_ms INTEGER NOT NULL,
        data TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_exec_task ON task_executions(task_id);
    CREATE INDEX IF NOT EXISTS idx_exec_status ON task_executions(status);
    CREATE INDEX IF NOT EXISTS idx_exec_start ON task_executions(start_time_ms);

    CREATE TABLE IF NOT EXISTS agent_workflows (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        updated_at_ms INTEGER NOT NULL,
        data TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS custom_nodes (
        node_type TEXT PRIMARY KEY,
        data TEXT NOT NULL
    );";

/// SQLite-based storage for the scheduler.
pub struct SchedulerStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SchedulerStorage {
    /// Open (or create) the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!("Storage opened: {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<String>) -> Result<Vec<T>> {
    rows.iter()
        .map(|data| serde_json::from_str(data).map_err(StorageError::from))
        .collect()
}

fn decode_opt<T: DeserializeOwned>(row: Option<String>) -> Result<Option<T>> {
    row.map(|data| serde_json::from_str(&data))
        .transpose()
        .map_err(StorageError::from)
}

/// Collect the `data` column of every row returned by `sql`.
fn query_data<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}
