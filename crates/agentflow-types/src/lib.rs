use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ──────────────────── Schedule Types ────────────────────

/// How often a scheduled task fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleInterval {
    #[serde(rename = "30seconds")]
    ThirtySeconds,
    Minute,
    /// Every `minute_interval` minutes.
    Minutes,
    Hourly,
    /// Once a day at `time`.
    Daily,
    /// Once a week at `time`.
    Weekly,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::ThirtySeconds => "30seconds",
            ScheduleInterval::Minute => "minute",
            ScheduleInterval::Minutes => "minutes",
            ScheduleInterval::Hourly => "hourly",
            ScheduleInterval::Daily => "daily",
            ScheduleInterval::Weekly => "weekly",
        }
    }

    /// Whether this interval needs an `HH:MM` time-of-day.
    pub fn requires_time(&self) -> bool {
        matches!(self, ScheduleInterval::Daily | ScheduleInterval::Weekly)
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "30seconds" => Ok(ScheduleInterval::ThirtySeconds),
            "minute" => Ok(ScheduleInterval::Minute),
            "minutes" => Ok(ScheduleInterval::Minutes),
            "hourly" => Ok(ScheduleInterval::Hourly),
            "daily" => Ok(ScheduleInterval::Daily),
            "weekly" => Ok(ScheduleInterval::Weekly),
            other => Err(format!("unknown schedule interval: {other}")),
        }
    }
}

/// Runtime status of a scheduled task, as last observed by the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    #[default]
    Idle,
    Running,
    Error,
}

/// When and how often a task runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSchedule {
    pub enabled: bool,
    pub interval: ScheduleInterval,
    /// Time of day as "HH:MM" (daily and weekly only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Period in minutes, 1-59 (`minutes` interval only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TaskRunStatus,
}

impl TaskSchedule {
    /// An enabled schedule with no time-of-day or minute period set.
    pub fn new(interval: ScheduleInterval) -> Self {
        Self {
            enabled: true,
            interval,
            time: None,
            minute_interval: None,
            next_run: None,
            last_run: None,
            status: TaskRunStatus::Idle,
        }
    }
}

// ──────────────────── Input Types ────────────────────

/// Kind of value captured for a flow input node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Text,
    File,
    Number,
}

/// Describes the file a `file` input was read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
}

/// Value captured for one input node when the task was saved.
///
/// File values are already encoded (UTF-8 text or raw base64) so every value
/// is passed to the engine as a plain string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledInputValue {
    pub node_id: String,
    pub node_name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: InputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_metadata: Option<FileMetadata>,
}

// ──────────────────── Task Types ────────────────────

/// Bookkeeping counters maintained by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default)]
    pub total_runs: u64,
    #[serde(default)]
    pub success_runs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A workflow bound to a recurring schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    /// Stored workflow this task runs. Not owned by the task.
    pub agent_flow_id: String,
    pub schedule: TaskSchedule,
    #[serde(default)]
    pub inputs: Vec<ScheduledInputValue>,
    pub metadata: TaskMetadata,
}

impl ScheduledTask {
    /// Create a task with a fresh id and zeroed run counters.
    pub fn new(
        agent_flow_id: impl Into<String>,
        schedule: TaskSchedule,
        inputs: Vec<ScheduledInputValue>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_flow_id: agent_flow_id.into(),
            schedule,
            inputs,
            metadata: TaskMetadata {
                created_at: Utc::now(),
                created_by: created_by.into(),
                total_runs: 0,
                success_runs: 0,
                last_error: None,
            },
        }
    }

    /// Enabled and `next_run` at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule.enabled && self.schedule.next_run.is_some_and(|next| next <= now)
    }
}

// ──────────────────── Execution Types ────────────────────

/// State of one run attempt. `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an execution log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// Structured log entry produced while a flow runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Node execution time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ExecutionLog {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            message: message.into(),
            node_id: None,
            node_name: None,
            duration: None,
            data: None,
        }
    }
}

/// History entry for a single run attempt of a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTaskExecution {
    pub id: String,
    pub task_id: String,
    pub agent_flow_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    /// Snapshot of the task inputs at dispatch time.
    #[serde(default)]
    pub inputs: Vec<ScheduledInputValue>,
    #[serde(default)]
    pub logs: Vec<ExecutionLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `end_time - start_time` in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

impl ScheduledTaskExecution {
    /// Allocate a `running` record for `task`, snapshotting its inputs.
    pub fn begin(task: &ScheduledTask) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            agent_flow_id: task.agent_flow_id.clone(),
            start_time: Utc::now(),
            end_time: None,
            status: ExecutionStatus::Running,
            inputs: task.inputs.clone(),
            logs: Vec::new(),
            outputs: None,
            error: None,
            duration: None,
        }
    }
}

// ──────────────────── Flow Graph Types ────────────────────

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Input or output port on a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodePort {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub port_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// A node in a stored workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default)]
    pub position: Position,
    /// Node-specific configuration.
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
}

/// Directed edge between two node ports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlowConnection {
    pub id: String,
    pub source_node_id: String,
    pub source_port_id: String,
    pub target_node_id: String,
    pub target_port_id: String,
}

/// A stored workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentFlow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub connections: Vec<FlowConnection>,
    /// Node types referenced by this graph that live in the custom node registry.
    #[serde(default)]
    pub custom_node_types: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// User-defined node type that the engine executes from source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomNodeDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<NodePort>,
    #[serde(default)]
    pub outputs: Vec<NodePort>,
    #[serde(default)]
    pub properties: Vec<Value>,
    pub execution_code: String,
    #[serde(default)]
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> ScheduledTask {
        let mut schedule = TaskSchedule::new(ScheduleInterval::Daily);
        schedule.time = Some("09:00".into());
        ScheduledTask::new(
            "flow-1",
            schedule,
            vec![ScheduledInputValue {
                node_id: "n1".into(),
                node_name: "Prompt".into(),
                value: "summarize".into(),
                kind: InputKind::Text,
                file_metadata: None,
            }],
            "tester",
        )
    }

    #[test]
    fn test_interval_wire_names() {
        let json = serde_json::to_string(&ScheduleInterval::ThirtySeconds).unwrap();
        assert_eq!(json, "\"30seconds\"");
        let parsed: ScheduleInterval = serde_json::from_str("\"weekly\"").unwrap();
        assert_eq!(parsed, ScheduleInterval::Weekly);
        assert_eq!("minutes".parse::<ScheduleInterval>(), Ok(ScheduleInterval::Minutes));
        assert!("fortnightly".parse::<ScheduleInterval>().is_err());
    }

    #[test]
    fn test_task_serde_camel_case() {
        let task = sample_task();
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["agentFlowId"], "flow-1");
        assert_eq!(value["schedule"]["interval"], "daily");
        assert_eq!(value["schedule"]["status"], "idle");
        assert_eq!(value["inputs"][0]["nodeName"], "Prompt");
        assert_eq!(value["inputs"][0]["type"], "text");
        assert_eq!(value["metadata"]["totalRuns"], 0);
        assert!(value["schedule"].get("minuteInterval").is_none());

        let parsed: ScheduledTask = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn test_is_due() {
        let mut task = sample_task();
        let now = Utc::now();
        assert!(!task.is_due(now));

        task.schedule.next_run = Some(now - chrono::Duration::seconds(5));
        assert!(task.is_due(now));

        task.schedule.enabled = false;
        assert!(!task.is_due(now));
    }

    #[test]
    fn test_execution_begin_snapshots_inputs() {
        let task = sample_task();
        let exec = ScheduledTaskExecution::begin(&task);
        assert_ne!(exec.id, task.id);
        assert_eq!(exec.task_id, task.id);
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(!exec.status.is_terminal());
        assert_eq!(exec.inputs, task.inputs);
        assert!(exec.end_time.is_none());
    }

    #[test]
    fn test_flow_defaults() {
        let json = r#"{
            "id": "f1",
            "name": "Flow",
            "nodes": [{"id": "a", "type": "input", "name": "Question"}],
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z"
        }"#;
        let flow: AgentFlow = serde_json::from_str(json).unwrap();
        assert_eq!(flow.version, "1.0.0");
        assert!(flow.connections.is_empty());
        assert_eq!(flow.nodes[0].node_type, "input");
        assert!(flow.nodes[0].data.is_null());
    }

    #[test]
    fn test_file_metadata_type_field() {
        let meta = FileMetadata {
            name: "report.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 1024,
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"type\":\"application/pdf\""));
    }
}
