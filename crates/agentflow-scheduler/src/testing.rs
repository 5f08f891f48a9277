//! Shared fixtures for scheduler tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value, json};

use agentflow_types::{
    AgentFlow, ExecutionLog, FlowConnection, FlowNode, InputKind, LogLevel, ScheduledInputValue,
};

use crate::adapter::{ExportedFlow, FlowEngine, FlowRunOutput, LogSink};
use crate::error::{Result, SchedulerError};

pub fn sample_flow(id: &str) -> AgentFlow {
    AgentFlow {
        id: id.into(),
        name: format!("Flow {id}"),
        description: None,
        nodes: vec![
            FlowNode {
                id: "question".into(),
                node_type: "input".into(),
                name: "Question".into(),
                position: Default::default(),
                data: json!({ "inputType": "string" }),
                inputs: vec![],
                outputs: vec![],
            },
            FlowNode {
                id: "llm".into(),
                node_type: "llm".into(),
                name: "LLM".into(),
                position: Default::default(),
                data: json!({ "model": "local" }),
                inputs: vec![],
                outputs: vec![],
            },
        ],
        connections: vec![FlowConnection {
            id: "c1".into(),
            source_node_id: "question".into(),
            source_port_id: "output".into(),
            target_node_id: "llm".into(),
            target_port_id: "prompt".into(),
        }],
        custom_node_types: vec![],
        created_at: Utc::now(),
        updated_at: Utc::now(),
        version: "1.0.0".into(),
    }
}

pub fn text_input(name: &str, value: &str) -> ScheduledInputValue {
    ScheduledInputValue {
        node_id: name.to_lowercase(),
        node_name: name.into(),
        value: value.into(),
        kind: InputKind::Text,
        file_metadata: None,
    }
}

/// In-process engine that records its calls.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Option<Duration>,
    fail_with: Option<String>,
    last: Mutex<Option<(ExportedFlow, Map<String, Value>)>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_call(&self) -> Option<(ExportedFlow, Map<String, Value>)> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl FlowEngine for FakeEngine {
    async fn execute(
        &self,
        flow: ExportedFlow,
        inputs: Map<String, Value>,
        on_log: LogSink,
    ) -> Result<FlowRunOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some((flow, inputs));

        on_log(ExecutionLog::new(LogLevel::Info, "Flow started"));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.fail_with {
            return Err(SchedulerError::Engine(message.clone()));
        }

        let mut outputs = Map::new();
        outputs.insert("result".into(), json!("ok"));
        Ok(FlowRunOutput {
            outputs,
            logs: vec![ExecutionLog::new(LogLevel::Success, "Flow finished")],
        })
    }
}
