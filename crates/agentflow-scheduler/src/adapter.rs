//! Flow invocation adapter: turns a stored workflow plus task inputs into
//! an engine run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use agentflow_storage::SchedulerStorage;
use agentflow_types::{
    AgentFlow, CustomNodeDefinition, ExecutionLog, FlowConnection, FlowNode, LogLevel,
    ScheduledInputValue,
};

use crate::error::{Result, SchedulerError};
use crate::inputs::resolve_input_map;

/// Export format tag understood by the flow engine.
pub const EXPORT_FORMAT: &str = "clara-sdk";
pub const EXPORT_VERSION: &str = "1.0.0";

/// Callback invoked for every log event the engine produces.
pub type LogSink = Arc<dyn Fn(ExecutionLog) + Send + Sync>;

/// Source of stored workflow graphs.
#[async_trait]
pub trait FlowSource: Send + Sync {
    async fn load_flow(&self, flow_id: &str) -> Result<Option<AgentFlow>>;
}

/// Registry of user-defined node types.
#[async_trait]
pub trait NodeDefinitionRegistry: Send + Sync {
    async fn get_node_definition(&self, node_type: &str) -> Result<Option<CustomNodeDefinition>>;
}

/// External flow execution engine.
#[async_trait]
pub trait FlowEngine: Send + Sync {
    /// Run `flow` with `inputs` keyed by input node name.
    async fn execute(
        &self,
        flow: ExportedFlow,
        inputs: Map<String, Value>,
        on_log: LogSink,
    ) -> Result<FlowRunOutput>;
}

#[async_trait]
impl FlowSource for SchedulerStorage {
    async fn load_flow(&self, flow_id: &str) -> Result<Option<AgentFlow>> {
        Ok(self.get_workflow(flow_id).await?)
    }
}

#[async_trait]
impl NodeDefinitionRegistry for SchedulerStorage {
    async fn get_node_definition(&self, node_type: &str) -> Result<Option<CustomNodeDefinition>> {
        Ok(self.get_custom_node(node_type).await?)
    }
}

/// Graph section of an exported flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedGraph {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub connections: Vec<FlowConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub exported_at: DateTime<Utc>,
    pub exported_by: String,
    pub has_custom_nodes: bool,
}

/// Engine input document: `{format, version, flow, customNodes, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFlow {
    pub format: String,
    pub version: String,
    pub flow: ExportedGraph,
    pub custom_nodes: Vec<CustomNodeDefinition>,
    pub metadata: ExportMetadata,
}

impl ExportedFlow {
    pub fn from_flow(flow: &AgentFlow, custom_nodes: Vec<CustomNodeDefinition>) -> Self {
        Self {
            format: EXPORT_FORMAT.to_string(),
            version: EXPORT_VERSION.to_string(),
            flow: ExportedGraph {
                id: flow.id.clone(),
                name: flow.name.clone(),
                description: flow.description.clone(),
                nodes: flow.nodes.clone(),
                connections: flow.connections.clone(),
            },
            metadata: ExportMetadata {
                exported_at: Utc::now(),
                exported_by: "agentflow-scheduler".to_string(),
                has_custom_nodes: !custom_nodes.is_empty(),
            },
            custom_nodes,
        }
    }
}

/// Result of one engine run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FlowRunOutput {
    #[serde(default)]
    pub outputs: Map<String, Value>,
    #[serde(default)]
    pub logs: Vec<ExecutionLog>,
}

/// Loads a task's workflow, resolves its custom nodes, and runs it on the
/// engine under a timeout.
pub struct FlowInvocationAdapter {
    flows: Arc<dyn FlowSource>,
    nodes: Arc<dyn NodeDefinitionRegistry>,
    engine: Arc<dyn FlowEngine>,
    timeout: Duration,
}

impl FlowInvocationAdapter {
    /// Timeout applied to scheduled runs unless overridden.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(
        flows: Arc<dyn FlowSource>,
        nodes: Arc<dyn NodeDefinitionRegistry>,
        engine: Arc<dyn FlowEngine>,
    ) -> Self {
        Self {
            flows,
            nodes,
            engine,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flows(&self) -> &Arc<dyn FlowSource> {
        &self.flows
    }

    /// Run the workflow `agent_flow_id` with the task's captured inputs.
    pub async fn execute(
        &self,
        agent_flow_id: &str,
        inputs: &[ScheduledInputValue],
        on_log: LogSink,
    ) -> Result<FlowRunOutput> {
        let flow = self
            .flows
            .load_flow(agent_flow_id)
            .await?
            .ok_or_else(|| SchedulerError::FlowNotFound(agent_flow_id.to_string()))?;

        let custom_nodes = self.resolve_custom_nodes(&flow, &on_log).await?;
        let exported = ExportedFlow::from_flow(&flow, custom_nodes);
        let input_map = resolve_input_map(inputs);

        debug!(
            flow_id = %flow.id,
            nodes = flow.nodes.len(),
            inputs = input_map.len(),
            "Invoking flow engine"
        );

        match tokio::time::timeout(self.timeout, self.engine.execute(exported, input_map, on_log))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Timeout(self.timeout)),
        }
    }

    /// Look up the custom node definitions the flow needs.
    ///
    /// Candidates are the declared `custom_node_types` plus every node type
    /// used in the graph. Built-in types miss the registry and are skipped
    /// quietly; a declared type that misses is skipped with a warning.
    async fn resolve_custom_nodes(
        &self,
        flow: &AgentFlow,
        on_log: &LogSink,
    ) -> Result<Vec<CustomNodeDefinition>> {
        let declared: BTreeSet<&str> = flow.custom_node_types.iter().map(String::as_str).collect();
        let candidates: BTreeSet<&str> = declared
            .iter()
            .copied()
            .chain(flow.nodes.iter().map(|n| n.node_type.as_str()))
            .collect();
        let mut resolved = Vec::new();

        for node_type in candidates {
            match self.nodes.get_node_definition(node_type).await? {
                Some(def) => resolved.push(def),
                None if declared.contains(node_type) => {
                    warn!(flow_id = %flow.id, node_type, "Custom node definition not found, skipping");
                    on_log(ExecutionLog::new(
                        LogLevel::Warning,
                        format!("Custom node type '{node_type}' is not registered"),
                    ));
                }
                None => {}
            }
        }
        Ok(resolved)
    }
}
