use std::path::Path;

use anyhow::Context as _;
use chrono::Utc;
use serde_json::Value;

use agentflow_scheduler::ExportedFlow;
use agentflow_storage::SchedulerStorage;
use agentflow_types::{AgentFlow, CustomNodeDefinition};

/// Parse a workflow file. Accepts either a stored `AgentFlow` document or an
/// engine export (`{format, flow, customNodes, ...}`).
pub fn parse_flow_document(content: &str) -> anyhow::Result<(AgentFlow, Vec<CustomNodeDefinition>)> {
    let doc: Value = serde_json::from_str(content).context("workflow file is not valid JSON")?;

    if doc.get("format").is_some() && doc.get("flow").is_some() {
        let export: ExportedFlow =
            serde_json::from_value(doc).context("invalid exported workflow")?;
        let now = Utc::now();
        let flow = AgentFlow {
            id: export.flow.id,
            name: export.flow.name,
            description: export.flow.description,
            nodes: export.flow.nodes,
            connections: export.flow.connections,
            custom_node_types: export
                .custom_nodes
                .iter()
                .map(|n| n.node_type.clone())
                .collect(),
            created_at: now,
            updated_at: now,
            version: export.version,
        };
        return Ok((flow, export.custom_nodes));
    }

    let flow: AgentFlow = serde_json::from_value(doc).context("invalid workflow document")?;
    Ok((flow, Vec::new()))
}

pub async fn import(storage: &SchedulerStorage, file: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (flow, custom_nodes) = parse_flow_document(&content)?;

    for node in &custom_nodes {
        storage.save_custom_node(node).await?;
    }
    storage.save_workflow(&flow).await?;

    tracing::info!(flow_id = %flow.id, custom_nodes = custom_nodes.len(), "Workflow imported");
    println!("Imported workflow {} ({})", flow.name, flow.id);
    Ok(())
}

pub async fn list(storage: &SchedulerStorage) -> anyhow::Result<()> {
    let flows = storage.list_workflows().await?;
    if flows.is_empty() {
        println!("No workflows stored");
        return Ok(());
    }
    for flow in flows {
        println!(
            "{}  {}  ({} nodes, updated {})",
            flow.id,
            flow.name,
            flow.nodes.len(),
            flow.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
