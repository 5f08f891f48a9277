use rusqlite::OptionalExtension;

use agentflow_types::{AgentFlow, CustomNodeDefinition};

use crate::{Result, SchedulerStorage, decode_all, decode_opt, encode, query_data};

impl SchedulerStorage {
    // ─── Stored Workflows ───────────────────────────────────

    /// Insert or replace a workflow graph.
    pub async fn save_workflow(&self, flow: &AgentFlow) -> Result<()> {
        let data = encode(flow)?;
        let id = flow.id.clone();
        let name = flow.name.clone();
        let updated_ms = flow.updated_at.timestamp_millis();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO agent_workflows (id, name, updated_at_ms, data)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, name, updated_ms, data],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<AgentFlow>> {
        let id = id.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT data FROM agent_workflows WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        decode_opt(row)
    }

    /// All stored workflows, most recently updated first.
    pub async fn list_workflows(&self) -> Result<Vec<AgentFlow>> {
        let rows = self
            .with_conn(|conn| {
                query_data(
                    conn,
                    "SELECT data FROM agent_workflows ORDER BY updated_at_ms DESC",
                    [],
                )
            })
            .await?;
        decode_all(rows)
    }

    /// Delete a workflow. Tasks referencing it are left in place and will
    /// fail with a not-found error on their next run.
    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let count = conn.execute(
                "DELETE FROM agent_workflows WHERE id = ?1",
                rusqlite::params![id],
            )?;
            Ok(count > 0)
        })
        .await
    }

    // ─── Custom Node Definitions ───────────────────────────────────

    pub async fn save_custom_node(&self, node: &CustomNodeDefinition) -> Result<()> {
        let data = encode(node)?;
        let node_type = node.node_type.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO custom_nodes (node_type, data) VALUES (?1, ?2)",
                rusqlite::params![node_type, data],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_custom_node(&self, node_type: &str) -> Result<Option<CustomNodeDefinition>> {
        let node_type = node_type.to_string();
        let row = self
            .with_conn(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT data FROM custom_nodes WHERE node_type = ?1",
                        rusqlite::params![node_type],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        decode_opt(row)
    }

    pub async fn list_custom_nodes(&self) -> Result<Vec<CustomNodeDefinition>> {
        let rows = self
            .with_conn(|conn| {
                query_data(conn, "SELECT data FROM custom_nodes ORDER BY node_type", [])
            })
            .await?;
        decode_all(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use agentflow_types::{FlowConnection, FlowNode, Position};

    use super::*;

    fn flow(id: &str) -> AgentFlow {
        AgentFlow {
            id: id.into(),
            name: format!("Flow {id}"),
            description: None,
            nodes: vec![FlowNode {
                id: "in".into(),
                node_type: "input".into(),
                name: "Question".into(),
                position: Position { x: 10.0, y: 20.0 },
                data: json!({ "inputType": "string" }),
                inputs: vec![],
                outputs: vec![],
            }],
            connections: vec![FlowConnection {
                id: "c1".into(),
                source_node_id: "in".into(),
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

    #[tokio::test]
    async fn test_workflow_crud() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let f = flow("f1");
        storage.save_workflow(&f).await.unwrap();
        assert_eq!(storage.get_workflow("f1").await.unwrap(), Some(f));

        let mut newer = flow("f2");
        newer.updated_at = Utc::now() + Duration::minutes(1);
        storage.save_workflow(&newer).await.unwrap();
        let all = storage.list_workflows().await.unwrap();
        assert_eq!(all[0].id, "f2");

        assert!(storage.delete_workflow("f1").await.unwrap());
        assert!(storage.get_workflow("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_custom_nodes() {
        let storage = SchedulerStorage::open_in_memory().unwrap();
        let node = CustomNodeDefinition {
            id: "cn-1".into(),
            node_type: "word-counter".into(),
            name: "Word Counter".into(),
            description: Some("Counts words".into()),
            inputs: vec![],
            outputs: vec![],
            properties: vec![],
            execution_code: "return { count: inputs.text.split(' ').length };".into(),
            metadata: json!({}),
        };
        storage.save_custom_node(&node).await.unwrap();

        let loaded = storage.get_custom_node("word-counter").await.unwrap();
        assert_eq!(loaded, Some(node));
        assert!(storage.get_custom_node("unknown").await.unwrap().is_none());
        assert_eq!(storage.list_custom_nodes().await.unwrap().len(), 1);
    }
}
