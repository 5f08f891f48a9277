//! Flow engine reached over HTTP on the local machine.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use agentflow_config::EngineSettings;
use agentflow_types::ExecutionLog;

use crate::adapter::{ExportedFlow, FlowEngine, FlowRunOutput, LogSink};
use crate::error::{Result, SchedulerError};

#[derive(Serialize)]
struct RunRequest<'a> {
    flow: &'a ExportedFlow,
    inputs: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    outputs: Map<String, Value>,
    #[serde(default)]
    logs: Vec<ExecutionLog>,
    #[serde(default)]
    error: Option<String>,
}

/// POSTs `{flow, inputs}` to a local runner and expects
/// `{success?, outputs, logs, error?}` back.
pub struct HttpFlowEngine {
    client: reqwest::Client,
    url: String,
}

impl HttpFlowEngine {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SchedulerError::Engine(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        Self::new(
            settings.url.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FlowEngine for HttpFlowEngine {
    async fn execute(
        &self,
        flow: ExportedFlow,
        inputs: Map<String, Value>,
        on_log: LogSink,
    ) -> Result<FlowRunOutput> {
        let resp = self
            .client
            .post(&self.url)
            .json(&RunRequest {
                flow: &flow,
                inputs: &inputs,
            })
            .send()
            .await
            .map_err(|e| SchedulerError::Engine(format!("Request to {} failed: {e}", self.url)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SchedulerError::Engine(format!("HTTP {status}: {body}")));
        }

        let body: RunResponse = resp
            .json()
            .await
            .map_err(|e| SchedulerError::Engine(format!("Invalid engine response: {e}")))?;

        // The runner reports logs in one batch; relay them in order.
        for log in &body.logs {
            on_log(log.clone());
        }

        if body.success == Some(false) || body.error.is_some() {
            let message = body
                .error
                .unwrap_or_else(|| "Flow execution failed".to_string());
            return Err(SchedulerError::Engine(message));
        }

        Ok(FlowRunOutput {
            outputs: body.outputs,
            logs: body.logs,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::testing::sample_flow;

    use super::*;

    /// Serve exactly one HTTP request with a canned response, returning the
    /// request body.
    async fn serve_once(status_line: &'static str, body: String) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/execute", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let request_body = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if buf.len() >= header_end + 4 + content_length {
                        break text[header_end + 4..].to_string();
                    }
                }
                if n == 0 {
                    break String::new();
                }
            };
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request_body
        });
        (url, handle)
    }

    fn exported() -> ExportedFlow {
        ExportedFlow::from_flow(&sample_flow("f1"), vec![])
    }

    #[tokio::test]
    async fn test_successful_run_relays_logs() {
        let body = serde_json::json!({
            "outputs": { "summary": "all good" },
            "logs": [{
                "id": "l1",
                "timestamp": "2024-05-01T12:00:00Z",
                "level": "info",
                "message": "LLM node finished",
                "nodeName": "LLM"
            }]
        })
        .to_string();
        let (url, server) = serve_once("HTTP/1.1 200 OK", body).await;
        let engine = HttpFlowEngine::new(url, Duration::from_secs(5)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::<ExecutionLog>::new()));
        let seen_sink = seen.clone();
        let mut inputs = Map::new();
        inputs.insert("Question".into(), Value::String("hi".into()));

        let output = engine
            .execute(
                exported(),
                inputs,
                Arc::new(move |log: ExecutionLog| seen_sink.lock().unwrap().push(log)),
            )
            .await
            .unwrap();

        assert_eq!(output.outputs["summary"], "all good");
        assert_eq!(output.logs.len(), 1);
        assert_eq!(seen.lock().unwrap()[0].message, "LLM node finished");

        let request: Value = serde_json::from_str(&server.await.unwrap()).unwrap();
        assert_eq!(request["flow"]["format"], "clara-sdk");
        assert_eq!(request["inputs"]["Question"], "hi");
    }

    #[tokio::test]
    async fn test_reported_failure() {
        let body = serde_json::json!({ "success": false, "error": "node LLM crashed" }).to_string();
        let (url, _server) = serve_once("HTTP/1.1 200 OK", body).await;
        let engine = HttpFlowEngine::new(url, Duration::from_secs(5)).unwrap();

        let err = engine
            .execute(exported(), Map::new(), Arc::new(|_: ExecutionLog| {}))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Engine(msg) if msg == "node LLM crashed"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let (url, _server) =
            serve_once("HTTP/1.1 500 Internal Server Error", "{}".to_string()).await;
        let engine = HttpFlowEngine::new(url, Duration::from_secs(5)).unwrap();

        let err = engine
            .execute(exported(), Map::new(), Arc::new(|_: ExecutionLog| {}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
