//! Task input capture and encoding.
//!
//! File inputs are encoded once, when the task is saved: images and PDFs
//! become raw base64, everything else is stored as UTF-8 text.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Value};

use agentflow_types::{AgentFlow, FileMetadata, FlowNode, InputKind, ScheduledInputValue};

use crate::error::{Result, SchedulerError};

/// MIME types whose content is passed to the engine as base64.
pub fn is_binary_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image/") || mime_type == "application/pdf"
}

/// Encode file content the way the engine expects it for `mime_type`.
/// Text content must be valid UTF-8.
pub fn encode_file_input(bytes: &[u8], mime_type: &str) -> Result<String> {
    if is_binary_mime(mime_type) {
        return Ok(STANDARD.encode(bytes));
    }
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        SchedulerError::Validation(format!(
            "{mime_type} file is not valid UTF-8 (invalid byte at offset {})",
            e.utf8_error().valid_up_to()
        ))
    })
}

/// Strip a `data:<mime>;base64,` prefix, leaving the raw payload.
pub fn strip_data_url(value: &str) -> &str {
    match value.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(value, |(_, payload)| payload),
        None => value,
    }
}

/// Build a `file` input from raw file content.
pub fn file_input(
    node_id: impl Into<String>,
    node_name: impl Into<String>,
    file_name: impl Into<String>,
    mime_type: &str,
    bytes: &[u8],
) -> Result<ScheduledInputValue> {
    Ok(ScheduledInputValue {
        node_id: node_id.into(),
        node_name: node_name.into(),
        value: encode_file_input(bytes, mime_type)?,
        kind: InputKind::File,
        file_metadata: Some(FileMetadata {
            name: file_name.into(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
        }),
    })
}

/// Save-time normalization of task inputs.
///
/// Binary file values supplied as data URLs are reduced to their raw base64
/// payload. Text file content is never rewritten. Without metadata, only a
/// `data:<mime>;base64,` value counts as binary.
pub fn normalize_inputs(inputs: &mut [ScheduledInputValue]) {
    for input in inputs.iter_mut().filter(|i| i.kind == InputKind::File) {
        let binary = match &input.file_metadata {
            Some(meta) => is_binary_mime(&meta.mime_type),
            None => input.value.starts_with("data:") && input.value.contains(";base64,"),
        };
        if binary {
            input.value = strip_data_url(&input.value).to_string();
        }
    }
}

/// Guess a MIME type from a file extension.
pub fn mime_from_path(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        Some("md") => "text/markdown",
        Some("html" | "htm") => "text/html",
        _ => "text/plain",
    }
}

/// Input kind of a graph node, or `None` if the node takes no user input.
fn input_kind(node: &FlowNode) -> Option<InputKind> {
    match node.node_type.as_str() {
        "input" => Some(
            match node.data.get("inputType").and_then(Value::as_str) {
                Some("number") => InputKind::Number,
                Some("file") => InputKind::File,
                _ => InputKind::Text,
            },
        ),
        "file-input" | "file-upload" => Some(InputKind::File),
        "number-input" => Some(InputKind::Number),
        _ => None,
    }
}

/// One input entry per input node of `flow`, in graph order, pre-filled with
/// each node's configured default value.
pub fn input_template(flow: &AgentFlow) -> Vec<ScheduledInputValue> {
    flow.nodes
        .iter()
        .filter_map(|node| {
            let kind = input_kind(node)?;
            let value = match node.data.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => String::new(),
            };
            Some(ScheduledInputValue {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                value,
                kind,
                file_metadata: None,
            })
        })
        .collect()
}

/// Keyed-input map handed to the engine, keyed by node name. Values were
/// encoded at save time and pass through unchanged.
pub fn resolve_input_map(inputs: &[ScheduledInputValue]) -> Map<String, Value> {
    let mut map = Map::new();
    for input in inputs {
        if map
            .insert(input.node_name.clone(), Value::String(input.value.clone()))
            .is_some()
        {
            tracing::warn!(node_name = %input.node_name, "Duplicate input node name, last value wins");
        }
    }
    map
}
