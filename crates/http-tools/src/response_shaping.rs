//! Response shaping.
//!
//! Turns an [`ExecutionResult`] into the two renderings a tool call returns:
//! - a bounded text preview for clients that only read `content`
//! - a structured payload for clients that read `structuredContent`
//!
//! In [`ResponseMode::Summary`], array payloads are reduced to `count` plus the first
//! `sample_size` elements so large list endpoints stay usable by a constrained caller.

use crate::config::{ResponseMode, ShapeConfig};
use crate::runtime::ExecutionResult;
use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value, json};

/// Error previews never exceed this many bytes, even with a larger preview cap.
pub const ERROR_PREVIEW_MAX_BYTES: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ShapedResponse {
    pub text: String,
    pub structured: Value,
    pub is_error: bool,
}

impl ShapedResponse {
    #[must_use]
    pub fn into_call_tool_result(self) -> CallToolResult {
        CallToolResult {
            content: vec![Content::text(self.text)],
            structured_content: Some(self.structured),
            is_error: Some(self.is_error),
            meta: None,
        }
    }
}

/// Shape one execution result.
#[must_use]
pub fn shape_response(result: &ExecutionResult, config: &ShapeConfig) -> ShapedResponse {
    if result.error {
        shape_failure(result, config)
    } else {
        shape_success(result, config)
    }
}

fn shape_success(result: &ExecutionResult, config: &ShapeConfig) -> ShapedResponse {
    let mut structured = base_structured(result);
    match (&result.data, config.mode) {
        (Value::Array(items), ResponseMode::Summary) => {
            let sample: Vec<Value> = items
                .iter()
                .take(config.effective_sample_size())
                .cloned()
                .collect();
            structured.insert("count".to_string(), json!(items.len()));
            structured.insert("sample".to_string(), Value::Array(sample));
        }
        (data, _) => {
            structured.insert("data".to_string(), data.clone());
        }
    }

    let snippet = truncate_with_marker(
        &render_pretty(&result.data),
        config.effective_preview_max_bytes(),
    );
    let text = format!(
        "status: {}\nitems: {}\nurl: {}\npreview:\n{snippet}",
        result.status,
        item_count(&result.data),
        result.request.url
    );

    ShapedResponse {
        text,
        structured: Value::Object(structured),
        is_error: false,
    }
}

fn shape_failure(result: &ExecutionResult, config: &ShapeConfig) -> ShapedResponse {
    let cap = ERROR_PREVIEW_MAX_BYTES.min(config.effective_preview_max_bytes());
    let rendered = render_pretty(&result.data);
    let text = format!(
        "status: {}\nurl: {}\nerror: {}",
        result.status,
        result.request.url,
        truncate_to_boundary(&rendered, cap)
    );

    let mut structured = base_structured(result);
    structured.insert("error".to_string(), Value::Bool(true));
    structured.insert("data".to_string(), result.data.clone());

    ShapedResponse {
        text,
        structured: Value::Object(structured),
        is_error: true,
    }
}

fn base_structured(result: &ExecutionResult) -> Map<String, Value> {
    let mut out = Map::new();
    out.insert("status".to_string(), json!(result.status));
    out.insert("headers".to_string(), json!(result.headers));
    out.insert(
        "request".to_string(),
        serde_json::to_value(&result.request).unwrap_or(Value::Null),
    );
    out
}

/// Number of items a payload represents: array length, 1 for an object, 0 otherwise.
#[must_use]
pub fn item_count(data: &Value) -> usize {
    match data {
        Value::Array(items) => items.len(),
        Value::Object(_) => 1,
        _ => 0,
    }
}

fn render_pretty(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Cap `text` at `max_bytes`, appending `...[truncated N bytes]` when anything was cut.
#[must_use]
pub fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let kept = truncate_to_boundary(text, max_bytes);
    format!("{kept}\n...[truncated {} bytes]", text.len() - kept.len())
}

fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
