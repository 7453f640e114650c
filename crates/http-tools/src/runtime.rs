//! Execution engine for ERP operations.
//!
//! [`HttpExecutor`] turns a [`BuiltRequest`] into an [`ExecutionResult`]. It never returns an
//! error: transport failures and non-2xx statuses are reported with `error: true`, and every
//! header map it echoes back is redacted.

use crate::args::CanonicalArgs;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::request::{BuiltRequest, OperationDescriptor, build_request};
use crate::response_shaping::truncate_with_marker;
use crate::safety::{redact_headers, redact_response_headers, redact_url, sanitize_reqwest_error};
use crate::session::SessionState;
use base64::Engine as _;
use mime::Mime;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Echo of the request that produced a result. Headers are redacted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPreview {
    pub method: String,
    pub url: String,
    pub query: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_query: Option<String>,
    pub use_params: bool,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Outcome of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub status: u16,
    /// Response headers, redacted.
    pub headers: BTreeMap<String, String>,
    pub data: Value,
    pub error: bool,
    pub request: RequestPreview,
}

impl ExecutionResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.error
    }
}

/// Issues requests through the session's client.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    session: Arc<SessionState>,
    config: RuntimeConfig,
}

impl HttpExecutor {
    #[must_use]
    pub fn new(session: Arc<SessionState>, config: RuntimeConfig) -> Self {
        Self { session, config }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build and execute one operation call.
    ///
    /// # Errors
    ///
    /// Returns an error only when the request cannot be built (missing path parameter, invalid
    /// base URL). Nothing is sent in that case.
    pub async fn call(
        &self,
        op: &OperationDescriptor,
        args: &CanonicalArgs,
        base_url: &str,
    ) -> Result<ExecutionResult> {
        let request = build_request(op, args, base_url, &self.config.defaults)?;
        Ok(self.execute(&request).await)
    }

    /// Execute a built request. Always produces a result.
    pub async fn execute(&self, request: &BuiltRequest) -> ExecutionResult {
        let mut headers = request.headers.clone();
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("cookie"))
            && let Some(resolved) = self.session.resolve_cookie_header(request.url.as_str())
        {
            debug!(source = ?resolved.source, "attached session cookie");
            headers.insert("Cookie".to_string(), resolved.header);
        }

        let preview = RequestPreview {
            method: request.method.to_string(),
            url: request.url.to_string(),
            query: request.query.clone(),
            raw_query: request.raw_query.clone(),
            use_params: request.use_params,
            headers: redact_headers(&headers),
            body: body_preview(
                &request.body,
                self.config.shape.effective_preview_max_bytes(),
            ),
        };

        if self.config.debug_http {
            info!(
                method = %request.method,
                url = %request.url,
                headers = ?preview.headers,
                body = preview.body.as_deref().unwrap_or(""),
                "http out"
            );
        } else {
            debug!(method = %request.method, url = %redact_url(&request.url), "http out");
        }

        let mut builder = self
            .session
            .client()
            .request(request.method.to_reqwest(), request.url.clone());
        for (name, value) in &headers {
            builder = builder.header(name, value);
        }
        builder = apply_body(builder, &request.body);

        match builder.send().await {
            Ok(response) => self.read_response(response, preview).await,
            Err(e) => {
                let status = e.status().map_or(500, |s| s.as_u16());
                let message = sanitize_reqwest_error(&e);
                warn!(status, url = %redact_url(&request.url), error = %message, "http request failed");
                failure(status, BTreeMap::new(), failure_payload(message), preview)
            }
        }
    }

    async fn read_response(
        &self,
        response: reqwest::Response,
        preview: RequestPreview,
    ) -> ExecutionResult {
        let status = response.status();
        let headers = redact_response_headers(response.headers());
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = match response.bytes().await {
            Ok(b) => b,
            Err(e) => {
                let message = sanitize_reqwest_error(&e);
                warn!(status = status.as_u16(), error = %message, "failed to read response body");
                return failure(status.as_u16(), headers, failure_payload(message), preview);
            }
        };
        let data = decode_body(&bytes, content_type.as_deref());

        if self.config.debug_http {
            info!(status = status.as_u16(), url = %preview.url, "http in");
        } else {
            debug!(status = status.as_u16(), "http in");
        }

        if status.is_success() {
            ExecutionResult {
                status: status.as_u16(),
                headers,
                data,
                error: false,
                request: preview,
            }
        } else {
            let data = if data.is_null() {
                Value::String(
                    status
                        .canonical_reason()
                        .unwrap_or("Request failed")
                        .to_string(),
                )
            } else {
                data
            };
            failure(status.as_u16(), headers, data, preview)
        }
    }
}

fn failure(
    status: u16,
    headers: BTreeMap<String, String>,
    data: Value,
    request: RequestPreview,
) -> ExecutionResult {
    ExecutionResult {
        status,
        headers,
        data,
        error: true,
        request,
    }
}

fn failure_payload(message: String) -> Value {
    if message.trim().is_empty() {
        Value::String("Request failed".to_string())
    } else {
        Value::String(message)
    }
}

fn apply_body(request: reqwest::RequestBuilder, body: &Value) -> reqwest::RequestBuilder {
    match body {
        Value::Null => request,
        Value::String(s) => request.body(s.clone()),
        other => request.json(other),
    }
}

fn body_preview(body: &Value, max_bytes: usize) -> Option<String> {
    let text = match body {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).ok()?,
    };
    if text.is_empty() {
        return None;
    }
    Some(truncate_with_marker(&text, max_bytes))
}

/// JSON when the body parses as JSON, otherwise text. Non-UTF-8 bodies become a base64
/// envelope; an empty body is `null`.
#[must_use]
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
        Err(_) => {
            let mime_type = content_type
                .and_then(|ct| ct.parse::<Mime>().ok())
                .map(|m| m.essence_str().to_string());
            json!({
                "encoding": "base64",
                "mimeType": mime_type,
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        }
    }
}
