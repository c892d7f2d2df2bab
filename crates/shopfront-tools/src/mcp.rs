//! JSON-RPC client for the tool server.
//!
//! Requests are `{jsonrpc, id, method, params}` POSTed to one endpoint. The
//! server may answer with plain JSON or with an SSE body in which progress
//! notifications precede the final result frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, trace};

use shopfront_core::error::{AgentError, Result};
use shopfront_core::types::ToolDescriptor;
use shopfront_providers::sse::data_lines;

use crate::ToolRuntime;

pub struct McpClient {
    endpoint: String,
    next_id: AtomicU64,
    client: reqwest::Client,
}

impl McpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Invoke a JSON-RPC method and return the `result` member of its reply.
    pub async fn call_method(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, endpoint = %self.endpoint, "Tool server request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(AgentError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                service: format!("Tool server ({method})"),
                status: status.as_u16(),
                body,
            });
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/event-stream"));
        let body = response.text().await.map_err(AgentError::transport)?;

        extract_result(method, &body, is_sse)
    }
}

/// A JSON-RPC response carries an `id` and either `result` or `error`.
fn is_response(message: &Value) -> bool {
    message.get("id").is_some_and(|id| !id.is_null())
        && (message.get("result").is_some() || message.get("error").is_some())
}

fn unwrap_envelope(method: &str, mut envelope: Value) -> Result<Value> {
    if let Some(error) = envelope.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AgentError::Protocol(format!("{method} failed: {message}")));
    }
    Ok(envelope["result"].take())
}

/// Find the response envelope in a reply body.
///
/// In an SSE body, notification frames are skipped and the last response
/// frame wins.
fn extract_result(method: &str, body: &str, is_sse: bool) -> Result<Value> {
    if !is_sse {
        let envelope: Value = serde_json::from_str(body)
            .map_err(|e| AgentError::Protocol(format!("{method}: invalid JSON reply: {e}")))?;
        if !is_response(&envelope) {
            return Err(AgentError::Protocol(format!(
                "{method}: reply has no JSON-RPC result"
            )));
        }
        return unwrap_envelope(method, envelope);
    }

    let mut last = None;
    for data in data_lines(body) {
        match serde_json::from_str::<Value>(data) {
            Ok(frame) if is_response(&frame) => last = Some(frame),
            Ok(frame) => {
                let kind = frame.get("method").and_then(Value::as_str).unwrap_or("unknown");
                trace!(method, notification = kind, "Skipping tool server notification");
            }
            Err(e) => trace!(%e, data, "Skipping unparseable SSE frame"),
        }
    }

    match last {
        Some(envelope) => unwrap_envelope(method, envelope),
        None => Err(AgentError::Protocol(format!(
            "{method}: no result found in SSE response"
        ))),
    }
}

#[async_trait]
impl ToolRuntime for McpClient {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.call_method("tools/list", json!({})).await?;
        let tools = match result.get("tools") {
            Some(tools) => serde_json::from_value(tools.clone())
                .map_err(|e| AgentError::Protocol(format!("tools/list: {e}")))?,
            None => Vec::new(),
        };
        info!(count = tools.len(), endpoint = %self.endpoint, "Loaded tools from tool server");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        self.call_method(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}
