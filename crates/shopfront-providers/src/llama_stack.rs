//! Llama Stack agents API backend.
//!
//! Agents, sessions and turns live on the Llama Stack server, which also
//! runs the tools of the configured tool groups. A turn streams step events
//! as SSE; this module reduces them to [`TurnEvent`]s.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use shopfront_core::error::{AgentError, Result};

use crate::sse::parse_sse_stream;
use crate::{AgentBackend, AgentSpec, ToolResponse, TurnEvent, TurnStream};

const LLAMA_STACK_URL: &str = "http://localhost:8321";

pub struct LlamaStackBackend {
    pub base_url: String,
    client: reqwest::Client,
}

impl LlamaStackBackend {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(LLAMA_STACK_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn post_json(&self, path: &str, body: &Value, what: &str) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(AgentError::transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                service: format!("Llama Stack ({what})"),
                status,
                body,
            });
        }

        response.json().await.map_err(AgentError::protocol)
    }
}

fn required_string(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AgentError::Protocol(format!("response is missing '{field}'")))
}

// --- Llama Stack turn stream types ---

#[derive(Debug, Deserialize)]
struct TurnChunk {
    event: ChunkEvent,
}

#[derive(Debug, Deserialize)]
struct ChunkEvent {
    payload: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawToolCall {
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    tool_name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawToolResponse {
    #[serde(default)]
    call_id: Option<String>,
    tool_name: String,
    #[serde(default)]
    content: Value,
}

/// Decode one SSE `data:` payload. `Ok(None)` means "not interesting".
fn decode_turn_event(data: &str) -> Result<Option<TurnEvent>> {
    let chunk: TurnChunk = serde_json::from_str(data)?;
    let payload = chunk.event.payload;

    let event = match payload.get("event_type").and_then(Value::as_str) {
        Some("step_progress") => {
            let delta = &payload["delta"];
            match delta.get("type").and_then(Value::as_str) {
                Some("text") => delta
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|text| TurnEvent::TextDelta {
                        text: text.to_string(),
                    }),
                // While the model is still typing the call, `tool_call` is a
                // partial string; only the parsed object names a tool.
                Some("tool_call") => {
                    let call: RawToolCall =
                        serde_json::from_value(delta["tool_call"].clone()).unwrap_or_default();
                    call.tool_name.map(|tool_name| TurnEvent::ToolCallDelta {
                        call_id: call.call_id,
                        tool_name,
                        arguments: call.arguments.unwrap_or_else(|| json!({})),
                    })
                }
                _ => None,
            }
        }
        Some("step_complete") => {
            let details = &payload["step_details"];
            if details.get("step_type").and_then(Value::as_str) == Some("tool_execution") {
                let responses: Vec<RawToolResponse> = serde_json::from_value(
                    details
                        .get("tool_responses")
                        .cloned()
                        .unwrap_or_else(|| json!([])),
                )?;
                Some(TurnEvent::ToolExecutionComplete {
                    responses: responses
                        .into_iter()
                        .map(|r| ToolResponse {
                            call_id: r.call_id,
                            tool_name: r.tool_name,
                            content: r.content,
                        })
                        .collect(),
                })
            } else {
                None
            }
        }
        Some("turn_complete") => Some(TurnEvent::TurnComplete {
            output: payload
                .pointer("/turn/output_message/content")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => None,
    };

    Ok(event)
}

#[async_trait]
impl AgentBackend for LlamaStackBackend {
    fn id(&self) -> &str {
        "llama-stack"
    }

    async fn create_agent(&self, spec: &AgentSpec) -> Result<String> {
        let body = json!({
            "agent_config": {
                "model": spec.model,
                "instructions": spec.instructions,
                "toolgroups": spec.tool_groups,
                "enable_session_persistence": false,
            }
        });
        let response = self.post_json("/v1/agents", &body, "create agent").await?;
        let agent_id = required_string(&response, "agent_id")?;
        info!(%agent_id, model = %spec.model, "Created Llama Stack agent");
        Ok(agent_id)
    }

    async fn create_session(&self, agent_id: &str, session_name: &str) -> Result<String> {
        let body = json!({ "session_name": session_name });
        let response = self
            .post_json(
                &format!("/v1/agents/{agent_id}/session"),
                &body,
                "create session",
            )
            .await?;
        let session_id = required_string(&response, "session_id")?;
        info!(%session_id, %agent_id, "Created Llama Stack session");
        Ok(session_id)
    }

    async fn create_turn(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<TurnStream> {
        let url = format!(
            "{}/v1/agents/{agent_id}/session/{session_id}/turn",
            self.base_url
        );
        debug!(%url, "Creating Llama Stack turn");

        let response = self
            .client
            .post(&url)
            .json(&json!({
                "messages": [{ "role": "user", "content": message }],
                "stream": true,
            }))
            .send()
            .await
            .map_err(AgentError::transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                service: "Llama Stack (create turn)".into(),
                status,
                body,
            });
        }

        let events = parse_sse_stream(response)
            .take_while(|event| !matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            .filter_map(|event| match event {
                Ok(event) => match decode_turn_event(event.data.trim()) {
                    Ok(turn_event) => turn_event.map(Ok),
                    Err(e) => {
                        warn!(%e, data = %event.data, "Skipping malformed Llama Stack event");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            });

        Ok(Box::pin(events))
    }
}
