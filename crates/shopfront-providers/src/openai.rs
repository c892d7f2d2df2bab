//! OpenAI Chat Completions backend.
//!
//! Streams `/v1/chat/completions` and turns every SSE chunk into a
//! [`ChatChunk`]. Tool-call fragments are forwarded as they arrive; the
//! caller reassembles them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use shopfront_core::error::{AgentError, Result};

use crate::sse::parse_sse_stream;
use crate::{ChatBackend, ChatChunk, ChatRequest, ChunkStream, FinishReason, ToolCallFragment};

const OPENAI_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiBackend {
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, base_url: Option<&str>) -> Self {
        Self {
            base_url: normalize_base_url(base_url.unwrap_or(OPENAI_BASE_URL)),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

/// Strip trailing slashes and a trailing `/v1`, so both
/// `https://api.openai.com` and `https://api.openai.com/v1` work.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string()
}

// --- OpenAI request/response types ---

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [serde_json::Value],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [serde_json::Value]>,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<ChatCompletionChunk> for ChatChunk {
    fn from(chunk: ChatCompletionChunk) -> Self {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return ChatChunk::default();
        };

        let tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let function = tc.function.unwrap_or_default();
                ToolCallFragment {
                    index: tc.index,
                    id: tc.id,
                    name: function.name,
                    arguments: function.arguments,
                }
            })
            .collect();

        ChatChunk {
            delta: choice.delta.content.filter(|c| !c.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
        }
    }
}

/// Decode one SSE `data:` payload. `Ok(None)` means "nothing to forward".
fn decode_chunk(data: &str) -> Result<Option<ChatChunk>> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)?;
    let chunk = ChatChunk::from(chunk);
    if chunk == ChatChunk::default() {
        return Ok(None);
    }
    Ok(Some(chunk))
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    fn id(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let body = OpenAiRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            tools: request.tools.as_deref(),
            stream_options: StreamOptions {
                include_usage: false,
            },
        };

        debug!(
            model = %request.model,
            base_url = %self.base_url,
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "Streaming OpenAI chat completion"
        );

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(AgentError::transport)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Status {
                service: "OpenAI API".into(),
                status,
                body,
            });
        }

        let chunks = parse_sse_stream(response)
            .take_while(|event| {
                // OpenAI terminates with "data: [DONE]"
                !matches!(event, Ok(e) if e.data.trim() == "[DONE]")
            })
            .filter_map(|event| match event {
                Ok(event) => match decode_chunk(event.data.trim()) {
                    Ok(chunk) => chunk.map(Ok),
                    Err(e) => {
                        warn!(%e, data = %event.data, "Skipping malformed OpenAI chunk");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            });

        Ok(Box::pin(chunks))
    }
}
