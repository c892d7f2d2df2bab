//! Streaming LLM backends.
//!
//! Two backend families sit behind two traits:
//!
//! * [`ChatBackend`]: a raw chat-completion endpoint that streams text and
//!   partial tool-call fragments. The caller owns the tool-calling loop.
//! * [`AgentBackend`]: a managed agent/session endpoint that runs tools
//!   server-side and streams step events for a whole turn.
//!
//! Both hand back raw, per-chunk deltas; nothing here reassembles tool calls.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use shopfront_core::error::Result;

pub mod llama_stack;
pub mod openai;
pub mod sse;

/// A chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    /// Wire-format messages, system message first.
    pub messages: Vec<serde_json::Value>,
    /// Function-tool schemas; `None` sends a plain chat request.
    pub tools: Option<Vec<serde_json::Value>>,
}

/// Why the backend ended a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn parse(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "tool_calls" => Self::ToolCalls,
            "length" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One piece of a tool call as it arrives on the token stream.
///
/// `index` distinguishes calls opened in the same round. The first fragment
/// of a call usually carries `id` and `name`; later ones only `arguments`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// A streamed chunk from a chat backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatChunk {
    pub delta: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<FinishReason>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// A chat-completion endpoint with inline function calling.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Backend identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Open a token stream for one round.
    async fn stream(&self, request: &ChatRequest) -> Result<ChunkStream>;
}

/// Settings for provisioning a remote agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub model: String,
    pub instructions: String,
    pub tool_groups: Vec<String>,
}

/// A tool response reported by the remote agent runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub call_id: Option<String>,
    pub tool_name: String,
    pub content: serde_json::Value,
}

/// A step event of a managed-agent turn, reduced to what callers render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        call_id: Option<String>,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolExecutionComplete {
        responses: Vec<ToolResponse>,
    },
    TurnComplete {
        output: Option<String>,
    },
}

pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent>> + Send>>;

/// A managed agent/session endpoint that performs tool calling itself.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Backend identifier (e.g., "llama-stack").
    fn id(&self) -> &str;

    /// Create an agent and return its id.
    async fn create_agent(&self, spec: &AgentSpec) -> Result<String>;

    /// Create a session under `agent_id` and return its id.
    async fn create_session(&self, agent_id: &str, session_name: &str) -> Result<String>;

    /// Start a streaming turn with one user message.
    async fn create_turn(
        &self,
        agent_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<TurnStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::parse("tool_calls"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::parse("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::parse("content_filter"),
            FinishReason::Other("content_filter".into())
        );
    }
}
