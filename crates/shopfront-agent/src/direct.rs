//! Direct-tooling provider: runs the tool-calling loop against a chat backend.
//!
//! Each round streams one chat completion. Text is forwarded as it arrives and
//! tool-call fragments are accumulated. When the backend finishes a round by
//! requesting tools, every call is announced, executed through the tool
//! runtime and answered, then the extended conversation is streamed again.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use shopfront_core::error::{AgentError, Result};
use shopfront_core::types::{Message, StreamEvent, ToolCallRequest, ToolCallResult};
use shopfront_providers::{ChatBackend, ChatRequest, FinishReason};
use shopfront_tools::{ToolCatalog, ToolRuntime};

use crate::accumulator::ToolCallAccumulator;
use crate::{AgentProvider, EventStream};

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;

pub struct DirectToolingProvider {
    backend: Arc<dyn ChatBackend>,
    runtime: Option<Arc<dyn ToolRuntime>>,
    catalog: ToolCatalog,
    model: String,
    instructions: String,
    max_tool_rounds: u32,
}

/// How a round ended.
#[derive(Debug, PartialEq)]
enum RoundEnd {
    Stop,
    ToolCalls(Vec<ToolCallRequest>),
}

impl DirectToolingProvider {
    /// Without a runtime the provider behaves as a plain chat client.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        runtime: Option<Arc<dyn ToolRuntime>>,
        model: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            runtime,
            catalog: ToolCatalog::new(),
            model: model.into(),
            instructions: instructions.into(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn tools_enabled(&self) -> bool {
        self.runtime.is_some()
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    async fn load_catalog(&mut self) -> Result<usize> {
        let Some(runtime) = &self.runtime else {
            info!("No tool server configured, running without tools");
            return Ok(0);
        };
        let tools = runtime.list_tools().await?;
        self.catalog = ToolCatalog::from_tools(tools);
        for tool in self.catalog.tools() {
            debug!(
                tool = %tool.name,
                description = tool.description.as_deref().unwrap_or(""),
                "Tool available"
            );
        }
        Ok(self.catalog.len())
    }

    fn build_messages(&self, message: &str, history: &[Message]) -> Vec<Value> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(json!({ "role": "system", "content": self.instructions }));
        messages.extend(
            history
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content })),
        );
        messages.push(json!({ "role": "user", "content": message }));
        messages
    }

    async fn execute(&self, call: &ToolCallRequest, arguments: Value) -> ToolCallResult {
        let Some(runtime) = &self.runtime else {
            warn!(tool = %call.name, "Tool requested but no tool server is configured");
            return ToolCallResult::failure(&call.id, "No tool server configured");
        };
        if !self.catalog.is_empty() && self.catalog.get(&call.name).is_none() {
            let err = AgentError::ToolExecution(format!("Unknown tool: {}", call.name));
            warn!(%err, "Model requested a tool outside the catalog");
            return ToolCallResult::failure(&call.id, err);
        }

        info!(tool = %call.name, id = %call.id, "Executing tool");
        match runtime.call_tool(&call.name, arguments).await {
            Ok(result) => ToolCallResult {
                id: call.id.clone(),
                result,
            },
            Err(e) => {
                warn!(%e, tool = %call.name, "Tool execution error");
                ToolCallResult::failure(&call.id, e)
            }
        }
    }
}

/// Decide what a finished round asks for.
fn classify_round(finish: Option<FinishReason>, calls: ToolCallAccumulator) -> Result<RoundEnd> {
    match finish {
        Some(FinishReason::ToolCalls) if !calls.is_empty() => Ok(RoundEnd::ToolCalls(calls.finish())),
        Some(FinishReason::ToolCalls) => {
            warn!("Backend requested tools without sending any tool call");
            Ok(RoundEnd::Stop)
        }
        Some(reason) => {
            if !calls.is_empty() {
                warn!(?reason, pending = calls.len(), "Ignoring tool calls of a round that did not request them");
            }
            Ok(RoundEnd::Stop)
        }
        None if calls.is_empty() => Ok(RoundEnd::Stop),
        None => Err(AgentError::Protocol(
            "stream ended before the requested tool calls were complete".into(),
        )),
    }
}

fn assistant_message(text: &str, calls: &[ToolCallRequest]) -> Value {
    let content = if text.is_empty() {
        Value::Null
    } else {
        Value::String(text.to_string())
    };
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|c| {
            let arguments = if c.arguments.trim().is_empty() {
                "{}"
            } else {
                c.arguments.as_str()
            };
            json!({
                "id": c.id,
                "type": "function",
                "function": { "name": c.name, "arguments": arguments },
            })
        })
        .collect();
    json!({ "role": "assistant", "content": content, "tool_calls": tool_calls })
}

fn tool_message(result: &ToolCallResult) -> Value {
    json!({
        "role": "tool",
        "tool_call_id": result.id,
        "content": result.result.to_string(),
    })
}

#[async_trait]
impl AgentProvider for DirectToolingProvider {
    fn name(&self) -> &str {
        self.backend.id()
    }

    async fn initialize(&mut self) -> Result<()> {
        let count = self.load_catalog().await?;
        info!(provider = %self.backend.id(), model = %self.model, tools = count, "Direct-tooling provider initialized");
        Ok(())
    }

    fn send_message<'a>(
        &'a mut self,
        message: &'a str,
        history: &'a [Message],
    ) -> EventStream<'a> {
        let this = &*self;
        Box::pin(stream! {
            let mut messages = this.build_messages(message, history);
            let tools = (!this.catalog.is_empty()).then(|| this.catalog.to_function_tools());
            let mut tool_rounds = 0u32;

            loop {
                let request = ChatRequest {
                    model: this.model.clone(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                };
                debug!(round = tool_rounds + 1, messages = request.messages.len(), "Opening chat stream");

                let mut chunks = match this.backend.stream(&request).await {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        error!(%e, "Chat backend stream error");
                        yield StreamEvent::error(e);
                        return;
                    }
                };

                let mut text = String::new();
                let mut calls = ToolCallAccumulator::new();
                let mut finish = None;

                while let Some(chunk) = chunks.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            error!(%e, "Chat stream chunk error");
                            yield StreamEvent::error(e);
                            return;
                        }
                    };
                    if let Some(delta) = chunk.delta {
                        text.push_str(&delta);
                        yield StreamEvent::text(delta);
                    }
                    for fragment in chunk.tool_calls {
                        calls.push(fragment);
                    }
                    if chunk.finish_reason.is_some() {
                        finish = chunk.finish_reason;
                        break;
                    }
                }
                drop(chunks);

                let calls = match classify_round(finish, calls) {
                    Ok(RoundEnd::Stop) => {
                        debug!(tool_rounds, "Turn complete");
                        yield StreamEvent::Complete;
                        return;
                    }
                    Ok(RoundEnd::ToolCalls(calls)) => calls,
                    Err(e) => {
                        error!(%e, "Chat round ended abnormally");
                        yield StreamEvent::error(e);
                        return;
                    }
                };

                if tool_rounds >= this.max_tool_rounds {
                    error!(limit = this.max_tool_rounds, "Tool round limit reached");
                    yield StreamEvent::error(format!(
                        "Exceeded the maximum of {} tool rounds",
                        this.max_tool_rounds
                    ));
                    return;
                }
                tool_rounds += 1;
                info!(
                    round = tool_rounds,
                    tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    "Backend requested tool calls"
                );

                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    let parsed = call.parse_arguments();
                    let shown = match &parsed {
                        Ok(arguments) => arguments.clone(),
                        Err(_) => Value::String(call.arguments.clone()),
                    };
                    yield StreamEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: shown,
                    };

                    let result = match parsed {
                        Ok(arguments) => this.execute(call, arguments).await,
                        Err(e) => {
                            warn!(%e, tool = %call.name, arguments = %call.arguments, "Unparseable tool arguments");
                            ToolCallResult::failure(&call.id, format!("Invalid tool arguments: {e}"))
                        }
                    };
                    yield StreamEvent::ToolResult {
                        id: result.id.clone(),
                        name: call.name.clone(),
                        result: result.result.clone(),
                    };
                    results.push(result);
                }

                messages.push(assistant_message(&text, &calls));
                messages.extend(results.iter().map(tool_message));
            }
        })
    }

    async fn reset(&mut self) -> Result<()> {
        debug!("Direct-tooling provider holds no conversation state");
        Ok(())
    }

    fn tool_names(&self) -> Vec<String> {
        self.catalog.list().into_iter().map(str::to_string).collect()
    }

    async fn reload_tools(&mut self) -> Result<usize> {
        let count = self.load_catalog().await?;
        info!(tools = count, "Tool catalog reloaded");
        Ok(count)
    }
}
