//! Store tools, as seen by the agent.
//!
//! Tools live on an external tool server and are reached through a
//! [`ToolRuntime`]. The [`ToolCatalog`] holds what the server advertised and
//! renders it as function-tool schemas for a chat backend.

use async_trait::async_trait;
use serde_json::{Value, json};

use shopfront_core::error::Result;
use shopfront_core::types::ToolDescriptor;

pub mod mcp;

pub use mcp::McpClient;

/// Something that can list and run tools.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    /// Fetch the available tools.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run one tool and return its raw result.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value>;
}

/// Tools loaded from a runtime, in the order the runtime listed them.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog; a later descriptor replaces an earlier one of the same name.
    pub fn from_tools(tools: Vec<ToolDescriptor>) -> Self {
        let mut catalog = Self::new();
        for tool in tools {
            catalog.register(tool);
        }
        catalog
    }

    pub fn register(&mut self, tool: ToolDescriptor) {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate function-tool definitions for a chat-completions request.
    ///
    /// Object schemas always carry `properties`, and every tool has a
    /// description, since chat backends reject either being absent.
    pub fn to_function_tools(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                let mut parameters = serde_json::to_value(&t.input_schema)
                    .unwrap_or_else(|_| json!({ "type": "object" }));
                if parameters["type"] == "object" && parameters.get("properties").is_none() {
                    parameters["properties"] = json!({});
                }
                let description = t
                    .description
                    .clone()
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| format!("Execute {}", t.name));

                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": description,
                        "parameters": parameters,
                    }
                })
            })
            .collect()
    }
}
