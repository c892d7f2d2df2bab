//! Provider selection from configuration.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use shopfront_core::config::{Config, ProviderKind};
use shopfront_core::error::{AgentError, Result};
use shopfront_providers::AgentSpec;
use shopfront_providers::llama_stack::LlamaStackBackend;
use shopfront_providers::openai::OpenAiBackend;
use shopfront_tools::{McpClient, ToolRuntime};

use crate::direct::DirectToolingProvider;
use crate::managed::ManagedAgentProvider;
use crate::prompt::build_instructions;
use crate::AgentProvider;

/// Build the tool runtime client, if a tool server is configured.
pub fn create_tool_runtime(config: &Config) -> Result<Option<Arc<dyn ToolRuntime>>> {
    let Some(url) = config.tool_server_url() else {
        return Ok(None);
    };
    let timeout = Duration::from_secs(config.tool_timeout_secs());
    let client = McpClient::new(url, timeout)?;
    Ok(Some(Arc::new(client)))
}

/// Construct the configured provider. No network activity happens here;
/// call [`AgentProvider::initialize`] on the result.
pub fn create_agent_provider(config: &Config) -> Result<Box<dyn AgentProvider>> {
    let kind = config.provider_kind()?;
    let instructions = build_instructions(config);
    info!(%kind, "Creating agent provider");

    match kind {
        ProviderKind::OpenAi => {
            let api_key = config.openai_api_key().ok_or_else(|| {
                AgentError::Configuration(
                    "OpenAI API key is required (set OPENAI_API_KEY or openai.api_key)".into(),
                )
            })?;
            let backend = OpenAiBackend::new(api_key, Some(&config.openai_base_url()));
            let runtime = create_tool_runtime(config)?;
            match config.tool_server_url() {
                Some(url) => info!(%url, "Tool server configured"),
                None => info!("No tool server configured, tools disabled"),
            }
            let provider = DirectToolingProvider::new(
                Arc::new(backend),
                runtime,
                config.openai_model(),
                instructions,
            )
            .with_max_tool_rounds(config.max_tool_rounds());
            Ok(Box::new(provider))
        }
        ProviderKind::LlamaStack => {
            let backend = LlamaStackBackend::new(Some(&config.llama_stack_url()));
            let spec = AgentSpec {
                model: config.llama_stack_model(),
                instructions,
                tool_groups: vec![config.tool_group()],
            };
            Ok(Box::new(ManagedAgentProvider::new(Arc::new(backend), spec)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfront_core::config::{AgentConfig, OpenAiConfig, ToolsConfig};

    fn config_for(provider: &str) -> Config {
        Config {
            agent: Some(AgentConfig {
                provider: Some(provider.into()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_kind_synonyms() {
        for name in ["openai", "OpenAI", "open-ai", "open_ai", " OPENAI "] {
            assert_eq!(name.parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        }
        for name in ["llamastack", "llama-stack", "llama_stack", "LlamaStack", "LLAMA-STACK"] {
            assert_eq!(name.parse::<ProviderKind>().unwrap(), ProviderKind::LlamaStack);
        }
    }

    #[test]
    fn test_unknown_kind() {
        let err = "anthropic".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, AgentError::Configuration(_)));
        assert!(err.to_string().contains("anthropic"));

        let err = create_agent_provider(&config_for("bedrock")).err().unwrap();
        assert!(err.to_string().contains("bedrock"));
    }

    #[test]
    fn test_creates_direct_provider() {
        let mut config = config_for("openai");
        config.openai = Some(OpenAiConfig {
            api_key: Some("sk-test".into()),
            ..Default::default()
        });
        config.tools = Some(ToolsConfig {
            server_url: Some("http://localhost:8000/mcp".into()),
            ..Default::default()
        });
        let provider = create_agent_provider(&config).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_creates_managed_provider() {
        let provider = create_agent_provider(&config_for("Llama_Stack")).unwrap();
        assert_eq!(provider.name(), "llama-stack");
    }

    #[test]
    fn test_missing_api_key() {
        if std::env::var("OPENAI_API_KEY").is_ok() {
            return;
        }
        let err = create_agent_provider(&config_for("openai")).err().unwrap();
        assert!(matches!(err, AgentError::Configuration(_)));
    }

    #[test]
    fn test_tool_runtime_requires_server() {
        let mut config = Config::default();
        config.tools = Some(ToolsConfig {
            server_url: Some("http://localhost:8000/mcp".into()),
            timeout_secs: Some(5),
        });
        assert!(create_tool_runtime(&config).unwrap().is_some());
    }
}
