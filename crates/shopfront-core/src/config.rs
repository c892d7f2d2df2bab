//! Configuration loading and validation.
//!
//! Every setting can come from the JSON5 config file or, when the file leaves
//! it unset, from the environment variables the storefront deployment uses
//! (`AGENT_PROVIDER`, `OPENAI_API_KEY`, `LLAMA_STACK_URL`, `MCP_SERVER_URL`, ...).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

const DEFAULT_PROVIDER: &str = "openai";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_LLAMA_STACK_URL: &str = "http://localhost:8321";
const DEFAULT_LLAMA_STACK_MODEL: &str = "openai/gpt-4o";
const DEFAULT_TOOL_GROUP: &str = "ecommerce-api";
const DEFAULT_MAX_TOOL_ROUNDS: u32 = 10;
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// The provider families an agent can be built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Chat completions with a local tool-calling loop.
    OpenAi,
    /// Remote agent sessions with server-side tool calling.
    LlamaStack,
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open-ai" | "open_ai" => Ok(Self::OpenAi),
            "llamastack" | "llama-stack" | "llama_stack" => Ok(Self::LlamaStack),
            _ => Err(AgentError::Configuration(format!(
                "Unknown agent provider: {s}. Use 'openai' or 'llamastack'"
            ))),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::LlamaStack => write!(f, "llamastack"),
        }
    }
}

/// Top-level Shopfront configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<OpenAiConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub llama_stack: Option<LlamaStackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Provider family: "openai" or "llamastack" (and their spellings).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Replaces the built-in shopping assistant instructions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Upper bound on tool-execution rounds per message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_rounds: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl OpenAiConfig {
    /// Resolve the API key: check `api_key` field first, then `api_key_env` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlamaStackConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool group registered on the Llama Stack server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_group: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Full URL of the tool server's JSON-RPC endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "shopfront_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        return env_value(env);
    }
    None
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| AgentError::Configuration(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Provider family name as configured (not yet validated).
    pub fn agent_provider(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.provider.clone())
            .or_else(|| env_value("AGENT_PROVIDER"))
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
    }

    /// The configured provider family.
    pub fn provider_kind(&self) -> crate::error::Result<ProviderKind> {
        self.agent_provider().parse()
    }

    /// Custom instructions, if any.
    pub fn instructions(&self) -> Option<&str> {
        self.agent.as_ref().and_then(|a| a.instructions.as_deref())
    }

    pub fn max_tool_rounds(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_rounds)
            .unwrap_or(DEFAULT_MAX_TOOL_ROUNDS)
    }

    pub fn openai_api_key(&self) -> Option<String> {
        self.openai
            .as_ref()
            .and_then(|o| o.resolve_api_key())
            .or_else(|| env_value("OPENAI_API_KEY"))
    }

    pub fn openai_base_url(&self) -> String {
        self.openai
            .as_ref()
            .and_then(|o| o.base_url.clone())
            .or_else(|| env_value("OPENAI_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
    }

    pub fn openai_model(&self) -> String {
        self.openai
            .as_ref()
            .and_then(|o| o.model.clone())
            .or_else(|| env_value("OPENAI_MODEL"))
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string())
    }

    pub fn llama_stack_url(&self) -> String {
        self.llama_stack
            .as_ref()
            .and_then(|l| l.url.clone())
            .or_else(|| env_value("LLAMA_STACK_URL"))
            .unwrap_or_else(|| DEFAULT_LLAMA_STACK_URL.to_string())
    }

    pub fn llama_stack_model(&self) -> String {
        self.llama_stack
            .as_ref()
            .and_then(|l| l.model.clone())
            .or_else(|| env_value("INFERENCE_MODEL"))
            .or_else(|| env_value("MODEL_ID"))
            .unwrap_or_else(|| DEFAULT_LLAMA_STACK_MODEL.to_string())
    }

    pub fn tool_group(&self) -> String {
        self.llama_stack
            .as_ref()
            .and_then(|l| l.tool_group.clone())
            .or_else(|| env_value("TOOL_GROUP_ID"))
            .unwrap_or_else(|| DEFAULT_TOOL_GROUP.to_string())
    }

    /// JSON-RPC endpoint of the tool server. `None` disables tools.
    ///
    /// `MCP_SERVER_URL` names the server root; the endpoint lives under `/mcp`.
    pub fn tool_server_url(&self) -> Option<String> {
        self.tools
            .as_ref()
            .and_then(|t| t.server_url.clone())
            .or_else(|| {
                env_value("MCP_SERVER_URL")
                    .map(|root| format!("{}/mcp", root.trim_end_matches('/')))
            })
    }

    pub fn tool_timeout_secs(&self) -> u64 {
        self.tools
            .as_ref()
            .and_then(|t| t.timeout_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS)
    }

    /// Get a config value by dotted path (e.g. "agent.provider", "openai.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let kind = match self.provider_kind() {
            Ok(kind) => Some(kind),
            Err(e) => {
                errors.push(e.to_string());
                None
            }
        };
        let is_openai = kind == Some(ProviderKind::OpenAi);

        if is_openai && self.openai_api_key().is_none() {
            errors.push("Provider 'openai' has no API key configured".to_string());
        }

        if is_openai && self.tool_server_url().is_none() {
            warnings.push("No tool server configured; tools are disabled".to_string());
        }

        if self.max_tool_rounds() == 0 {
            errors.push("agent.max_tool_rounds cannot be 0".to_string());
        }

        if let Some(logging) = &self.logging {
            if !matches!(logging.format.as_str(), "plain" | "json") {
                warnings.push(format!(
                    "Unknown log format '{}', falling back to plain",
                    logging.format
                ));
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Shopfront data: `~/.shopfront/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shopfront")
}
