//! Default agent instructions.

use shopfront_core::config::Config;

/// Instructions used when the configuration does not provide any.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI shopping assistant for an online store. \
You help customers find products, add items to their cart, and answer questions about the store.

You have access to various tools to help customers. Use the available tools when users ask about \
products, their cart, or want to make changes. When calling tools, pass prices as JSON numbers \
(e.g., 99.99), not as strings. Do not make up product information.";

/// Resolve the instruction text for a new provider.
pub fn build_instructions(config: &Config) -> String {
    config
        .instructions()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopfront_core::config::AgentConfig;

    #[test]
    fn test_default_instructions() {
        let instructions = build_instructions(&Config::default());
        assert!(instructions.starts_with("You are a helpful AI shopping assistant"));
    }

    #[test]
    fn test_configured_instructions() {
        let config = Config {
            agent: Some(AgentConfig {
                instructions: Some("Only talk about shoes.".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(build_instructions(&config), "Only talk about shoes.");
    }

    #[test]
    fn test_blank_instructions_fall_back() {
        let config = Config {
            agent: Some(AgentConfig {
                instructions: Some("  ".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(build_instructions(&config), DEFAULT_INSTRUCTIONS);
    }
}
