//! Agent providers: one streaming chat interface over two tool-calling backends.
//!
//! An [`AgentProvider`] turns a user message plus history into a lazy stream
//! of [`StreamEvent`]s. The direct provider runs the tool-calling loop itself
//! against a chat-completions backend; the managed provider relays a remote
//! agent runtime that calls tools on its own.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use shopfront_core::error::Result;
use shopfront_core::types::{Message, StreamEvent};

pub mod accumulator;
pub mod conversation;
pub mod direct;
pub mod factory;
pub mod managed;
pub mod prompt;

pub use conversation::{Conversation, SharedConversation};
pub use direct::DirectToolingProvider;
pub use factory::create_agent_provider;
pub use shopfront_core::config::ProviderKind;
pub use managed::ManagedAgentProvider;

/// The events of one `send_message` call. Always ends with exactly one
/// terminal event (`complete` or `error`).
pub type EventStream<'a> = Pin<Box<dyn Stream<Item = StreamEvent> + Send + 'a>>;

/// The contract shared by every provider variant.
///
/// `send_message` borrows the provider mutably for as long as its stream
/// lives, so one instance never runs two messages at once.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Provider identifier for logs and status output.
    fn name(&self) -> &str;

    /// One-time setup, such as loading the tool catalog.
    async fn initialize(&mut self) -> Result<()>;

    /// Stream the reply to `message`. Dropping the stream abandons the turn
    /// and releases its backend connection.
    fn send_message<'a>(&'a mut self, message: &'a str, history: &'a [Message])
    -> EventStream<'a>;

    /// Forget any provider-held conversation state.
    async fn reset(&mut self) -> Result<()>;

    /// Names of the tools this provider can call locally.
    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Re-fetch the tool catalog and return the number of tools loaded.
    async fn reload_tools(&mut self) -> Result<usize> {
        Ok(0)
    }
}
