//! Conversation orchestration: one provider plus its message history.

use std::sync::Arc;

use async_stream::stream;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use shopfront_core::error::{AgentError, Result};
use shopfront_core::types::{Message, StreamEvent};

use crate::{AgentProvider, EventStream};

/// Owns a provider and the chronological history of one conversation.
///
/// A user message and the assistant's reply are appended to the history
/// only when the provider completes the turn.
pub struct Conversation {
    provider: Box<dyn AgentProvider>,
    history: Vec<Message>,
}

impl Conversation {
    pub fn new(provider: Box<dyn AgentProvider>) -> Self {
        Self {
            provider,
            history: Vec::new(),
        }
    }

    pub fn provider(&self) -> &dyn AgentProvider {
        self.provider.as_ref()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub async fn initialize(&mut self) -> Result<()> {
        self.provider.initialize().await
    }

    pub fn send<'a>(&'a mut self, message: &'a str) -> EventStream<'a> {
        let Self { provider, history } = self;
        Box::pin(stream! {
            let snapshot = history.clone();
            let mut reply = String::new();
            let mut events = provider.send_message(message, &snapshot);

            while let Some(event) = events.next().await {
                match &event {
                    StreamEvent::Text { content } => reply.push_str(content),
                    StreamEvent::Complete => {
                        history.push(Message::user(message));
                        history.push(Message::assistant(std::mem::take(&mut reply)));
                        debug!(messages = history.len(), "Conversation history updated");
                    }
                    _ => {}
                }
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        })
    }

    /// Clear provider state and history.
    pub async fn reset(&mut self) -> Result<()> {
        self.provider.reset().await?;
        self.history.clear();
        Ok(())
    }

    pub async fn reload_tools(&mut self) -> Result<usize> {
        self.provider.reload_tools().await
    }
}

/// A cloneable handle to a conversation that admits one message at a time.
///
/// A message sent while another is still streaming is rejected with an
/// `error` event rather than queued.
#[derive(Clone)]
pub struct SharedConversation {
    inner: Arc<Mutex<Conversation>>,
}

impl SharedConversation {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            inner: Arc::new(Mutex::new(conversation)),
        }
    }

    pub fn send(&self, message: impl Into<String>) -> EventStream<'static> {
        let inner = self.inner.clone();
        let message = message.into();
        Box::pin(stream! {
            let mut conversation = match inner.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    warn!("Rejecting message while another is in flight");
                    yield StreamEvent::error(AgentError::Busy(
                        "a message is already being processed for this conversation".into(),
                    ));
                    return;
                }
            };
            let mut events = conversation.send(&message);
            while let Some(event) = events.next().await {
                yield event;
            }
        })
    }

    pub async fn reset(&self) -> Result<()> {
        self.inner.lock().await.reset().await
    }

    pub async fn reload_tools(&self) -> Result<usize> {
        self.inner.lock().await.reload_tools().await
    }

    pub async fn history(&self) -> Vec<Message> {
        self.inner.lock().await.history().to_vec()
    }

    pub async fn tool_names(&self) -> Vec<String> {
        self.inner.lock().await.provider().tool_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Replays scripted events and remembers the history it was given.
    struct ScriptedProvider {
        replies: VecDeque<Vec<StreamEvent>>,
        seen_history: Vec<usize>,
        resets: usize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                replies: replies.into(),
                seen_history: Vec::new(),
                resets: 0,
            }
        }
    }

    #[async_trait]
    impl AgentProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        fn send_message<'a>(
            &'a mut self,
            _message: &'a str,
            history: &'a [Message],
        ) -> EventStream<'a> {
            self.seen_history.push(history.len());
            let events = self.replies.pop_front().unwrap_or_default();
            Box::pin(futures::stream::iter(events))
        }

        async fn reset(&mut self) -> Result<()> {
            self.resets += 1;
            Ok(())
        }
    }

    fn reply(text: &[&str]) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = text.iter().map(|t| StreamEvent::text(*t)).collect();
        events.push(StreamEvent::Complete);
        events
    }

    #[tokio::test]
    async fn test_history_grows_on_complete() {
        let provider = ScriptedProvider::new(vec![
            reply(&["Hello", ", shopper"]),
            vec![StreamEvent::text("partial"), StreamEvent::error("boom")],
            reply(&["Sure"]),
        ]);
        let mut conversation = Conversation::new(Box::new(provider));

        let events: Vec<StreamEvent> = conversation.send("hi").collect().await;
        assert_eq!(events.len(), 3);
        assert_eq!(
            conversation.history(),
            &[Message::user("hi"), Message::assistant("Hello, shopper")]
        );

        let _: Vec<StreamEvent> = conversation.send("fail please").collect().await;
        assert_eq!(conversation.history().len(), 2);

        let _: Vec<StreamEvent> = conversation.send("again").collect().await;
        assert_eq!(conversation.history().len(), 4);
        assert_eq!(conversation.history()[2], Message::user("again"));
    }

    #[tokio::test]
    async fn test_history_is_updated_when_consumer_stops_at_complete() {
        let provider = ScriptedProvider::new(vec![reply(&["Done"])]);
        let mut conversation = Conversation::new(Box::new(provider));

        {
            let mut events = conversation.send("hi");
            while let Some(event) = events.next().await {
                if event == StreamEvent::Complete {
                    break;
                }
            }
        }
        assert_eq!(conversation.history().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let provider = ScriptedProvider::new(vec![reply(&["One"]), reply(&["Two"])]);
        let mut conversation = Conversation::new(Box::new(provider));

        let _: Vec<StreamEvent> = conversation.send("first").collect().await;
        conversation.reset().await.unwrap();
        assert!(conversation.history().is_empty());

        let _: Vec<StreamEvent> = conversation.send("second").collect().await;
        assert_eq!(conversation.history().len(), 2);
    }

    #[tokio::test]
    async fn test_second_message_is_rejected_while_busy() {
        let provider = ScriptedProvider::new(vec![reply(&["Looking", " it up"]), reply(&["Ok"])]);
        let shared = SharedConversation::new(Conversation::new(Box::new(provider)));

        let mut first = shared.send("show me products");
        assert_eq!(first.next().await, Some(StreamEvent::text("Looking")));

        let rejected: Vec<StreamEvent> = shared.clone().send("add a mug").collect().await;
        assert_eq!(rejected.len(), 1);
        assert!(matches!(&rejected[0], StreamEvent::Error { message } if message.contains("already")));

        let rest: Vec<StreamEvent> = first.collect().await;
        assert_eq!(rest.last(), Some(&StreamEvent::Complete));

        let accepted: Vec<StreamEvent> = shared.send("add a mug").collect().await;
        assert_eq!(accepted, reply(&["Ok"]));
        assert_eq!(shared.history().await.len(), 4);
    }
}
