//! Managed-agent provider: relays a remote agent runtime that calls tools itself.
//!
//! The remote agent and session are created lazily on the first message and
//! again after any failure or reset. Turn events are projected onto
//! [`StreamEvent`]s; no tool is executed locally.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use chrono::Utc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

use shopfront_core::error::{AgentError, Result};
use shopfront_core::types::{Message, StreamEvent};
use shopfront_providers::{AgentBackend, AgentSpec, TurnEvent};

use crate::{AgentProvider, EventStream};

/// Remote identifiers of the current conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHandle {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
}

impl SessionHandle {
    pub fn clear(&mut self) {
        self.agent_id = None;
        self.session_id = None;
    }

    pub fn is_empty(&self) -> bool {
        self.agent_id.is_none() && self.session_id.is_none()
    }
}

pub struct ManagedAgentProvider {
    backend: Arc<dyn AgentBackend>,
    spec: AgentSpec,
    session: SessionHandle,
}

impl ManagedAgentProvider {
    pub fn new(backend: Arc<dyn AgentBackend>, spec: AgentSpec) -> Self {
        Self {
            backend,
            spec,
            session: SessionHandle::default(),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Create whichever of agent and session is missing.
    async fn ensure_session(&mut self) -> Result<(String, String)> {
        let agent_id = match &self.session.agent_id {
            Some(id) => id.clone(),
            None => {
                let id = self.backend.create_agent(&self.spec).await?;
                self.session.agent_id = Some(id.clone());
                id
            }
        };
        let session_id = match &self.session.session_id {
            Some(id) => id.clone(),
            None => {
                let name = format!("session-{}", Utc::now().timestamp_millis());
                let id = self.backend.create_session(&agent_id, &name).await?;
                self.session.session_id = Some(id.clone());
                id
            }
        };
        Ok((agent_id, session_id))
    }
}

/// Per-turn state for projecting remote events.
///
/// The remote stream may repeat a tool-call delta, and its tool responses do
/// not always carry the id of the call they answer. Calls are therefore
/// deduplicated within a step (by remote id, else by tool name and arguments)
/// and results paired with the oldest pending call of the same tool.
#[derive(Debug, Default)]
struct TurnTranslator {
    seq: u64,
    seen: HashSet<String>,
    /// (remote call id, tool name, local id)
    pending: VecDeque<(Option<String>, String, String)>,
}

impl TurnTranslator {
    fn local_id(&mut self, tool_name: &str) -> String {
        self.seq += 1;
        format!("{tool_name}_{}_{}", Utc::now().timestamp_millis(), self.seq)
    }

    fn take_pending(&mut self, call_id: Option<&str>, tool_name: &str) -> Option<String> {
        let by_call_id = call_id.and_then(|call_id| {
            self.pending
                .iter()
                .position(|(remote, _, _)| remote.as_deref() == Some(call_id))
        });
        let position = by_call_id
            .or_else(|| self.pending.iter().position(|(_, name, _)| name == tool_name))?;
        self.pending.remove(position).map(|(_, _, local)| local)
    }

    fn translate(&mut self, event: TurnEvent) -> Vec<StreamEvent> {
        match event {
            TurnEvent::TextDelta { text } => vec![StreamEvent::text(text)],
            TurnEvent::ToolCallDelta {
                call_id,
                tool_name,
                arguments,
            } => {
                let key = call_id
                    .clone()
                    .unwrap_or_else(|| format!("{tool_name}:{arguments}"));
                if !self.seen.insert(key) {
                    return Vec::new();
                }
                debug!(tool = %tool_name, "Remote agent is calling a tool");
                let id = self.local_id(&tool_name);
                self.pending
                    .push_back((call_id, tool_name.clone(), id.clone()));
                vec![StreamEvent::ToolCall {
                    id,
                    name: tool_name,
                    arguments,
                }]
            }
            TurnEvent::ToolExecutionComplete { responses } => {
                let events = responses
                    .into_iter()
                    .map(|response| {
                        let id = match self.take_pending(response.call_id.as_deref(), &response.tool_name) {
                            Some(id) => id,
                            None => self.local_id(&response.tool_name),
                        };
                        debug!(tool = %response.tool_name, "Remote tool execution completed");
                        StreamEvent::ToolResult {
                            id,
                            name: response.tool_name,
                            result: response.content,
                        }
                    })
                    .collect();
                self.seen.clear();
                self.pending.clear();
                events
            }
            TurnEvent::TurnComplete { .. } => vec![StreamEvent::Complete],
        }
    }
}

#[async_trait]
impl AgentProvider for ManagedAgentProvider {
    fn name(&self) -> &str {
        self.backend.id()
    }

    async fn initialize(&mut self) -> Result<()> {
        info!(
            provider = %self.backend.id(),
            model = %self.spec.model,
            tool_groups = ?self.spec.tool_groups,
            "Managed-agent provider initialized; tools run on the remote agent"
        );
        Ok(())
    }

    fn send_message<'a>(
        &'a mut self,
        message: &'a str,
        history: &'a [Message],
    ) -> EventStream<'a> {
        let this = self;
        Box::pin(stream! {
            let (agent_id, session_id) = match this.ensure_session().await {
                Ok(ids) => ids,
                Err(e) => {
                    error!(%e, "Failed to provision remote agent session");
                    this.session.clear();
                    yield StreamEvent::error(e);
                    return;
                }
            };
            if !history.is_empty() {
                debug!(history = history.len(), "Remote session keeps its own history");
            }

            let mut turn = match this.backend.create_turn(&agent_id, &session_id, message).await {
                Ok(turn) => turn,
                Err(e) => {
                    error!(%e, %agent_id, %session_id, "Failed to start turn");
                    if e.is_transport() {
                        this.session.clear();
                    }
                    yield StreamEvent::error(e);
                    return;
                }
            };

            let mut translator = TurnTranslator::default();
            while let Some(event) = turn.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        error!(%e, "Turn stream error");
                        if e.is_transport() {
                            this.session.clear();
                        }
                        yield StreamEvent::error(e);
                        return;
                    }
                };
                for out in translator.translate(event) {
                    let terminal = out.is_terminal();
                    yield out;
                    if terminal {
                        return;
                    }
                }
            }

            error!(%agent_id, %session_id, "Turn stream ended without completing");
            this.session.clear();
            yield StreamEvent::error(AgentError::Protocol(
                "turn stream ended before turn_complete".into(),
            ));
        })
    }

    async fn reset(&mut self) -> Result<()> {
        self.session.clear();
        info!("Remote agent session reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use shopfront_providers::{ToolResponse, TurnStream};

    type Turn = Result<Vec<Result<TurnEvent>>>;

    #[derive(Default)]
    struct FakeAgentBackend {
        agents: AtomicUsize,
        sessions: AtomicUsize,
        fail_next_agent: AtomicBool,
        turns: Mutex<VecDeque<Turn>>,
        turn_calls: Mutex<Vec<(String, String, String)>>,
        session_names: Mutex<Vec<String>>,
    }

    impl FakeAgentBackend {
        fn with_turns(turns: Vec<Turn>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
                ..Default::default()
            })
        }

        fn turn_calls(&self) -> Vec<(String, String, String)> {
            self.turn_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentBackend for FakeAgentBackend {
        fn id(&self) -> &str {
            "fake-stack"
        }

        async fn create_agent(&self, _spec: &AgentSpec) -> Result<String> {
            if self.fail_next_agent.swap(false, Ordering::SeqCst) {
                return Err(AgentError::Status {
                    service: "Llama Stack (create agent)".into(),
                    status: 503,
                    body: "starting".into(),
                });
            }
            let n = self.agents.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("agent-{n}"))
        }

        async fn create_session(&self, _agent_id: &str, session_name: &str) -> Result<String> {
            self.session_names
                .lock()
                .unwrap()
                .push(session_name.to_string());
            let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("sess-{n}"))
        }

        async fn create_turn(
            &self,
            agent_id: &str,
            session_id: &str,
            message: &str,
        ) -> Result<TurnStream> {
            self.turn_calls.lock().unwrap().push((
                agent_id.to_string(),
                session_id.to_string(),
                message.to_string(),
            ));
            let turn = self
                .turns
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(vec![complete()]));
            let events = turn?;
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn text(s: &str) -> Result<TurnEvent> {
        Ok(TurnEvent::TextDelta { text: s.into() })
    }

    fn tool_call(call_id: Option<&str>, name: &str) -> Result<TurnEvent> {
        Ok(TurnEvent::ToolCallDelta {
            call_id: call_id.map(str::to_string),
            tool_name: name.into(),
            arguments: json!({}),
        })
    }

    fn complete() -> Result<TurnEvent> {
        Ok(TurnEvent::TurnComplete { output: None })
    }

    fn provider(backend: Arc<FakeAgentBackend>) -> ManagedAgentProvider {
        ManagedAgentProvider::new(
            backend,
            AgentSpec {
                model: "openai/gpt-4o".into(),
                instructions: "Be helpful".into(),
                tool_groups: vec!["ecommerce-api".into()],
            },
        )
    }

    async fn run(provider: &mut ManagedAgentProvider, message: &str) -> Vec<StreamEvent> {
        provider.send_message(message, &[]).collect().await
    }

    #[tokio::test]
    async fn test_session_is_provisioned_once() {
        let backend = FakeAgentBackend::with_turns(vec![]);
        let mut provider = provider(backend.clone());
        provider.initialize().await.unwrap();

        assert_eq!(run(&mut provider, "hi").await, vec![StreamEvent::Complete]);
        assert_eq!(run(&mut provider, "again").await, vec![StreamEvent::Complete]);

        assert_eq!(backend.agents.load(Ordering::SeqCst), 1);
        assert_eq!(backend.sessions.load(Ordering::SeqCst), 1);
        let calls = backend.turn_calls();
        assert_eq!(calls[0], ("agent-1".into(), "sess-1".into(), "hi".into()));
        assert_eq!(calls[1], ("agent-1".into(), "sess-1".into(), "again".into()));
        assert!(backend.session_names.lock().unwrap()[0].starts_with("session-"));
    }

    #[tokio::test]
    async fn test_reset_provisions_fresh_ids() {
        let backend = FakeAgentBackend::with_turns(vec![]);
        let mut provider = provider(backend.clone());

        run(&mut provider, "first").await;
        provider.reset().await.unwrap();
        assert!(provider.session().is_empty());
        run(&mut provider, "second").await;

        let calls = backend.turn_calls();
        assert_eq!(calls[0].0, "agent-1");
        assert_eq!(calls[0].1, "sess-1");
        assert_eq!(calls[1].0, "agent-2");
        assert_eq!(calls[1].1, "sess-2");
    }

    #[tokio::test]
    async fn test_turn_projection() {
        let backend = FakeAgentBackend::with_turns(vec![Ok(vec![
            text("Let me check. "),
            tool_call(Some("c1"), "get_api-products"),
            tool_call(Some("c1"), "get_api-products"),
            Ok(TurnEvent::ToolExecutionComplete {
                responses: vec![ToolResponse {
                    call_id: None,
                    tool_name: "get_api-products".into(),
                    content: json!("[{\"id\":\"1\"}]"),
                }],
            }),
            text("We have one product."),
            complete(),
        ])]);
        let mut provider = provider(backend);

        let events = run(&mut provider, "show me products").await;
        assert_eq!(events.len(), 5, "events: {events:?}");
        assert_eq!(events[0], StreamEvent::text("Let me check. "));
        let StreamEvent::ToolCall { id: call_id, name, .. } = &events[1] else {
            panic!("expected a tool call");
        };
        assert_eq!(name, "get_api-products");
        assert!(call_id.starts_with("get_api-products_"));
        let StreamEvent::ToolResult { id: result_id, result, .. } = &events[2] else {
            panic!("expected a tool result");
        };
        assert_eq!(result_id, call_id);
        assert_eq!(result, &json!("[{\"id\":\"1\"}]"));
        assert_eq!(events[3], StreamEvent::text("We have one product."));
        assert_eq!(events[4], StreamEvent::Complete);
    }

    #[tokio::test]
    async fn test_same_tool_called_again_after_execution() {
        let backend = FakeAgentBackend::with_turns(vec![Ok(vec![
            tool_call(None, "get_api-cart"),
            Ok(TurnEvent::ToolExecutionComplete {
                responses: vec![ToolResponse {
                    call_id: None,
                    tool_name: "get_api-cart".into(),
                    content: json!({"items": []}),
                }],
            }),
            tool_call(None, "get_api-cart"),
            complete(),
        ])]);
        let mut provider = provider(backend);

        let events = run(&mut provider, "cart twice").await;
        let calls: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCall { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_provisioning_failure() {
        let backend = FakeAgentBackend::with_turns(vec![]);
        backend.fail_next_agent.store(true, Ordering::SeqCst);
        let mut provider = provider(backend.clone());

        let events = run(&mut provider, "hi").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { message } if message.contains("503")));
        assert!(provider.session().is_empty());
        assert!(backend.turn_calls().is_empty());

        assert_eq!(run(&mut provider, "hi").await, vec![StreamEvent::Complete]);
        assert_eq!(backend.agents.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_turn_open_failure_clears_session() {
        let backend = FakeAgentBackend::with_turns(vec![Err(AgentError::Status {
            service: "Llama Stack (create turn)".into(),
            status: 500,
            body: "boom".into(),
        })]);
        let mut provider = provider(backend.clone());

        let events = run(&mut provider, "hi").await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { .. }));
        assert!(provider.session().is_empty());

        run(&mut provider, "retry").await;
        assert_eq!(backend.turn_calls()[1].0, "agent-2");
    }

    #[tokio::test]
    async fn test_mid_stream_failure_clears_session() {
        let backend = FakeAgentBackend::with_turns(vec![Ok(vec![
            text("Working"),
            Err(AgentError::Transport("connection reset".into())),
        ])]);
        let mut provider = provider(backend);

        let events = run(&mut provider, "hi").await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
        assert!(provider.session().is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_turn_is_an_error() {
        let backend = FakeAgentBackend::with_turns(vec![Ok(vec![text("Half an answer")])]);
        let mut provider = provider(backend);

        let events = run(&mut provider, "hi").await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StreamEvent::Error { message } if message.contains("turn_complete")));
        assert!(provider.session().is_empty());
    }

    #[test]
    fn test_distinct_calls_without_remote_id() {
        let mut translator = TurnTranslator::default();
        let delta = |product: &str| TurnEvent::ToolCallDelta {
            call_id: None,
            tool_name: "get_api-products-id".into(),
            arguments: json!({"id": product}),
        };

        assert_eq!(translator.translate(delta("1")).len(), 1);
        assert!(translator.translate(delta("1")).is_empty());
        assert_eq!(translator.translate(delta("2")).len(), 1);
        assert_eq!(translator.pending.len(), 2);
    }

    #[test]
    fn test_results_pair_by_remote_call_id() {
        let mut translator = TurnTranslator::default();
        let first = translator.translate(TurnEvent::ToolCallDelta {
            call_id: Some("a".into()),
            tool_name: "get_api-cart".into(),
            arguments: json!({}),
        });
        let second = translator.translate(TurnEvent::ToolCallDelta {
            call_id: Some("b".into()),
            tool_name: "get_api-cart".into(),
            arguments: json!({"userId": "2"}),
        });
        let results = translator.translate(TurnEvent::ToolExecutionComplete {
            responses: vec![
                ToolResponse {
                    call_id: Some("b".into()),
                    tool_name: "get_api-cart".into(),
                    content: json!(2),
                },
                ToolResponse {
                    call_id: Some("a".into()),
                    tool_name: "get_api-cart".into(),
                    content: json!(1),
                },
            ],
        });

        let id_of = |events: &[StreamEvent]| match &events[0] {
            StreamEvent::ToolCall { id, .. } | StreamEvent::ToolResult { id, .. } => id.clone(),
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(id_of(&results[0..1]), id_of(&second));
        assert_eq!(id_of(&results[1..2]), id_of(&first));
    }
}
