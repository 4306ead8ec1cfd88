//! Session-level entry point.
//!
//! [`Agent`] owns the conversation and session context across turns and
//! runs each turn on its own task, streaming [`TurnEvent`]s back to the
//! caller. Cancellation goes through the shared [`CancellationController`].

use std::sync::Arc;
use std::time::Duration;

use helmsman_config::AppConfig;
use helmsman_core::error::Result;
use helmsman_core::event::EventBus;
use helmsman_core::message::{Conversation, Message};
use helmsman_core::task::TaskStore;
use helmsman_core::tool::{PermissionGate, ToolRegistry};
use helmsman_providers::ResilientClient;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::cancellation::{CancellationController, RequestHandle, TurnState};
use crate::context::SessionContext;
use crate::loop_runner::AgentLoop;
use crate::stream_event::TurnEvent;

/// Marks the turn finished when dropped, so a panicking turn task still
/// releases the controller.
struct FinishOnDrop {
    controller: CancellationController,
    handle: RequestHandle,
}

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.controller.finish(&self.handle);
    }
}

struct SessionState {
    conversation: Conversation,
    session: SessionContext,
}

pub struct Agent {
    agent_loop: Arc<AgentLoop>,
    controller: CancellationController,
    state: Arc<Mutex<SessionState>>,
}

impl Agent {
    pub fn new(agent_loop: AgentLoop, session: SessionContext, cancel_grace: Duration) -> Self {
        Self {
            agent_loop: Arc::new(agent_loop),
            controller: CancellationController::new(cancel_grace),
            state: Arc::new(Mutex::new(SessionState {
                conversation: Conversation::new(),
                session,
            })),
        }
    }

    /// Wire an agent from configuration with in-memory session trackers.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<ResilientClient>,
        registry: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        task_store: Arc<dyn TaskStore>,
    ) -> Self {
        let events = Arc::new(EventBus::default());
        let session = SessionContext::in_memory(config.reminders.clone(), &events);
        let agent_loop = AgentLoop::from_config(config, client, registry, gate, task_store, events);
        Self::new(
            agent_loop,
            session,
            Duration::from_millis(config.agent.cancel_grace_ms),
        )
    }

    pub fn state(&self) -> TurnState {
        self.controller.state()
    }

    /// Snapshot of the conversation. Waits for a running turn to finish.
    pub async fn conversation(&self) -> Conversation {
        self.state.lock().await.conversation.clone()
    }

    /// Start a turn with `input` as the new user message.
    ///
    /// Fails with `AlreadyActive` while another turn runs. The stream ends
    /// once the turn is over.
    pub fn start_turn(
        &self,
        input: impl Into<String>,
    ) -> Result<(RequestHandle, UnboundedReceiverStream<TurnEvent>)> {
        let handle = self.controller.start()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let input = Message::user(input);
        let agent_loop = self.agent_loop.clone();
        let controller = self.controller.clone();
        let state = self.state.clone();
        let turn = handle.clone();

        tokio::spawn(async move {
            // Declared after `tx` so the turn is finished before the stream closes
            let tx = tx;
            let finish = FinishOnDrop {
                controller,
                handle: turn.clone(),
            };
            let mut guard = state.lock().await;
            let SessionState { conversation, session } = &mut *guard;

            let mut working = conversation.clone();
            working.push(input);
            *conversation = agent_loop.run_turn(working, session, &turn, &tx).await;

            drop(guard);
            drop(finish);
            debug!(turn_id = %turn.id(), "Turn task exited");
        });

        Ok((handle, UnboundedReceiverStream::new(rx)))
    }

    /// Cancel the running turn. Returns whether the turn moved to cancelled.
    pub fn cancel(&self, handle: &RequestHandle, reason: impl Into<String>) -> bool {
        self.controller.cancel(handle, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::Compressor;
    use crate::scheduler::ToolScheduler;
    use crate::test_helpers::{SequentialMockProvider, fast_client, text_response};
    use futures::StreamExt;
    use helmsman_config::{CompressionConfig, ReminderConfig};
    use helmsman_core::error::Error;
    use crate::test_helpers::tool_use_response;
    use async_trait::async_trait;
    use helmsman_core::error::ToolError;
    use helmsman_core::message::ContentBlock;
    use helmsman_core::task::TaskItem;
    use helmsman_core::tool::{AllowAll, Tool, ToolContext, ToolResult};
    use helmsman_tools::InMemoryTaskStore;
    use serde_json::json;

    struct PanicTool;

    #[async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: &ToolContext,
        ) -> std::result::Result<ToolResult, ToolError> {
            panic!("tool blew up");
        }
    }

    /// A task store that panics on read, taking the whole turn task down.
    struct PanickingTaskStore;

    #[async_trait]
    impl TaskStore for PanickingTaskStore {
        async fn tasks(&self, _agent_id: &str) -> Vec<TaskItem> {
            panic!("task store unavailable");
        }
        async fn replace(&self, _agent_id: &str, _tasks: Vec<TaskItem>) {}
    }

    fn agent(provider: SequentialMockProvider) -> Agent {
        agent_with(
            provider,
            ToolRegistry::new(),
            Arc::new(InMemoryTaskStore::new()),
        )
    }

    fn agent_with(
        provider: SequentialMockProvider,
        registry: ToolRegistry,
        task_store: Arc<dyn TaskStore>,
    ) -> Agent {
        let events = Arc::new(EventBus::default());
        let scheduler = ToolScheduler::new(
            Arc::new(registry),
            Arc::new(AllowAll),
            events.clone(),
            "main",
        );
        let agent_loop = AgentLoop::new(
            Arc::new(fast_client(Arc::new(provider))),
            scheduler,
            Compressor::new(CompressionConfig::default()),
            task_store,
            events.clone(),
            "mock-model",
        );
        Agent::new(
            agent_loop,
            SessionContext::in_memory(ReminderConfig::default(), &events),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn turns_accumulate_history() {
        let agent = agent(SequentialMockProvider::new(vec![
            Ok(text_response("first answer")),
            Ok(text_response("second answer")),
        ]));

        let (_, stream) = agent.start_turn("one").unwrap();
        let events: Vec<TurnEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message().text(), "first answer");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (_, stream) = agent.start_turn("two").unwrap();
        let _: Vec<TurnEvent> = stream.collect().await;

        let conversation = agent.conversation().await;
        let texts: Vec<String> = conversation.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one", "first answer", "two", "second answer"]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_turn_rejected_while_active() {
        let agent = agent(
            SequentialMockProvider::new(vec![Ok(text_response("slow"))])
                .with_delay(Duration::from_secs(5)),
        );

        let (handle, stream) = agent.start_turn("first").unwrap();
        let err = agent.start_turn("second").unwrap_err();
        assert!(matches!(err, Error::AlreadyActive { ref active_id } if active_id == handle.id()));

        let _: Vec<TurnEvent> = stream.collect().await;
        assert!(matches!(agent.state(), TurnState::Completed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_turn() {
        let agent = agent(
            SequentialMockProvider::new(vec![Ok(text_response("never"))])
                .with_delay(Duration::from_secs(5)),
        );

        let (handle, stream) = agent.start_turn("hello").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(agent.cancel(&handle, "user interrupt"));
        assert!(!agent.cancel(&handle, "again"));

        let events: Vec<TurnEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].message().interrupted);
        assert!(matches!(agent.state(), TurnState::Cancelled { .. }));

        let conversation = agent.conversation().await;
        assert_eq!(conversation.len(), 2);
        assert!(conversation.last().unwrap().interrupted);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_tool_does_not_wedge_the_agent() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(PanicTool));
        let agent = agent_with(
            SequentialMockProvider::new(vec![
                Ok(tool_use_response(&[("t1", "boom", json!({}))])),
                Ok(text_response("recovered")),
                Ok(text_response("next")),
            ]),
            registry,
            Arc::new(InMemoryTaskStore::new()),
        );

        let (_, stream) = agent.start_turn("go").unwrap();
        let events: Vec<TurnEvent> = stream.collect().await;
        assert_eq!(events.last().unwrap().message().text(), "recovered");
        assert!(matches!(agent.state(), TurnState::Completed { .. }));

        let conversation = agent.conversation().await;
        let failed = conversation.messages.iter().any(|m| {
            m.content.iter().any(|b| {
                matches!(b, ContentBlock::ToolResult { is_error: true, content, .. }
                    if content.contains("panicked"))
            })
        });
        assert!(failed);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (_, stream) = agent.start_turn("again").unwrap();
        let _: Vec<TurnEvent> = stream.collect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_turn_task_still_finishes() {
        let agent = agent_with(
            SequentialMockProvider::new(vec![Ok(text_response("unreached"))]),
            ToolRegistry::new(),
            Arc::new(PanickingTaskStore),
        );

        let (_, stream) = agent.start_turn("hello").unwrap();
        let events: Vec<TurnEvent> = stream.collect().await;
        assert!(events.is_empty());
        assert!(matches!(agent.state(), TurnState::Completed { .. }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(agent.state(), TurnState::Idle));
        assert!(agent.start_turn("retry").is_ok());
    }
}
