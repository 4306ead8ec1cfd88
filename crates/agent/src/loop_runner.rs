//! The query loop.
//!
//! One turn runs as an explicit loop over model rounds:
//!
//! 1. compress the conversation if it is over budget
//! 2. attach system reminders to an outbound copy of the last user message
//! 3. send through the resilient client
//! 4. if the reply requests tools, run them through the scheduler and append
//!    the results, then go around again
//!
//! The turn ends on a reply without tool use, a provider failure (appended
//! as an error message), the iteration cap, or cancellation (appended as an
//! interruption marker). The returned conversation always ends in one of
//! those messages.

use std::sync::Arc;

use helmsman_config::AppConfig;
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::message::{ContentBlock, Conversation, Message, Role};
use helmsman_core::provider::ProviderRequest;
use helmsman_core::task::TaskStore;
use helmsman_core::tool::{PermissionGate, ToolRegistry, ToolResult};
use helmsman_providers::ResilientClient;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancellation::{RequestHandle, TurnPhase};
use crate::compression::Compressor;
use crate::compression::prompt::COMPRESSION_NOTICE;
use crate::context::SessionContext;
use crate::reminder::ReminderMessage;
use crate::scheduler::ToolScheduler;
use crate::stream_event::TurnEvent;

/// `tool_use_id` carried by progress messages that report API retries.
pub const RETRY_PROGRESS_ID: &str = "api_retry";

/// `tool_use_id` carried by the progress message announcing compaction.
pub const COMPACTION_PROGRESS_ID: &str = "auto_compact";

/// The core agent loop that orchestrates LLM calls and tool execution.
pub struct AgentLoop {
    client: Arc<ResilientClient>,
    scheduler: ToolScheduler,
    compressor: Compressor,
    task_store: Arc<dyn TaskStore>,
    events: Arc<EventBus>,
    agent_id: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: Option<u32>,
    thinking_budget: Option<u32>,
    max_iterations: usize,
}

impl AgentLoop {
    pub fn new(
        client: Arc<ResilientClient>,
        scheduler: ToolScheduler,
        compressor: Compressor,
        task_store: Arc<dyn TaskStore>,
        events: Arc<EventBus>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            scheduler,
            compressor,
            task_store,
            events,
            agent_id: "main".into(),
            model: model.into(),
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: None,
            thinking_budget: None,
            max_iterations: 50,
        }
    }

    /// Wire a loop from configuration.
    pub fn from_config(
        config: &AppConfig,
        client: Arc<ResilientClient>,
        registry: Arc<ToolRegistry>,
        gate: Arc<dyn PermissionGate>,
        task_store: Arc<dyn TaskStore>,
        events: Arc<EventBus>,
    ) -> Self {
        let scheduler = ToolScheduler::new(registry, gate, events.clone(), &config.agent.agent_id)
            .with_max_concurrency(config.agent.max_tool_concurrency);
        let compressor = Compressor::new(config.compression.clone());

        let mut agent = Self::new(client, scheduler, compressor, task_store, events, &config.default_model)
            .with_agent_id(&config.agent.agent_id)
            .with_system_prompt(&config.agent.system_prompt)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations);
        agent.thinking_budget = config.thinking_budget;
        agent
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = agent_id.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    /// Set the maximum number of model rounds per turn.
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one turn over `conversation`, whose last message is the new input.
    pub async fn run_turn(
        &self,
        mut conversation: Conversation,
        session: &mut SessionContext,
        handle: &RequestHandle,
        events: &mpsc::UnboundedSender<TurnEvent>,
    ) -> Conversation {
        info!(
            conversation_id = %conversation.id,
            turn_id = %handle.id(),
            messages = conversation.len(),
            "Turn started"
        );
        let mut rounds = 0;

        loop {
            if handle.is_cancelled() {
                append(&mut conversation, Message::interrupted(), events);
                break;
            }
            if rounds >= self.max_iterations {
                warn!(conversation_id = %conversation.id, rounds, "Max tool rounds reached");
                append(
                    &mut conversation,
                    Message::api_error(format!(
                        "Stopped after {rounds} tool rounds without a final answer."
                    )),
                    events,
                );
                break;
            }
            rounds += 1;
            debug!(conversation_id = %conversation.id, round = rounds, "Agent loop iteration");

            // ── Model round ──
            handle.set_phase(TurnPhase::AwaitingModel);
            let (compacted, did_compress) = self
                .compressor
                .maybe_compress(conversation, session, &self.client, &self.model, handle.token())
                .await;
            conversation = compacted;
            // Checked before reminders so none are spent on a request never sent
            if handle.is_cancelled() {
                append(&mut conversation, Message::interrupted(), events);
                break;
            }
            if did_compress {
                let _ = events.send(TurnEvent::Progress(Message::progress(
                    COMPACTION_PROGRESS_ID,
                    COMPRESSION_NOTICE,
                )));
            }

            session.sync_events();
            let reminders = session
                .reminders
                .generate(!conversation.is_empty(), &self.agent_id, self.task_store.as_ref())
                .await;
            let request = self.build_request(&conversation, &reminders);

            let outcome = self
                .client
                .send_with(request, handle.token(), |notice| {
                    let _ = events.send(TurnEvent::Progress(Message::progress(
                        RETRY_PROGRESS_ID,
                        notice.to_string(),
                    )));
                })
                .await;

            let reply = match outcome {
                _ if handle.is_cancelled() => {
                    append(&mut conversation, Message::interrupted(), events);
                    break;
                }
                Ok(reply) => reply,
                Err(e) => {
                    warn!(conversation_id = %conversation.id, error = %e, "Provider request failed");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: "provider".into(),
                        error_message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                    append(&mut conversation, Message::api_error(format!("API Error: {e}")), events);
                    break;
                }
            };

            if let Some(usage) = &reply.usage {
                self.events.publish(DomainEvent::ResponseGenerated {
                    conversation_id: conversation.id.to_string(),
                    model: reply.model.clone().unwrap_or_else(|| self.model.clone()),
                    tokens_used: usage.total_tokens,
                    timestamp: chrono::Utc::now(),
                });
            }

            let invocations = reply.tool_invocations();
            append(&mut conversation, reply, events);
            if invocations.is_empty() {
                break;
            }

            // ── Tool round ──
            debug!(tool_count = invocations.len(), "Executing tool calls");
            handle.set_phase(TurnPhase::AwaitingTools);
            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let run = self.scheduler.run(&invocations, handle, progress_tx);
            let forward = async {
                while let Some(message) = progress_rx.recv().await {
                    let _ = events.send(TurnEvent::Progress(message));
                }
            };
            let (outcome, ()) = tokio::join!(run, forward);

            match outcome {
                Ok(mut results) if !handle.is_cancelled() => {
                    let ordered: Vec<ToolResult> = invocations
                        .iter()
                        .map(|inv| {
                            results
                                .remove(&inv.id)
                                .unwrap_or_else(|| ToolResult::error(&inv.id, "Tool produced no result"))
                        })
                        .collect();
                    append(&mut conversation, Message::tool_results(&ordered), events);
                }
                _ => {
                    let pending = invocations.iter().map(|inv| inv.id.as_str());
                    append(&mut conversation, Message::interrupted_tool_use(pending), events);
                    break;
                }
            }
        }

        info!(
            conversation_id = %conversation.id,
            turn_id = %handle.id(),
            rounds,
            messages = conversation.len(),
            "Turn finished"
        );
        conversation
    }

    /// The outbound request: model-visible history with reminders appended
    /// as extra text blocks on a copy of the last user message.
    fn build_request(&self, conversation: &Conversation, reminders: &[ReminderMessage]) -> ProviderRequest {
        let mut messages: Vec<Message> = conversation
            .messages
            .iter()
            .filter(|m| m.is_model_visible())
            .cloned()
            .collect();

        if !reminders.is_empty()
            && let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == Role::User)
        {
            last_user
                .content
                .extend(reminders.iter().map(|r| ContentBlock::text(&r.content)));
        }

        let mut request = ProviderRequest::new(&self.model, messages);
        request.system = self.system_prompt.clone();
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.thinking_budget = self.thinking_budget;
        request.tools = self.scheduler.registry().definitions();
        request
    }
}

fn append(conversation: &mut Conversation, message: Message, events: &mpsc::UnboundedSender<TurnEvent>) {
    let _ = events.send(TurnEvent::Result(message.clone()));
    conversation.push(message);
}
