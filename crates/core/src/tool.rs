//! Tool trait, the abstraction over agent capabilities.
//!
//! Tools give the agent the ability to act in the world: read and write
//! files, run shell commands, track tasks. Each tool declares whether it may
//! run alongside other invocations and whether it mutates anything; the
//! scheduler relies on those flags to batch work.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::event::EventBus;
use crate::message::Message;
use crate::provider::ToolDefinition;

/// A request to execute a tool, parsed from an assistant tool-use block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Unique call ID (matches the model's tool-use id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Input as a JSON value
    pub input: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content fed back to the model
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// How a front end should present this result ("text", "diff", "code", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_hint: Option<String>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            output: output.into(),
            data: None,
            render_hint: None,
        }
    }

    pub fn error(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            success: false,
            output: output.into(),
            data: None,
            render_hint: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_render_hint(mut self, hint: impl Into<String>) -> Self {
        self.render_hint = Some(hint.into());
        self
    }
}

/// Per-invocation context handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub agent_id: String,
    /// Cancelled when the turn is interrupted; long-running tools should
    /// select on it.
    pub cancel: CancellationToken,
    /// Domain event bus for file and task notifications
    pub events: Arc<EventBus>,
    progress: Option<mpsc::UnboundedSender<Message>>,
}

impl ToolContext {
    pub fn new(
        call_id: impl Into<String>,
        agent_id: impl Into<String>,
        cancel: CancellationToken,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            agent_id: agent_id.into(),
            cancel,
            events,
            progress: None,
        }
    }

    /// Attach a sink for progress messages.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<Message>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Emit an intermediate progress message for this invocation.
    pub fn report_progress(&self, text: impl Into<String>) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(Message::progress(self.call_id.clone(), text));
        }
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and is registered in the ToolRegistry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Whether this tool may run in parallel with other safe invocations.
    fn is_concurrency_safe(&self) -> bool {
        false
    }

    /// Whether this tool never mutates state outside the process.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Whether this invocation must pass the permission gate first.
    fn needs_permission(&self, _input: &serde_json::Value) -> bool {
        !self.is_read_only()
    }

    /// Reject malformed input before execution.
    fn validate_input(&self, _input: &serde_json::Value) -> std::result::Result<(), ToolError> {
        Ok(())
    }

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The orchestrator uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up safety flags when scheduling a batch
/// 3. Execute tools when the LLM requests them
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether the named tool is known and concurrency-safe.
    pub fn is_concurrency_safe(&self, name: &str) -> Option<bool> {
        self.tools.get(name).map(|t| t.is_concurrency_safe())
    }

    /// All tool definitions, sorted by name for a stable request body.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny(String),
}

/// Decides whether a tool invocation may run.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn check(&self, tool_name: &str, input: &serde_json::Value) -> PermissionDecision;
}

/// A gate that approves everything.
pub struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn check(&self, _tool_name: &str, _input: &serde_json::Value) -> PermissionDecision {
        PermissionDecision::Allow
    }
}
