//! Task list tool and the in-memory store behind it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use helmsman_core::error::ToolError;
use helmsman_core::event::DomainEvent;
use helmsman_core::task::{TaskItem, TaskStatus, TaskStore};
use helmsman_core::tool::{Tool, ToolContext, ToolResult};
use tokio::sync::RwLock;

/// Per-agent task lists held in process memory.
#[derive(Default)]
pub struct InMemoryTaskStore {
    lists: RwLock<HashMap<String, Vec<TaskItem>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn tasks(&self, agent_id: &str) -> Vec<TaskItem> {
        self.lists.read().await.get(agent_id).cloned().unwrap_or_default()
    }

    async fn replace(&self, agent_id: &str, tasks: Vec<TaskItem>) {
        self.lists.write().await.insert(agent_id.to_string(), tasks);
    }
}

/// Replaces the calling agent's task list.
pub struct TodoWriteTool {
    store: Arc<dyn TaskStore>,
}

impl TodoWriteTool {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    fn parse(input: &serde_json::Value) -> Result<Vec<TaskItem>, ToolError> {
        let todos = input
            .get("todos")
            .cloned()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'todos' argument".into()))?;
        let items: Vec<TaskItem> = serde_json::from_value(todos)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid todos: {e}")))?;

        let mut seen = std::collections::HashSet::new();
        for item in &items {
            if !seen.insert(item.id.as_str()) {
                return Err(ToolError::InvalidArguments(format!("Duplicate todo id '{}'", item.id)));
            }
        }
        if items.iter().filter(|t| t.status == TaskStatus::InProgress).count() > 1 {
            return Err(ToolError::InvalidArguments(
                "Only one todo may be in_progress at a time".into(),
            ));
        }
        Ok(items)
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace your task list. Pass the complete list every time; keep at most one task in_progress."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed"] },
                            "priority": { "type": "string", "enum": ["high", "medium", "low"] }
                        },
                        "required": ["id", "content", "status", "priority"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    // Only touches in-process state.
    fn needs_permission(&self, _input: &serde_json::Value) -> bool {
        false
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        Self::parse(input).map(|_| ())
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let items = Self::parse(&input)?;
        let summary = format!(
            "Todos updated: {} pending, {} in progress, {} completed",
            items.iter().filter(|t| t.status == TaskStatus::Pending).count(),
            items.iter().filter(|t| t.status == TaskStatus::InProgress).count(),
            items.iter().filter(|t| t.status == TaskStatus::Completed).count(),
        );

        self.store.replace(&ctx.agent_id, items).await;
        ctx.events.publish(DomainEvent::todo_changed(&ctx.agent_id));

        Ok(ToolResult::success(&ctx.call_id, summary))
    }
}
