//! Task list types and the store trait the reminder engine reads from.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    High,
    Medium,
    Low,
}

/// One entry of an agent's task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub content: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
}

/// Per-agent task list storage.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Current tasks for `agent_id`, in insertion order.
    async fn tasks(&self, agent_id: &str) -> Vec<TaskItem>;

    /// Replace the whole list for `agent_id`.
    async fn replace(&self, agent_id: &str, tasks: Vec<TaskItem>);
}
