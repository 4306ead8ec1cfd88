//! Domain event system: decoupled communication between bounded contexts.
//!
//! Tools publish file and task events here; the session context drains its
//! subscription before each model call so reminder state and the freshness
//! tracker stay current without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A file was read by a tool
    FileRead {
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// A file was created or modified by a tool
    FileEdited {
        path: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent's task list changed
    TodoChanged {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent generated a response
    ResponseGenerated {
        conversation_id: String,
        model: String,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn file_read(path: impl Into<String>) -> Self {
        Self::FileRead {
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn file_edited(path: impl Into<String>) -> Self {
        Self::FileEdited {
            path: path.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn todo_changed(agent_id: impl Into<String>) -> Self {
        Self::TodoChanged {
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
