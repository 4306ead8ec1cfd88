//! Message and Conversation domain types.
//!
//! A message is an immutable value once appended: an id, a role, and an
//! ordered list of content blocks. Assistant messages additionally carry the
//! usage and cost reported by the provider call that produced them.
//!
//! The conversation is append-only. The orchestrator owns it for the duration
//! of one turn and hands it back to the caller afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::Usage;
use crate::tool::{ToolInvocation, ToolResult};

/// Text of the message appended when the operator cancels a turn.
pub const INTERRUPT_MESSAGE: &str = "[Request interrupted by user]";

/// Tool-result payload used for every pending call when a turn is cancelled
/// while tools are running.
pub const INTERRUPT_MESSAGE_FOR_TOOL_USE: &str = "[Request interrupted by user for tool use]";

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the exchange produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Operator input, tool results, and interruption markers
    User,
    /// Model output
    Assistant,
    /// Intermediate tool progress; rendered, never sent to the model
    Progress,
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Number of payload characters, used for token estimation.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text { text } => text.len(),
            Self::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
            Self::ToolResult { content, .. } => content.len(),
            Self::Thinking { thinking, .. } => thinking.len(),
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// Ordered content blocks
    pub content: Vec<ContentBlock>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Token usage reported for the call that produced this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Cost of that call in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,

    /// Wall-clock duration of that call, including retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Model that actually answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// For progress messages, the invocation they report on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,

    /// Terminal assistant message synthesized from a provider failure
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_api_error: bool,

    /// Marker appended when the operator cancelled the turn
    #[serde(default, skip_serializing_if = "is_false")]
    pub interrupted: bool,

    /// Optional metadata (provider stop reason, compaction markers, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_blocks(role: Role, content: Vec<ContentBlock>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            usage: None,
            cost_usd: None,
            duration_ms: None,
            model: None,
            tool_use_id: None,
            is_api_error: false,
            interrupted: false,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_blocks(Role::User, vec![ContentBlock::text(content)])
    }

    /// Create a new assistant message with a single text block.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_blocks(Role::Assistant, vec![ContentBlock::text(content)])
    }

    /// Create an assistant message from already-normalized blocks.
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self::with_blocks(Role::Assistant, content)
    }

    /// Create a progress message for an in-flight tool invocation.
    pub fn progress(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_blocks(Role::Progress, vec![ContentBlock::text(content)]);
        msg.tool_use_id = Some(tool_use_id.into());
        msg
    }

    /// Create the user-role message that carries a round of tool results.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        let blocks = results
            .iter()
            .map(|r| ContentBlock::ToolResult {
                tool_use_id: r.call_id.clone(),
                content: r.output.clone(),
                is_error: !r.success,
            })
            .collect();
        Self::with_blocks(Role::User, blocks)
    }

    /// Create the terminal assistant message for a provider failure.
    pub fn api_error(content: impl Into<String>) -> Self {
        let mut msg = Self::assistant(content);
        msg.is_api_error = true;
        msg
    }

    /// Create the interruption marker for a turn cancelled outside tool execution.
    pub fn interrupted() -> Self {
        let mut msg = Self::user(INTERRUPT_MESSAGE);
        msg.interrupted = true;
        msg
    }

    /// Create the interruption marker for a turn cancelled while tools ran.
    ///
    /// Every pending call id receives an error result so the conversation
    /// never holds an unanswered tool-use block.
    pub fn interrupted_tool_use<'a>(call_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let blocks = call_ids
            .into_iter()
            .map(|id| ContentBlock::ToolResult {
                tool_use_id: id.to_string(),
                content: INTERRUPT_MESSAGE_FOR_TOOL_USE.to_string(),
                is_error: true,
            })
            .collect();
        let mut msg = Self::with_blocks(Role::User, blocks);
        msg.interrupted = true;
        msg
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse the tool-use blocks of this message into invocations, in order.
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => Some(ToolInvocation {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Call ids answered by the tool-result blocks of this message.
    pub fn tool_result_ids(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether this message is sent to the model (progress never is).
    pub fn is_model_visible(&self) -> bool {
        self.role != Role::Progress
    }

    /// Total payload characters across all blocks.
    pub fn char_len(&self) -> usize {
        self.content.iter().map(ContentBlock::char_len).sum()
    }
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,

    /// Conversation-level metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a conversation pre-populated with messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut conv = Self::new();
        conv.messages = messages;
        conv
    }

    /// Start over with a fresh message list under the same conversation id.
    pub fn reseed(&self, messages: Vec<Message>) -> Self {
        Self {
            id: self.id.clone(),
            messages,
            created_at: self.created_at,
            updated_at: Utc::now(),
            metadata: self.metadata.clone(),
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
