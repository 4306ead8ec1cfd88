//! # helmsman core
//!
//! Domain types, traits, and error definitions for the helmsman agent runtime.
//! This crate defines the vocabulary every other crate speaks: messages and
//! their content blocks, tool invocations, provider requests, the domain
//! event bus, and the traits for collaborators the orchestration core
//! consumes but does not own (task lists, file freshness, cost accounting,
//! credentials, permissions).
//!
//! Implementations live in their respective crates; all crates depend
//! inward on core.

pub mod accounting;
pub mod error;
pub mod event;
pub mod freshness;
pub mod message;
pub mod provider;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use accounting::{CostSink, NoopCostSink};
pub use error::{Error, ErrorClass, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use freshness::{FileAccess, FreshnessTracker};
pub use message::{ContentBlock, Conversation, ConversationId, Message, Role};
pub use provider::{
    ChunkReceiver, CredentialSource, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    ToolDefinition, Usage,
};
pub use task::{TaskItem, TaskPriority, TaskStatus, TaskStore};
pub use tool::{
    AllowAll, PermissionDecision, PermissionGate, Tool, ToolContext, ToolInvocation, ToolRegistry, ToolResult,
};
