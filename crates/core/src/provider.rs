//! Provider trait, the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to an LLM and get a response
//! back, either as a complete message or as a stream of chunks. Both paths
//! produce the same block-based assistant message once normalized.
//!
//! Implementations: Anthropic Messages API, OpenAI-compatible chat completions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// System prompt, sent out-of-band from the message list
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system: String,

    /// The conversation messages (progress messages are filtered by providers)
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Extended-thinking budget, for providers that support it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    /// Credential override chosen by the resilience layer for this attempt
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system: String::new(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            thinking_budget: None,
            tools: Vec::new(),
            stream: false,
            stop: Vec::new(),
            api_key: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Why generation stopped ("end_turn", "tool_use", "stop", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    /// Provider-specific metadata
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            ..Default::default()
        }
    }

    /// Tokens occupying the context window after this call: input, both
    /// cache counters, and output.
    pub fn context_tokens(&self) -> u64 {
        self.prompt_tokens as u64
            + self.cache_creation_tokens as u64
            + self.cache_read_tokens as u64
            + self.completion_tokens as u64
    }

    /// Fold a later usage report into this one. Streaming providers report
    /// input on the first event and output on the last.
    pub fn merge(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(other.completion_tokens);
        self.cache_creation_tokens = self.cache_creation_tokens.max(other.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.max(other.cache_read_tokens);
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial text delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Partial thinking delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Signature closing the current thinking block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_signature: Option<String>,

    /// Fully accumulated tool-use blocks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ContentBlock>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically on the first and final chunks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// Receiver half of a provider stream.
pub type ChunkReceiver =
    tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The resilience layer calls
/// `complete()` or `stream()` without knowing which provider is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and replays the message as
    /// one chunk per block.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(response.message.content.len() + 1);
        for block in response.message.content {
            let chunk = match block {
                ContentBlock::Text { text } => StreamChunk {
                    text: Some(text),
                    ..Default::default()
                },
                ContentBlock::Thinking {
                    thinking,
                    signature,
                } => StreamChunk {
                    thinking: Some(thinking),
                    thinking_signature: signature,
                    ..Default::default()
                },
                block @ ContentBlock::ToolUse { .. } => StreamChunk {
                    tool_uses: vec![block],
                    ..Default::default()
                },
                ContentBlock::ToolResult { .. } => continue,
            };
            let _ = tx.send(Ok(chunk)).await;
        }
        let _ = tx
            .send(Ok(StreamChunk {
                done: true,
                usage: response.usage,
                model: Some(response.model),
                stop_reason: response.stop_reason,
                ..Default::default()
            }))
            .await;
        Ok(rx)
    }

    /// List available models for this provider.
    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

/// Source of API credentials, possibly several per tier.
///
/// The resilience layer asks for the active key before each attempt and
/// reports keys rejected by the provider so the source can rotate.
pub trait CredentialSource: Send + Sync {
    /// The key to use for `tier`, or `None` when every key has failed.
    fn active_key(&self, tier: &str) -> Option<String>;

    /// Mark `key` as rejected for `tier`.
    fn mark_failed(&self, key: &str, tier: &str);
}
