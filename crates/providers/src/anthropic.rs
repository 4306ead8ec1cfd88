//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native `tool_use` / `tool_result` content blocks
//! - Streaming via SSE with typed `content_block_*` events
//! - Extended thinking with signed thinking blocks

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use helmsman_core::error::ProviderError;
use helmsman_core::message::{ContentBlock, Message, Role};
use helmsman_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::http::{self, SseLine, SseLines};
use crate::quirks;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            // Thinking responses can take minutes
            client: http::build_client(Duration::from_secs(600)),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Register under a different name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Convert messages to Messages API format.
    ///
    /// Progress messages never leave the process. Thinking blocks without a
    /// signature cannot be replayed and are dropped.
    fn to_api_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.is_model_visible())
            .filter_map(|m| {
                let content: Vec<ContentBlock> = m
                    .content
                    .iter()
                    .filter(|b| match b {
                        ContentBlock::Thinking { signature, .. } => signature.is_some(),
                        ContentBlock::Text { text } => !text.is_empty(),
                        _ => true,
                    })
                    .cloned()
                    .collect();
                if content.is_empty() {
                    return None;
                }
                let role = match m.role {
                    Role::Assistant => "assistant",
                    _ => "user",
                };
                Some(AnthropicMessage {
                    role: role.into(),
                    content,
                })
            })
            .collect()
    }

    /// Convert tool definitions to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if !request.system.is_empty() {
            body["system"] = serde_json::json!(request.system);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop);
        }
        if let Some(budget) = request.thinking_budget {
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": budget
            });
        }

        quirks::apply_anthropic(&mut body);
        body
    }

    async fn post(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(request, stream);
        let api_key = request.api_key.as_deref().unwrap_or(&self.api_key);

        debug!(provider = %self.name, model = %request.model, stream, "Sending request");

        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(&body)
            .send()
            .await
            .map_err(http::transport_error)?;

        if !response.status().is_success() {
            return Err(http::error_from_response(&self.name, response).await);
        }
        Ok(response)
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let content = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ResponseContentBlock::Thinking {
                    thinking,
                    signature,
                } => Some(ContentBlock::Thinking {
                    thinking,
                    signature,
                }),
                ResponseContentBlock::Other => None,
            })
            .collect();

        let usage = resp.usage.into_usage();
        let mut message = Message::assistant_blocks(content);
        message.usage = Some(usage.clone());

        let mut metadata = serde_json::Map::new();
        metadata.insert("response_id".into(), serde_json::json!(resp.id));

        ProviderResponse {
            message,
            usage: Some(usage),
            model: resp.model,
            stop_reason: resp.stop_reason,
            metadata,
        }
    }
}

#[async_trait]
impl helmsman_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let response = self.post(&request, false).await?;
        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Anthropic response: {e}")))?;
        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.post(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut state = StreamState::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    // Anthropic repeats the event type inside each data payload
                    let SseLine::Data(data) = line else { continue };
                    for item in state.handle(&data) {
                        let finished = matches!(&item, Ok(c) if c.done) || item.is_err();
                        if tx.send(item).await.is_err() || finished {
                            return;
                        }
                    }
                }
            }
            // Dropping tx without a done chunk marks the stream interrupted
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        Ok(vec![
            "claude-opus-4-20250514".into(),
            "claude-sonnet-4-20250514".into(),
            "claude-3-7-sonnet-20250219".into(),
            "claude-3-5-haiku-20241022".into(),
        ])
    }
}

/// Tool-use block being assembled from `input_json_delta` events.
#[derive(Debug, Default)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Translates Messages API stream events into chunks.
#[derive(Debug, Default)]
struct StreamState {
    tool: Option<PendingToolUse>,
}

impl StreamState {
    fn handle(&mut self, data: &str) -> Vec<std::result::Result<StreamChunk, ProviderError>> {
        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Vec::new();
            }
        };

        let chunk = match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                let message = &event["message"];
                let usage = serde_json::from_value::<AnthropicUsage>(message["usage"].clone())
                    .ok()
                    .map(AnthropicUsage::into_usage);
                StreamChunk {
                    model: message["model"].as_str().map(String::from),
                    usage,
                    ..Default::default()
                }
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.tool = Some(PendingToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        input_json: String::new(),
                    });
                }
                return Vec::new();
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => StreamChunk {
                        text: delta["text"].as_str().map(String::from),
                        ..Default::default()
                    },
                    "thinking_delta" => StreamChunk {
                        thinking: delta["thinking"].as_str().map(String::from),
                        ..Default::default()
                    },
                    "signature_delta" => StreamChunk {
                        thinking_signature: delta["signature"].as_str().map(String::from),
                        ..Default::default()
                    },
                    "input_json_delta" => {
                        if let (Some(tool), Some(partial)) =
                            (self.tool.as_mut(), delta["partial_json"].as_str())
                        {
                            tool.input_json.push_str(partial);
                        }
                        return Vec::new();
                    }
                    _ => return Vec::new(),
                }
            }
            "content_block_stop" => match self.tool.take() {
                Some(tool) => StreamChunk {
                    tool_uses: vec![finish_tool_use(tool)],
                    ..Default::default()
                },
                None => return Vec::new(),
            },
            "message_delta" => {
                let usage = event.get("usage").map(|u| Usage {
                    prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                    completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
                    ..Default::default()
                });
                StreamChunk {
                    usage,
                    stop_reason: event["delta"]["stop_reason"].as_str().map(String::from),
                    ..Default::default()
                }
            }
            "message_stop" => StreamChunk {
                done: true,
                ..Default::default()
            },
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return vec![Err(ProviderError::StreamInterrupted(message))];
            }
            _ => return Vec::new(),
        };
        vec![Ok(chunk)]
    }
}

fn finish_tool_use(tool: PendingToolUse) -> ContentBlock {
    let input = if tool.input_json.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(&tool.input_json).unwrap_or_else(|e| {
            debug!(tool = %tool.name, error = %e, "Tool input was not valid JSON");
            serde_json::json!({})
        })
    };
    ContentBlock::ToolUse {
        id: tool.id,
        name: tool.name,
        input,
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<ResponseContentBlock>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
        #[serde(default)]
        signature: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    cache_creation_input_tokens: u32,
    #[serde(default)]
    cache_read_input_tokens: u32,
}

impl AnthropicUsage {
    fn into_usage(self) -> Usage {
        Usage {
            prompt_tokens: self.input_tokens,
            completion_tokens: self.output_tokens,
            total_tokens: self.input_tokens + self.output_tokens,
            cache_creation_tokens: self.cache_creation_input_tokens,
            cache_read_tokens: self.cache_read_input_tokens,
        }
    }
}
