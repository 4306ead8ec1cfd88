//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, DeepSeek, Ollama, vLLM, and any endpoint
//! exposing `/v1/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling with streamed argument deltas
//! - `reasoning_content` surfaced as thinking blocks
//! - Model listing and health checks

use std::collections::BTreeMap;
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

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    supports_stream_options: bool,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: http::build_client(Duration::from_secs(300)),
            supports_stream_options: true,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Whether the endpoint accepts `stream_options`.
    pub fn with_stream_options(mut self, supported: bool) -> Self {
        self.supports_stream_options = supported;
        self
    }

    /// Convert block messages to chat-completions messages.
    ///
    /// Tool results in a user message become one `tool` message each, placed
    /// before any remaining user text.
    fn to_api_messages(system: &str, messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::new();
        if !system.is_empty() {
            out.push(ApiMessage::text("system", system));
        }

        for m in messages.iter().filter(|m| m.is_model_visible()) {
            match m.role {
                Role::Assistant => {
                    let tool_calls: Vec<ApiToolCall> = m
                        .tool_invocations()
                        .into_iter()
                        .map(|inv| ApiToolCall {
                            id: inv.id,
                            r#type: "function".into(),
                            function: ApiFunction {
                                name: inv.name,
                                arguments: inv.input.to_string(),
                            },
                        })
                        .collect();
                    let text = m.text();
                    out.push(ApiMessage {
                        role: "assistant".into(),
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                _ => {
                    for block in &m.content {
                        if let ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } = block
                        {
                            out.push(ApiMessage {
                                role: "tool".into(),
                                content: Some(content.clone()),
                                tool_calls: None,
                                tool_call_id: Some(tool_use_id.clone()),
                            });
                        }
                    }
                    let text = m.text();
                    if !text.is_empty() {
                        out.push(ApiMessage::text("user", &text));
                    }
                }
            }
        }
        out
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(&self, request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system, &request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        quirks::apply_openai(&mut body, &request.model, self.supports_stream_options);
        body
    }

    fn bearer(&self, request: &ProviderRequest) -> String {
        format!(
            "Bearer {}",
            request.api_key.as_deref().unwrap_or(&self.api_key)
        )
    }

    async fn post(
        &self,
        request: &ProviderRequest,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(request, stream);

        debug!(provider = %self.name, model = %request.model, stream, "Sending request");

        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", self.bearer(request))
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

    fn response_to_provider_response(
        api_response: ApiResponse,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".into()))?;

        let mut blocks = Vec::new();
        if let Some(reasoning) = choice.message.reasoning_content.filter(|r| !r.is_empty()) {
            blocks.push(ContentBlock::Thinking {
                thinking: reasoning,
                signature: None,
            });
        }
        if let Some(text) = choice.message.content {
            blocks.push(ContentBlock::Text { text });
        }
        for tc in choice.message.tool_calls.unwrap_or_default() {
            blocks.push(tool_use_from_parts(tc.id, tc.function.name, &tc.function.arguments));
        }

        let usage = api_response.usage.map(ApiUsage::into_usage);
        let mut message = Message::assistant_blocks(blocks);
        message.usage = usage.clone();

        Ok(ProviderResponse {
            message,
            usage,
            model: api_response.model,
            stop_reason: choice.finish_reason,
            metadata: serde_json::Map::new(),
        })
    }
}

fn tool_use_from_parts(id: String, name: String, arguments: &str) -> ContentBlock {
    let input = if arguments.trim().is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(arguments).unwrap_or_else(|e| {
            debug!(tool = %name, error = %e, "Tool arguments were not valid JSON");
            serde_json::json!({})
        })
    };
    ContentBlock::ToolUse { id, name, input }
}

#[async_trait]
impl helmsman_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let response = self.post(&request, false).await?;
        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;
        Self::response_to_provider_response(api_response)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.post(&request, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

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
                    let SseLine::Data(data) = line else { continue };
                    for chunk in state.handle(&provider_name, &data) {
                        let done = chunk.done;
                        if tx.send(Ok(chunk)).await.is_err() || done {
                            return;
                        }
                    }
                }
            }

            // Some servers close without [DONE] after the finish reason
            if state.finished {
                for chunk in state.finish() {
                    let _ = tx.send(Ok(chunk)).await;
                }
            }
        });

        Ok(rx)
    }

    async fn list_models(&self) -> std::result::Result<Vec<String>, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(http::transport_error)?;

        if !response.status().is_success() {
            return Ok(Vec::new());
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        Ok(body["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(http::transport_error)?;

        Ok(response.status().is_success())
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

/// Translates chat-completions stream chunks into provider chunks.
#[derive(Debug, Default)]
struct StreamState {
    tools: BTreeMap<u32, ToolCallAccumulator>,
    finished: bool,
}

impl StreamState {
    fn handle(&mut self, provider: &str, data: &str) -> Vec<StreamChunk> {
        if data == "[DONE]" {
            return self.finish();
        }

        let parsed: StreamResponse = match serde_json::from_str(data) {
            Ok(p) => p,
            Err(e) => {
                trace!(provider, data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        if let Some(model) = parsed.model.filter(|m| !m.is_empty()) {
            out.push(StreamChunk {
                model: Some(model),
                ..Default::default()
            });
        }

        if let Some(choice) = parsed.choices.into_iter().next() {
            let delta = choice.delta;
            if let Some(reasoning) = delta.reasoning_content.filter(|r| !r.is_empty()) {
                out.push(StreamChunk {
                    thinking: Some(reasoning),
                    ..Default::default()
                });
            }
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                out.push(StreamChunk {
                    text: Some(content),
                    ..Default::default()
                });
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let acc = self.tools.entry(tc.index).or_default();
                if let Some(id) = tc.id {
                    acc.id = id;
                }
                if let Some(func) = tc.function {
                    if let Some(name) = func.name {
                        acc.name = name;
                    }
                    if let Some(args) = func.arguments {
                        acc.arguments.push_str(&args);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finished = true;
                out.push(StreamChunk {
                    stop_reason: Some(reason),
                    tool_uses: self.drain_tools(),
                    ..Default::default()
                });
            }
        }

        if let Some(usage) = parsed.usage {
            out.push(StreamChunk {
                usage: Some(usage.into_usage()),
                ..Default::default()
            });
        }
        out
    }

    fn drain_tools(&mut self) -> Vec<ContentBlock> {
        std::mem::take(&mut self.tools)
            .into_values()
            .map(|acc| tool_use_from_parts(acc.id, acc.name, &acc.arguments))
            .collect()
    }

    fn finish(&mut self) -> Vec<StreamChunk> {
        vec![StreamChunk {
            tool_uses: self.drain_tools(),
            done: true,
            ..Default::default()
        }]
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u32,
}

impl ApiUsage {
    /// OpenAI counts cached tokens inside `prompt_tokens`; split them out.
    fn into_usage(self) -> Usage {
        let cached = self
            .prompt_tokens_details
            .map(|d| d.cached_tokens)
            .unwrap_or(0)
            .min(self.prompt_tokens);
        let prompt = self.prompt_tokens - cached;
        Usage {
            prompt_tokens: prompt,
            completion_tokens: self.completion_tokens,
            total_tokens: prompt + self.completion_tokens,
            cache_creation_tokens: 0,
            cache_read_tokens: cached,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamCollector;
    use helmsman_core::Provider;
    use helmsman_core::tool::ToolResult;
    use serde_json::json;

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None);
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn message_conversion_splits_tool_results() {
        let assistant = Message::assistant_blocks(vec![
            ContentBlock::text("Checking"),
            ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "shell".into(),
                input: json!({"command": "ls"}),
            },
        ]);
        let results = Message::tool_results(&[ToolResult::success("call_1", "a.txt")]);
        let api = OpenAiCompatProvider::to_api_messages(
            "You are helpful",
            &[Message::user("Hello"), assistant, Message::progress("call_1", "..."), results],
        );

        let roles: Vec<_> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "tool"]);
        let calls = api[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"command":"ls"}"#);
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "shell".into(),
            description: "Run a shell command".into(),
            parameters: json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatProvider::to_api_tools(&tools);
        assert_eq!(api_tools[0].function.name, "shell");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn body_applies_reasoning_quirks() {
        let provider = OpenAiCompatProvider::openai("sk");
        let mut request = ProviderRequest::new("o3-mini", vec![Message::user("hi")]);
        request.max_tokens = Some(500);
        let body = provider.build_body(&request, false);
        assert_eq!(body["max_completion_tokens"], 500);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn body_strips_stream_options_when_unsupported() {
        let provider = OpenAiCompatProvider::ollama(None).with_stream_options(false);
        let request = ProviderRequest::new("llama3", vec![Message::user("hi")]);
        let body = provider.build_body(&request, true);
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn request_key_overrides_configured_key() {
        let provider = OpenAiCompatProvider::openai("sk-default");
        let mut request = ProviderRequest::new("gpt-4o", vec![]);
        assert_eq!(provider.bearer(&request), "Bearer sk-default");
        request.api_key = Some("sk-rotated".into());
        assert_eq!(provider.bearer(&request), "Bearer sk-rotated");
    }

    #[test]
    fn response_parsing_with_cached_usage() {
        let raw = json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": {
                    "content": "Listing",
                    "tool_calls": [{"id": "call_1", "type": "function", "function": {"name": "shell", "arguments": "{\"command\":\"ls\"}"}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 100, "completion_tokens": 10, "total_tokens": 110, "prompt_tokens_details": {"cached_tokens": 40}}
        });
        let resp: ApiResponse = serde_json::from_value(raw).unwrap();
        let out = OpenAiCompatProvider::response_to_provider_response(resp).unwrap();
        let invocations = out.message.tool_invocations();
        assert_eq!(invocations[0].input["command"], "ls");
        let usage = out.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 60);
        assert_eq!(usage.cache_read_tokens, 40);
        assert_eq!(usage.context_tokens(), 110);
    }

    #[test]
    fn empty_choices_is_invalid() {
        let resp: ApiResponse = serde_json::from_value(json!({"model": "m", "choices": []})).unwrap();
        let err = OpenAiCompatProvider::response_to_provider_response(resp).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn stream_deltas_fold_into_same_message() {
        let data = [
            r#"{"model":"gpt-4o","choices":[{"delta":{"role":"assistant","content":""},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"List"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"ing"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"shell","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"command\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"ls\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":7,"total_tokens":19}}"#,
            "[DONE]",
        ];
        let mut state = StreamState::default();
        let mut collector = StreamCollector::new();
        for d in data {
            for chunk in state.handle("test", d) {
                collector.push(chunk);
            }
        }
        assert!(collector.is_done());
        let response = collector.finish("fallback");
        assert_eq!(
            response.message.content,
            vec![
                ContentBlock::text("Listing"),
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "shell".into(),
                    input: json!({"command": "ls"}),
                },
            ]
        );
        assert_eq!(response.model, "gpt-4o");
        assert_eq!(response.usage, Some(Usage::new(12, 7)));
        assert_eq!(response.stop_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn parallel_tool_calls_keep_index_order() {
        let mut state = StreamState::default();
        state.handle(
            "test",
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"b","function":{"name":"file_read","arguments":"{}"}},{"index":0,"id":"a","function":{"name":"file_read","arguments":"{}"}}]}}]}"#,
        );
        let chunks = state.handle("test", "[DONE]");
        let ids: Vec<_> = chunks[0]
            .tool_uses
            .iter()
            .map(|b| match b {
                ContentBlock::ToolUse { id, .. } => id.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn reasoning_content_becomes_thinking() {
        let mut state = StreamState::default();
        let chunks = state.handle(
            "test",
            r#"{"choices":[{"delta":{"reasoning_content":"think"}}]}"#,
        );
        assert_eq!(chunks[0].thinking.as_deref(), Some("think"));
    }
}
