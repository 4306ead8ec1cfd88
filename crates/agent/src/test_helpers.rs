//! Shared test helpers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmsman_core::error::ProviderError;
use helmsman_core::message::{ContentBlock, Message};
use helmsman_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use helmsman_providers::{ResilientClient, RetryPolicy};

/// A mock provider that returns a sequence of scripted outcomes and keeps
/// every request it saw.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("no more scripted responses".into())))
    }
}

/// Resilient client with millisecond backoff for tests.
pub fn fast_client(provider: Arc<SequentialMockProvider>) -> ResilientClient {
    ResilientClient::new(provider).with_policy(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    })
}

fn response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage::new(10, 5)),
        model: "mock-model".into(),
        stop_reason: None,
        metadata: serde_json::Map::new(),
    }
}

/// Create a simple text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    response(Message::assistant(text))
}

/// Create a response requesting `(id, tool, input)` calls.
pub fn tool_use_response(calls: &[(&str, &str, serde_json::Value)]) -> ProviderResponse {
    let mut blocks = vec![ContentBlock::text("Let me check.")];
    blocks.extend(calls.iter().map(|(id, name, input)| ContentBlock::ToolUse {
        id: id.to_string(),
        name: name.to_string(),
        input: input.clone(),
    }));
    response(Message::assistant_blocks(blocks))
}
