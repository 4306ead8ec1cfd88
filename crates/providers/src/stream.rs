//! Folding streamed chunks into the normalized assistant message.
//!
//! Both the streaming and the complete path end in [`normalize_blocks`], so
//! a response looks the same to the orchestrator whichever way it arrived.

use helmsman_core::error::ProviderError;
use helmsman_core::message::{ContentBlock, Message};
use helmsman_core::provider::{ChunkReceiver, ProviderResponse, StreamChunk, Usage};
use tokio_util::sync::CancellationToken;

/// Canonical block order: thinking first, then the remaining blocks in
/// arrival order with adjacent text merged and empty text dropped.
pub fn normalize_blocks(blocks: Vec<ContentBlock>) -> Vec<ContentBlock> {
    let (thinking, rest): (Vec<_>, Vec<_>) = blocks
        .into_iter()
        .partition(|b| matches!(b, ContentBlock::Thinking { .. }));

    let mut out: Vec<ContentBlock> = thinking;
    for block in rest {
        match block {
            ContentBlock::Text { text } if text.is_empty() => {}
            ContentBlock::Text { text } => match out.last_mut() {
                Some(ContentBlock::Text { text: prev }) => prev.push_str(&text),
                _ => out.push(ContentBlock::Text { text }),
            },
            other => out.push(other),
        }
    }
    out
}

/// Accumulates chunks in arrival order.
#[derive(Debug, Default)]
pub struct StreamCollector {
    blocks: Vec<ContentBlock>,
    usage: Option<Usage>,
    model: Option<String>,
    stop_reason: Option<String>,
    done: bool,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        if let Some(thinking) = chunk.thinking {
            match self.blocks.last_mut() {
                Some(ContentBlock::Thinking { thinking: prev, signature: None }) => {
                    prev.push_str(&thinking)
                }
                _ => self.blocks.push(ContentBlock::Thinking {
                    thinking,
                    signature: None,
                }),
            }
        }
        if let Some(sig) = chunk.thinking_signature
            && let Some(ContentBlock::Thinking { signature, .. }) = self
                .blocks
                .iter_mut()
                .rev()
                .find(|b| matches!(b, ContentBlock::Thinking { .. }))
        {
            *signature = Some(sig);
        }
        if let Some(text) = chunk.text {
            match self.blocks.last_mut() {
                Some(ContentBlock::Text { text: prev }) => prev.push_str(&text),
                _ => self.blocks.push(ContentBlock::Text { text }),
            }
        }
        self.blocks.extend(chunk.tool_uses);

        if let Some(usage) = chunk.usage {
            match &mut self.usage {
                Some(existing) => existing.merge(&usage),
                None => self.usage = Some(usage),
            }
        }
        if chunk.model.is_some() {
            self.model = chunk.model;
        }
        if chunk.stop_reason.is_some() {
            self.stop_reason = chunk.stop_reason;
        }
        self.done |= chunk.done;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Build the response; `fallback_model` is used when no chunk named one.
    pub fn finish(self, fallback_model: &str) -> ProviderResponse {
        let mut message = Message::assistant_blocks(normalize_blocks(self.blocks));
        message.usage = self.usage.clone();
        ProviderResponse {
            message,
            usage: self.usage,
            model: self.model.unwrap_or_else(|| fallback_model.to_string()),
            stop_reason: self.stop_reason,
            metadata: serde_json::Map::new(),
        }
    }
}

/// Drain a provider stream into a response, aborting on cancellation.
///
/// A stream that closes before its final chunk is reported as interrupted
/// so the resilience layer can retry it.
pub async fn collect_stream(
    mut rx: ChunkReceiver,
    fallback_model: &str,
    cancel: &CancellationToken,
) -> Result<ProviderResponse, ProviderError> {
    let mut collector = StreamCollector::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            next = rx.recv() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                collector.push(chunk);
                if collector.is_done() {
                    break;
                }
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ProviderError::StreamInterrupted(
                    "stream closed before completion".into(),
                ));
            }
        }
    }
    Ok(collector.finish(fallback_model))
}
