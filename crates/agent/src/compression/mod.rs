//! Auto-compaction.
//!
//! When the conversation reaches `threshold_ratio` of the model's context
//! window it is summarized by the model and replaced with a short reseeded
//! conversation: a notice, the summary, the most recently touched files and
//! a continuation prompt. Compaction is best-effort; any failure leaves the
//! original conversation in place.

pub mod prompt;

use helmsman_config::CompressionConfig;
use helmsman_core::error::Error;
use helmsman_core::freshness::FreshnessTracker;
use helmsman_core::message::{ContentBlock, Conversation, Message, Role};
use helmsman_core::provider::ProviderRequest;
use helmsman_providers::ResilientClient;
use helmsman_tools::number_lines;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SessionContext;
use crate::context::token::{count_tokens, estimate_messages_tokens, estimate_tokens};
use prompt::{COMPRESSION_NOTICE, CONTINUE_PROMPT, SUMMARY_REQUEST, SUMMARY_SYSTEM_PROMPT};

const SUMMARY_MAX_TOKENS: u32 = 16_384;

pub struct Compressor {
    config: CompressionConfig,
}

impl Compressor {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Token count at which compaction triggers.
    pub fn threshold_tokens(&self) -> u64 {
        (self.config.context_limit as f64 * self.config.threshold_ratio) as u64
    }

    pub fn should_compress(&self, conversation: &Conversation) -> bool {
        self.config.enabled
            && conversation.len() >= self.config.min_messages
            && count_tokens(&conversation.messages) >= self.threshold_tokens()
    }

    /// Compress `conversation` if it crossed the threshold.
    ///
    /// Returns the conversation to continue with and whether it was
    /// replaced. On success the session's reminder and freshness state is
    /// reset.
    pub async fn maybe_compress(
        &self,
        conversation: Conversation,
        session: &mut SessionContext,
        client: &ResilientClient,
        model: &str,
        cancel: &CancellationToken,
    ) -> (Conversation, bool) {
        if !self.should_compress(&conversation) {
            return (conversation, false);
        }

        let threshold = self.threshold_tokens();
        let before = count_tokens(&conversation.messages);
        info!(
            conversation_id = %conversation.id,
            tokens = before,
            threshold,
            "Context over threshold, compressing"
        );

        let summary = match self.summarize(&conversation, client, model, cancel).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Compression failed, keeping original conversation");
                return (conversation, false);
            }
        };

        let mut seeded = vec![Message::user(COMPRESSION_NOTICE), Message::assistant(summary)];
        let continuation = Message::user(CONTINUE_PROMPT);
        let base = estimate_messages_tokens(&seeded) as u64 + estimate_tokens(CONTINUE_PROMPT) as u64;
        if base >= threshold {
            warn!(summary_tokens = base, threshold, "Summary alone exceeds threshold, keeping original conversation");
            return (conversation, false);
        }

        session.sync_events();
        let recovered = self
            .recover_files(session.freshness(), threshold - base - 1)
            .await;
        let file_count = recovered.len();
        seeded.extend(recovered);
        seeded.push(continuation);

        let compressed = conversation.reseed(seeded);
        session.reset();

        info!(
            conversation_id = %compressed.id,
            before,
            after = count_tokens(&compressed.messages),
            recovered_files = file_count,
            "Conversation compressed"
        );
        (compressed, true)
    }

    async fn summarize(
        &self,
        conversation: &Conversation,
        client: &ResilientClient,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let mut messages: Vec<Message> = conversation
            .messages
            .iter()
            .filter(|m| m.is_model_visible())
            .cloned()
            .collect();
        match messages.last_mut() {
            Some(last) if last.role == Role::User => {
                last.content.push(ContentBlock::text(SUMMARY_REQUEST));
            }
            _ => messages.push(Message::user(SUMMARY_REQUEST)),
        }

        let mut request = ProviderRequest::new(model, messages);
        request.system = SUMMARY_SYSTEM_PROMPT.into();
        request.max_tokens = Some(SUMMARY_MAX_TOKENS);

        let response = client.send(request, cancel).await?;
        let summary = response.text();
        if summary.trim().is_empty() {
            return Err(Error::Internal("summary response was empty".into()));
        }
        Ok(summary)
    }

    /// Re-read the most recently touched files, within the per-file cap,
    /// the cumulative cap and `headroom`.
    async fn recover_files(&self, tracker: &dyn FreshnessTracker, headroom: u64) -> Vec<Message> {
        let budget = self.config.max_total_file_tokens.min(headroom);
        let mut used = 0u64;
        let mut out = Vec::new();

        for file in tracker.important_files(self.config.max_files_to_recover) {
            let content = match tokio::fs::read_to_string(&file.path).await {
                Ok(content) => content,
                Err(e) => {
                    debug!(path = %file.path, error = %e, "Skipping unreadable file during recovery");
                    continue;
                }
            };
            let body = render_file(&file.path, &content, self.config.max_tokens_per_file);
            let tokens = estimate_tokens(&body) as u64;
            if used + tokens > budget {
                debug!(path = %file.path, tokens, used, budget, "File does not fit recovery budget");
                continue;
            }
            used += tokens;
            out.push(Message::user(body));
        }
        out
    }
}

/// Labeled, line-numbered file body, cut to roughly `max_tokens`.
fn render_file(path: &str, content: &str, max_tokens: u64) -> String {
    let char_budget = (max_tokens as usize).saturating_mul(4);
    let lines: Vec<&str> = content.lines().collect();

    let mut kept = 0;
    let mut size = 0;
    for line in &lines {
        // 7 columns of line number and tab, plus the newline
        let cost = line.len() + 8;
        if size + cost > char_budget {
            break;
        }
        size += cost;
        kept += 1;
    }

    let mut body = format!(
        "**Recovered File: {path}**\n\n```\n{}\n```",
        number_lines(&lines[..kept], 1)
    );
    if kept < lines.len() {
        body.push_str(&format!("\n... [truncated: showing {kept} of {} lines]", lines.len()));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, fast_client, text_response};
    use helmsman_config::ReminderConfig;
    use helmsman_core::error::ProviderError;
    use helmsman_core::event::{DomainEvent, EventBus};
    use helmsman_core::provider::Usage;
    use std::sync::Arc;

    fn config() -> CompressionConfig {
        CompressionConfig {
            context_limit: 100_000,
            ..CompressionConfig::default()
        }
    }

    /// Three messages whose reported usage puts them at 95% of 100k.
    fn heavy_conversation() -> Conversation {
        let mut reply = Message::assistant("I refactored the parser.");
        reply.usage = Some(Usage::new(94_000, 1_000));
        Conversation::from_messages(vec![
            Message::user("Please refactor the parser"),
            reply,
            Message::user("Now update the tests"),
        ])
    }

    #[test]
    fn threshold_math() {
        let compressor = Compressor::new(config());
        assert_eq!(compressor.threshold_tokens(), 92_000);
        assert!(compressor.should_compress(&heavy_conversation()));

        let mut short = heavy_conversation();
        short.messages.pop();
        assert!(!compressor.should_compress(&short));
    }

    #[tokio::test]
    async fn compresses_and_recovers_files() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("parser.rs");
        let big = dir.path().join("huge.rs");
        std::fs::write(&small, "fn parse() {}\nfn lex() {}\n").unwrap();
        std::fs::write(&big, "let x = 1;\n".repeat(20_000)).unwrap();

        let bus = EventBus::default();
        let mut session = SessionContext::in_memory(ReminderConfig::default(), &bus);
        bus.publish(DomainEvent::file_read(small.to_str().unwrap()));
        bus.publish(DomainEvent::file_edited(big.to_str().unwrap()));
        session.sync_events();

        let provider = Arc::new(SequentialMockProvider::new(vec![Ok(text_response(
            "1. Technical Context: Rust parser work.",
        ))]));
        let client = fast_client(provider.clone());

        let original = heavy_conversation();
        let original_id = original.id.clone();
        let (compressed, did) = Compressor::new(config())
            .maybe_compress(original, &mut session, &client, "mock-model", &CancellationToken::new())
            .await;

        assert!(did);
        assert_eq!(compressed.id, original_id);
        assert_eq!(compressed.messages[0].text(), COMPRESSION_NOTICE);
        assert!(compressed.messages[1].text().contains("Technical Context"));
        assert!(compressed.messages[1].usage.is_none());

        let recovered: Vec<String> = compressed
            .messages
            .iter()
            .map(|m| m.text())
            .filter(|t| t.starts_with("**Recovered File:"))
            .collect();
        assert_eq!(recovered.len(), 2);
        assert!(recovered.iter().any(|t| t.contains("     1\tfn parse() {}")));
        assert!(recovered.iter().any(|t| t.contains("[truncated: showing")));
        assert_eq!(compressed.last().unwrap().text(), CONTINUE_PROMPT);
        assert!(count_tokens(&compressed.messages) < 92_000);

        // Summary request carried the whole conversation plus the prompt
        let request = &provider.requests()[0];
        assert_eq!(request.system, SUMMARY_SYSTEM_PROMPT);
        assert!(request.messages.last().unwrap().text().contains("Key Decisions"));

        // Session caches were reset
        assert!(session.freshness().important_files(10).is_empty());
    }

    #[tokio::test]
    async fn failure_keeps_original() {
        let bus = EventBus::default();
        let mut session = SessionContext::in_memory(ReminderConfig::default(), &bus);
        let provider = Arc::new(SequentialMockProvider::new(vec![Err(ProviderError::PromptTooLong(
            "prompt is too long".into(),
        ))]));
        let client = fast_client(provider);

        let original = heavy_conversation();
        let before: Vec<String> = original.messages.iter().map(|m| m.id.clone()).collect();
        let (result, did) = Compressor::new(config())
            .maybe_compress(original, &mut session, &client, "mock-model", &CancellationToken::new())
            .await;

        assert!(!did);
        let after: Vec<String> = result.messages.iter().map(|m| m.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn below_threshold_makes_no_call() {
        let bus = EventBus::default();
        let mut session = SessionContext::in_memory(ReminderConfig::default(), &bus);
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let client = fast_client(provider.clone());

        let conversation = Conversation::from_messages(vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::user("bye"),
        ]);
        let (_, did) = Compressor::new(config())
            .maybe_compress(conversation, &mut session, &client, "mock-model", &CancellationToken::new())
            .await;
        assert!(!did);
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn render_truncates_over_cap() {
        let content = "abcd\n".repeat(100);
        let body = render_file("f.txt", &content, 30);
        assert!(body.starts_with("**Recovered File: f.txt**"));
        assert!(body.contains("[truncated: showing 10 of 100 lines]"));

        let whole = render_file("f.txt", "one\ntwo", 1000);
        assert!(!whole.contains("truncated"));
        assert!(whole.contains("     2\ttwo"));
    }
}
