//! The API resilience layer.
//!
//! [`ResilientClient::send`] turns one logical model request into as many
//! provider attempts as it takes: transient failures back off exponentially
//! (or for as long as the server's `retry-after` asks), rejected credentials
//! rotate to the next key without delay, and permanent failures return at
//! once. Every completed call is priced and reported to the cost sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use helmsman_config::RetryConfig;
use helmsman_core::error::{ErrorClass, ProviderError};
use helmsman_core::message::Message;
use helmsman_core::provider::{CredentialSource, Provider, ProviderRequest, ProviderResponse};
use helmsman_core::{CostSink, NoopCostSink};
use helmsman_telemetry::PricingTable;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::DEFAULT_TIER;
use crate::stream::{collect_stream, normalize_blocks};

/// Upper bound on key rotations within one `send`, for sources that never
/// report exhaustion.
const MAX_CREDENTIAL_ROTATIONS: u32 = 16;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A server-provided `retry-after` wins over the computed backoff, up to
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        if let Some(secs) = retry_after_secs {
            let requested = Duration::from_secs(secs);
            if requested > self.max_delay {
                warn!(
                    requested_secs = secs,
                    max_delay_ms = self.max_delay.as_millis() as u64,
                    "retry-after exceeds max delay, capping"
                );
                return self.max_delay;
            }
            return requested;
        }
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// Emitted before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// One-based retry number
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub error: String,
}

impl std::fmt::Display for RetryNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} · Retrying in {}s… (attempt {}/{})",
            self.error,
            self.delay.as_secs_f64().ceil() as u64,
            self.attempt,
            self.max_retries
        )
    }
}

/// Wraps a provider with retry, credential rotation, normalization and
/// cost accounting.
pub struct ResilientClient {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    credentials: Option<Arc<dyn CredentialSource>>,
    tier: String,
    pricing: Arc<PricingTable>,
    cost_sink: Arc<dyn CostSink>,
    stream: bool,
}

impl ResilientClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            policy: RetryPolicy::default(),
            credentials: None,
            tier: DEFAULT_TIER.into(),
            pricing: Arc::new(PricingTable::with_defaults()),
            cost_sink: Arc::new(NoopCostSink),
            stream: false,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a credential source; each attempt uses its active key.
    pub fn with_credentials(
        mut self,
        credentials: Arc<dyn CredentialSource>,
        tier: impl Into<String>,
    ) -> Self {
        self.credentials = Some(credentials);
        self.tier = tier.into();
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_cost_sink(mut self, sink: Arc<dyn CostSink>) -> Self {
        self.cost_sink = sink;
        self
    }

    /// Use the provider's streaming path. Output is identical either way.
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Send with no retry listener.
    pub async fn send(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<Message, ProviderError> {
        self.send_with(request, cancel, |_| {}).await
    }

    /// Send, calling `on_retry` before every backoff sleep.
    pub async fn send_with<F>(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
        mut on_retry: F,
    ) -> Result<Message, ProviderError>
    where
        F: FnMut(&RetryNotice) + Send,
    {
        let started = Instant::now();
        let mut retries = 0u32;
        let mut rotations = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }

            let key = match &self.credentials {
                Some(source) => match source.active_key(&self.tier) {
                    Some(key) => Some(key),
                    None => {
                        return Err(ProviderError::CredentialsExhausted(format!(
                            "no usable credential left for tier '{}'",
                            self.tier
                        )));
                    }
                },
                None => None,
            };

            let mut attempt_request = request.clone();
            attempt_request.api_key = key.clone();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ProviderError::Cancelled),
                result = self.attempt(attempt_request, cancel) => result,
            };

            let err = match outcome {
                Ok(response) => return Ok(self.finish(response, started)),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Cancelled | ErrorClass::Permanent => {
                    debug!(provider = %self.provider.name(), error = %err, "Not retrying");
                    return Err(err);
                }
                ErrorClass::Auth => {
                    let (Some(source), Some(key)) = (&self.credentials, key) else {
                        return Err(err);
                    };
                    rotations += 1;
                    if rotations > MAX_CREDENTIAL_ROTATIONS {
                        return Err(ProviderError::CredentialsExhausted(err.to_string()));
                    }
                    source.mark_failed(&key, &self.tier);
                    info!(provider = %self.provider.name(), tier = %self.tier, "Rotating credential after auth failure");
                }
                ErrorClass::Transient => {
                    if retries >= self.policy.max_retries {
                        warn!(provider = %self.provider.name(), retries, error = %err, "Retries exhausted");
                        return Err(err);
                    }
                    let delay = self.policy.delay_for(retries, err.retry_after_secs());
                    retries += 1;

                    let notice = RetryNotice {
                        attempt: retries,
                        max_retries: self.policy.max_retries,
                        delay,
                        error: err.to_string(),
                    };
                    warn!(
                        provider = %self.provider.name(),
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient provider error, backing off"
                    );
                    on_retry(&notice);

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        if self.stream {
            let model = request.model.clone();
            let rx = self.provider.stream(request).await?;
            collect_stream(rx, &model, cancel).await
        } else {
            self.provider.complete(request).await
        }
    }

    /// Normalize, price, and report a successful response.
    fn finish(&self, response: ProviderResponse, started: Instant) -> Message {
        let duration_ms = started.elapsed().as_millis() as u64;
        let cost = response
            .usage
            .as_ref()
            .map(|u| self.pricing.compute_cost(&response.model, u))
            .unwrap_or(0.0);
        self.cost_sink.record(cost, duration_ms);

        let mut message = response.message;
        message.content = normalize_blocks(message.content);
        message.usage = response.usage;
        message.cost_usd = Some(cost);
        message.duration_ms = Some(duration_ms);
        message.model = Some(response.model);
        if let Some(reason) = response.stop_reason {
            message
                .metadata
                .insert("stop_reason".into(), serde_json::Value::String(reason));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::KeyRing;
    use async_trait::async_trait;
    use helmsman_core::message::ContentBlock;
    use helmsman_core::provider::Usage;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of outcomes and records the key each call used.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
        keys_seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                keys_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.keys_seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.keys_seen.lock().unwrap().push(request.api_key.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::InvalidResponse("script exhausted".into())))
        }
    }

    fn ok(text: &str) -> Result<ProviderResponse, ProviderError> {
        Ok(ProviderResponse {
            message: Message::assistant_blocks(vec![
                ContentBlock::text(text),
                ContentBlock::text(""),
            ]),
            usage: Some(Usage::new(1_000_000, 0)),
            model: "claude-sonnet-4-20250514".into(),
            stop_reason: Some("end_turn".into()),
            metadata: Default::default(),
        })
    }

    fn rate_limited() -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::RateLimited {
            status_code: 429,
            retry_after_secs: None,
        })
    }

    fn request() -> ProviderRequest {
        ProviderRequest::new("claude-sonnet-4-20250514", vec![Message::user("hi")])
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<(f64, u64)>>);

    impl CostSink for RecordingSink {
        fn record(&self, cost_usd: f64, duration_ms: u64) {
            self.0.lock().unwrap().push((cost_usd, duration_ms));
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(5, None), Duration::from_millis(16_000));
        assert_eq!(policy.delay_for(6, None), Duration::from_millis(32_000));
        assert_eq!(policy.delay_for(40, None), Duration::from_millis(32_000));
        assert_eq!(policy.delay_for(0, Some(7)), Duration::from_secs(7));
    }

    #[test]
    fn retry_after_is_capped_at_max_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0, Some(86_400)), Duration::from_millis(32_000));
        assert_eq!(policy.delay_for(3, Some(32)), Duration::from_secs(32));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_after_does_not_stall_the_request() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited {
                status_code: 429,
                retry_after_secs: Some(86_400),
            }),
            ok("done"),
        ]);
        let client = ResilientClient::new(provider);
        let started = tokio::time::Instant::now();
        let mut delays = Vec::new();
        client
            .send_with(request(), &CancellationToken::new(), |n| delays.push(n.delay))
            .await
            .unwrap();
        assert_eq!(delays, vec![Duration::from_millis(32_000)]);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn two_rate_limits_then_success() {
        let provider = ScriptedProvider::new(vec![rate_limited(), rate_limited(), ok("done")]);
        let sink = Arc::new(RecordingSink::default());
        let client = ResilientClient::new(provider.clone()).with_cost_sink(sink.clone());

        let mut notices = Vec::new();
        let started = tokio::time::Instant::now();
        let message = client
            .send_with(request(), &CancellationToken::new(), |n| notices.push(n.clone()))
            .await
            .unwrap();

        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].delay, Duration::from_millis(500));
        assert_eq!(notices[1].delay, Duration::from_millis(1000));
        assert!(started.elapsed() >= Duration::from_millis(1500));
        assert_eq!(provider.calls(), 3);

        // Normalized, priced, and reported once
        assert_eq!(message.content, vec![ContentBlock::text("done")]);
        let cost = message.cost_usd.unwrap();
        assert!((cost - 3.0).abs() < 1e-9);
        assert_eq!(sink.0.lock().unwrap().len(), 1);
        assert_eq!(message.metadata["stop_reason"], "end_turn");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_overrides_backoff() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::RateLimited {
                status_code: 429,
                retry_after_secs: Some(9),
            }),
            ok("done"),
        ]);
        let client = ResilientClient::new(provider);
        let mut delays = Vec::new();
        client
            .send_with(request(), &CancellationToken::new(), |n| delays.push(n.delay))
            .await
            .unwrap();
        assert_eq!(delays, vec![Duration::from_secs(9)]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_exhaust() {
        let provider = ScriptedProvider::new((0..4).map(|_| rate_limited()).collect());
        let client = ResilientClient::new(provider.clone()).with_policy(RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        });
        let err = client.send(request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::PromptTooLong("too big".into())),
            ok("never"),
        ]);
        let client = ResilientClient::new(provider.clone());
        let err = client.send(request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::PromptTooLong(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn auth_failure_rotates_credentials() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            ok("done"),
        ]);
        let ring = Arc::new(KeyRing::new(["k1".to_string(), "k2".to_string()]));
        let client = ResilientClient::new(provider.clone()).with_credentials(ring.clone(), DEFAULT_TIER);

        client.send(request(), &CancellationToken::new()).await.unwrap();
        let keys = provider.keys_seen.lock().unwrap().clone();
        assert_eq!(keys, vec![Some("k1".to_string()), Some("k2".to_string())]);
        assert_eq!(ring.remaining(DEFAULT_TIER), 1);
    }

    #[tokio::test]
    async fn exhausted_credentials_fail_terminally() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad".into())),
            Err(ProviderError::AuthenticationFailed("bad".into())),
        ]);
        let ring = Arc::new(KeyRing::new(["k1".to_string(), "k2".to_string()]));
        let client = ResilientClient::new(provider.clone()).with_credentials(ring, DEFAULT_TIER);

        let err = client.send(request(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::CredentialsExhausted(_)));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn auth_failure_without_key_ring_is_terminal() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::AuthenticationFailed("bad".into()))]);
        let client = ResilientClient::new(provider);
        let err = client.send(request(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Auth);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let provider = ScriptedProvider::new(vec![rate_limited(), ok("never")]);
        let client = ResilientClient::new(provider.clone()).with_policy(RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        });
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = client.send(request(), &token).await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn streaming_and_complete_paths_agree() {
        let complete = ResilientClient::new(ScriptedProvider::new(vec![ok("same")]));
        let streamed = ResilientClient::new(ScriptedProvider::new(vec![ok("same")])).with_streaming(true);

        let a = complete.send(request(), &CancellationToken::new()).await.unwrap();
        let b = streamed.send(request(), &CancellationToken::new()).await.unwrap();
        assert_eq!(a.content, b.content);
        assert_eq!(a.usage, b.usage);
        assert_eq!(a.model, b.model);
    }

    #[test]
    fn retry_notice_display() {
        let notice = RetryNotice {
            attempt: 2,
            max_retries: 10,
            delay: Duration::from_millis(1000),
            error: "Rate limited".into(),
        };
        assert_eq!(notice.to_string(), "Rate limited · Retrying in 1s… (attempt 2/10)");
    }
}
