//! Provider router: builds providers and their key rings from config and
//! hands out resilient clients for them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::anthropic::AnthropicProvider;
use crate::credentials::{DEFAULT_TIER, KeyRing};
use crate::openai_compat::OpenAiCompatProvider;
use crate::resilience::{ResilientClient, RetryPolicy};
use helmsman_config::{AppConfig, ProviderStyle, RetryConfig};
use helmsman_core::CostSink;
use helmsman_core::provider::Provider;
use helmsman_telemetry::PricingTable;

struct Route {
    provider: Arc<dyn Provider>,
    keys: Arc<KeyRing>,
}

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    routes: HashMap<String, Route>,
    default_provider: String,
    retry: RetryConfig,
    pricing: Arc<PricingTable>,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            routes: HashMap::new(),
            default_provider: default_provider.into(),
            retry: RetryConfig::default(),
            pricing: Arc::new(PricingTable::with_defaults()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<PricingTable>) -> Self {
        self.pricing = pricing;
        self
    }

    /// Register a provider together with the keys it may rotate through.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>, keys: KeyRing) {
        self.routes.insert(
            name.into(),
            Route {
                provider,
                keys: Arc::new(keys),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.routes.get(name).map(|r| r.provider.clone())
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// A resilient client for `name`, sharing that provider's key ring.
    pub fn client(&self, name: &str, cost_sink: Arc<dyn CostSink>) -> Option<ResilientClient> {
        let route = self.routes.get(name)?;
        Some(
            ResilientClient::new(route.provider.clone())
                .with_policy(RetryPolicy::from(&self.retry))
                .with_streaming(self.retry.stream)
                .with_credentials(route.keys.clone(), DEFAULT_TIER)
                .with_pricing(self.pricing.clone())
                .with_cost_sink(cost_sink),
        )
    }

    /// A resilient client for the default provider.
    pub fn default_client(&self, cost_sink: Arc<dyn CostSink>) -> Option<ResilientClient> {
        self.client(&self.default_provider, cost_sink)
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// The default provider is always registered, even when it has no section
/// of its own; it then uses the global key list.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider).with_retry(config.retry.clone());

    for (name, provider_config) in &config.providers {
        let keys = config.keys_for(name);
        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));
        let first_key = keys.first().cloned().unwrap_or_default();

        let provider: Arc<dyn Provider> = match provider_config.style {
            ProviderStyle::Anthropic => Arc::new(
                AnthropicProvider::new(first_key)
                    .with_name(name.clone())
                    .with_base_url(base_url),
            ),
            ProviderStyle::OpenAi => Arc::new(
                OpenAiCompatProvider::new(name, base_url, first_key)
                    .with_stream_options(provider_config.supports_stream_options),
            ),
        };
        router.register(name.clone(), provider, KeyRing::new(keys));
    }

    if router.get(&config.default_provider).is_none() {
        let name = &config.default_provider;
        let keys = config.keys_for(name);
        let first_key = keys.first().cloned().unwrap_or_default();
        let provider: Arc<dyn Provider> = if name == "anthropic" {
            Arc::new(AnthropicProvider::new(first_key))
        } else {
            Arc::new(OpenAiCompatProvider::new(name, default_base_url(name), first_key))
        };
        router.register(name.clone(), provider, KeyRing::new(keys));
    }

    router
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "anthropic" => "https://api.anthropic.com".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
