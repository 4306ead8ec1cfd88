//! Built-in pricing table for the models helmsman talks to.
//!
//! Prices are in USD per 1 million tokens. Each model has input and output
//! prices plus cache write/read prices for providers that bill prompt
//! caching separately. Custom pricing can be added at runtime.

use helmsman_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_m: f64,
    pub output_per_m: f64,
    #[serde(default)]
    pub cache_write_per_m: f64,
    #[serde(default)]
    pub cache_read_per_m: f64,
}

impl ModelPricing {
    pub fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_write_per_m: 0.0,
            cache_read_per_m: 0.0,
        }
    }

    /// Anthropic-style pricing: cache writes at 1.25x input, reads at 0.1x.
    pub fn with_prompt_cache(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
            cache_write_per_m: input_per_m * 1.25,
            cache_read_per_m: input_per_m * 0.1,
        }
    }

    /// Compute cost in USD for one call's usage.
    pub fn cost(&self, usage: &Usage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_m
            + usage.completion_tokens as f64 * self.output_per_m
            + usage.cache_creation_tokens as f64 * self.cache_write_per_m
            + usage.cache_read_tokens as f64 * self.cache_read_per_m)
            / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // Anthropic
        prices.insert("anthropic/claude-opus-4".into(), ModelPricing::with_prompt_cache(15.0, 75.0));
        prices.insert("anthropic/claude-sonnet-4".into(), ModelPricing::with_prompt_cache(3.0, 15.0));
        prices.insert("anthropic/claude-3-7-sonnet".into(), ModelPricing::with_prompt_cache(3.0, 15.0));
        prices.insert("anthropic/claude-3-5-sonnet".into(), ModelPricing::with_prompt_cache(3.0, 15.0));
        prices.insert("anthropic/claude-3-5-haiku".into(), ModelPricing::with_prompt_cache(0.8, 4.0));
        prices.insert("anthropic/claude-haiku-4".into(), ModelPricing::with_prompt_cache(1.0, 5.0));

        // OpenAI
        prices.insert("openai/gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("openai/gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("openai/gpt-4.1".into(), ModelPricing::new(2.0, 8.0));
        prices.insert("openai/gpt-5".into(), ModelPricing::new(1.25, 10.0));
        prices.insert("openai/o1".into(), ModelPricing::new(15.0, 60.0));
        prices.insert("openai/o3".into(), ModelPricing::new(2.0, 8.0));
        prices.insert("openai/o3-mini".into(), ModelPricing::new(1.1, 4.4));
        prices.insert("openai/o4-mini".into(), ModelPricing::new(1.1, 4.4));

        // DeepSeek
        prices.insert("deepseek/deepseek-chat".into(), ModelPricing::new(0.27, 1.1));
        prices.insert("deepseek/deepseek-reasoner".into(), ModelPricing::new(0.55, 2.19));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// Resolve pricing for a model name as reported by a provider.
    ///
    /// Tries an exact match, then common provider prefixes
    /// (`gpt-4o` → `openai/gpt-4o`), then the longest key whose bare name is
    /// a prefix of the model (`claude-sonnet-4-20250514` → `claude-sonnet-4`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());

        if let Some(p) = prices.get(model) {
            return Some(p.clone());
        }

        for prefix in ["anthropic", "openai", "deepseek"] {
            if let Some(p) = prices.get(&format!("{prefix}/{model}")) {
                return Some(p.clone());
            }
        }

        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);

        prices
            .iter()
            .filter_map(|(key, pricing)| {
                let bare_key = key.rsplit('/').next().unwrap_or(key).to_lowercase();
                bare_model
                    .starts_with(&bare_key)
                    .then_some((bare_key.len(), pricing))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, p)| p.clone())
    }

    /// Compute cost for a model call, returning 0.0 if the model is unknown.
    pub fn compute_cost(&self, model: &str, usage: &Usage) -> f64 {
        self.lookup(model).map(|p| p.cost(usage)).unwrap_or(0.0)
    }

    /// List all known model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
