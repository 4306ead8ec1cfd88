//! LLM provider plumbing.
//!
//! Wire adapters for the Messages API and chat-completions style endpoints
//! implement `helmsman_core::Provider`. [`ResilientClient`] wraps one of them
//! with retry, credential rotation and cost accounting; the router builds
//! both from configuration.

pub mod anthropic;
pub mod credentials;
pub mod http;
pub mod openai_compat;
pub mod quirks;
pub mod resilience;
pub mod router;
pub mod stream;

pub use anthropic::AnthropicProvider;
pub use credentials::{DEFAULT_TIER, KeyRing};
pub use openai_compat::OpenAiCompatProvider;
pub use resilience::{ResilientClient, RetryNotice, RetryPolicy};
pub use router::{ProviderRouter, build_from_config};
pub use stream::{StreamCollector, collect_stream, normalize_blocks};
