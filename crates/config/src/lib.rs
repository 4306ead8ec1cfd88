//! Configuration loading, validation, and management for helmsman.
//!
//! Loads configuration from `~/.helmsman/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.helmsman/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API keys, tried in order (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Extended-thinking budget; unset disables thinking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Retry and backoff policy for provider calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Automatic context compression
    #[serde(default)]
    pub compression: CompressionConfig,

    /// System reminder generation
    #[serde(default)]
    pub reminders: ReminderConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "anthropic".into()
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_true() -> bool {
    true
}

/// Redact a list of secrets for Debug output.
fn redact(keys: &[String]) -> String {
    format!("[{} REDACTED]", keys.len())
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_keys", &redact(&self.api_keys))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("thinking_budget", &self.thinking_budget)
            .field("retry", &self.retry)
            .field("compression", &self.compression)
            .field("reminders", &self.reminders)
            .field("agent", &self.agent)
            .field("logging", &self.logging)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Wire dialect spoken by a provider endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStyle {
    /// Content-block style (Messages API)
    Anthropic,
    /// Choice/delta style (chat completions)
    OpenAi,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_keys: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    #[serde(default = "default_style")]
    pub style: ProviderStyle,

    /// Some OpenAI-compatible servers reject `stream_options`
    #[serde(default = "default_true")]
    pub supports_stream_options: bool,
}

fn default_style() -> ProviderStyle {
    ProviderStyle::OpenAi
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_keys", &redact(&self.api_keys))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("style", &self.style)
            .field("supports_stream_options", &self.supports_stream_options)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Use the streaming path for model calls
    #[serde(default)]
    pub stream: bool,
}

fn default_max_retries() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    32_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_threshold_ratio")]
    pub threshold_ratio: f64,

    #[serde(default = "default_context_limit")]
    pub context_limit: u64,

    #[serde(default = "default_min_messages")]
    pub min_messages: usize,

    #[serde(default = "default_max_files_to_recover")]
    pub max_files_to_recover: usize,

    #[serde(default = "default_max_tokens_per_file")]
    pub max_tokens_per_file: u64,

    #[serde(default = "default_max_total_file_tokens")]
    pub max_total_file_tokens: u64,
}

fn default_threshold_ratio() -> f64 {
    0.92
}
fn default_context_limit() -> u64 {
    200_000
}
fn default_min_messages() -> usize {
    3
}
fn default_max_files_to_recover() -> usize {
    5
}
fn default_max_tokens_per_file() -> u64 {
    10_000
}
fn default_max_total_file_tokens() -> u64 {
    50_000
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: default_threshold_ratio(),
            context_limit: default_context_limit(),
            min_messages: default_min_messages(),
            max_files_to_recover: default_max_files_to_recover(),
            max_tokens_per_file: default_max_tokens_per_file(),
            max_total_file_tokens: default_max_total_file_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub todo_empty: bool,

    #[serde(default = "default_true")]
    pub todo_changed: bool,

    #[serde(default = "default_true")]
    pub security: bool,

    #[serde(default = "default_true")]
    pub performance: bool,

    #[serde(default = "default_max_per_session")]
    pub max_per_session: usize,

    #[serde(default = "default_max_per_call")]
    pub max_per_call: usize,

    #[serde(default = "default_long_session_minutes")]
    pub long_session_minutes: u64,
}

fn default_max_per_session() -> usize {
    10
}
fn default_max_per_call() -> usize {
    3
}
fn default_long_session_minutes() -> u64 {
    30
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            todo_empty: true,
            todo_changed: true,
            security: true,
            performance: true,
            max_per_session: default_max_per_session(),
            max_per_call: default_max_per_call(),
            long_session_minutes: default_long_session_minutes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Tool rounds allowed in one turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Upper bound on invocations running at once inside a concurrent group
    #[serde(default = "default_max_tool_concurrency")]
    pub max_tool_concurrency: usize,

    /// Delay before a finished or cancelled turn returns to idle
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_agent_id() -> String {
    "main".into()
}
fn default_system_prompt() -> String {
    "You are helmsman, an agent that completes software tasks using the tools available to you. \
     Prefer reading files before editing them and keep the task list up to date."
        .into()
}
fn default_max_iterations() -> usize {
    50
}
fn default_max_tool_concurrency() -> usize {
    10
}
fn default_cancel_grace_ms() -> u64 {
    250
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            system_prompt: default_system_prompt(),
            max_iterations: default_max_iterations(),
            max_tool_concurrency: default_max_tool_concurrency(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.helmsman/config.toml).
    ///
    /// Environment overrides:
    /// - `HELMSMAN_API_KEY`: comma-separated list, replaces `api_keys`
    /// - `HELMSMAN_PROVIDER`
    /// - `HELMSMAN_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (usually `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("HELMSMAN_API_KEY") {
            let keys: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
            if !keys.is_empty() {
                self.api_keys = keys;
            }
        }

        if let Some(provider) = lookup("HELMSMAN_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("HELMSMAN_MODEL") {
            self.default_model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".helmsman")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let ratio = self.compression.threshold_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "compression.threshold_ratio must be in (0, 1]".into(),
            ));
        }

        if self.reminders.max_per_call == 0 {
            return Err(ConfigError::ValidationError(
                "reminders.max_per_call must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        if self.agent.max_tool_concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_concurrency must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Keys for `provider`: its own list, falling back to the global one.
    pub fn keys_for(&self, provider: &str) -> Vec<String> {
        match self.providers.get(provider) {
            Some(p) if !p.api_keys.is_empty() => p.api_keys.clone(),
            _ => self.api_keys.clone(),
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            thinking_budget: None,
            retry: RetryConfig::default(),
            compression: CompressionConfig::default(),
            reminders: ReminderConfig::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
