//! Error types for the helmsman domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; `ProviderError` additionally
//! classifies itself into the retry taxonomy the resilience layer acts on.

use thiserror::Error;

/// The top-level error type for all helmsman operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Turn lifecycle ---
    #[error("A turn is already in progress (request {active_id})")]
    AlreadyActive { active_id: String },

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// How the resilience layer should treat a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection failures, 408/409/429, 5xx, provider retry hints.
    Transient,
    /// Bad or revoked credential. Rotate, then retry.
    Auth,
    /// Oversized prompt, malformed request, other 4xx. Never retried.
    Permanent,
    /// The caller cancelled the request. Not an error for the user.
    Cancelled,
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Provider asked for a retry: {message} (status: {status_code})")]
    Retryable {
        status_code: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Provider rejected the request: {message} (status: {status_code})")]
    Rejected { status_code: u16, message: String },

    #[error("Rate limited by provider (status: {status_code})")]
    RateLimited {
        status_code: u16,
        retry_after_secs: Option<u64>,
    },

    #[error("Prompt is too long: {0}")]
    PromptTooLong(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("All credentials exhausted: {0}")]
    CredentialsExhausted(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map this error onto the retry taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::StreamInterrupted(_) => ErrorClass::Transient,
            Self::RateLimited { .. } | Self::Retryable { .. } => ErrorClass::Transient,
            Self::ApiError { status_code, .. } => classify_status(*status_code),
            Self::AuthenticationFailed(_) => ErrorClass::Auth,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::PromptTooLong(_)
            | Self::CredentialsExhausted(_)
            | Self::NotConfigured(_)
            | Self::InvalidResponse(_)
            | Self::Rejected { .. } => ErrorClass::Permanent,
        }
    }

    /// Whether the resilience layer may retry this error after a backoff.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Server-provided retry delay, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            }
            | Self::Retryable {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Classify a bare HTTP status code.
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        401 | 403 => ErrorClass::Auth,
        408 | 409 | 429 => ErrorClass::Transient,
        500..=599 => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool cancelled: {0}")]
    Cancelled(String),
}
