//! Shared HTTP plumbing for providers: client construction, error
//! classification from status and headers, and SSE line framing.

use std::time::Duration;

use helmsman_core::error::ProviderError;
use reqwest::header::HeaderMap;
use tracing::warn;

/// Build a reqwest client with the given request timeout.
pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

/// Map a transport failure onto the taxonomy.
pub(crate) fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Parse `retry-after` as whole seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
}

/// Read the `x-should-retry` provider hint.
pub fn parse_should_retry(headers: &HeaderMap) -> Option<bool> {
    match headers.get("x-should-retry").and_then(|v| v.to_str().ok()) {
        Some("true") => Some(true),
        Some("false") => Some(false),
        _ => None,
    }
}

/// Classify a non-success response.
///
/// Order of precedence: auth, explicit `x-should-retry` hint, oversized
/// prompt, rate limit, other transient statuses, everything else permanent.
/// Rejected credentials always rotate, whatever the hint says.
pub fn classify_response(
    status: u16,
    should_retry: Option<bool>,
    retry_after_secs: Option<u64>,
    body: String,
) -> ProviderError {
    if matches!(status, 401 | 403) {
        return ProviderError::AuthenticationFailed(body);
    }

    match should_retry {
        Some(true) => {
            return ProviderError::Retryable {
                status_code: status,
                message: body,
                retry_after_secs,
            };
        }
        Some(false) => {
            return ProviderError::Rejected {
                status_code: status,
                message: body,
            };
        }
        None => {}
    }

    if status == 413 || body.to_lowercase().contains("prompt is too long") {
        return ProviderError::PromptTooLong(body);
    }

    match status {
        429 => ProviderError::RateLimited {
            status_code: status,
            retry_after_secs,
        },
        408 | 409 | 500..=599 => ProviderError::Retryable {
            status_code: status,
            message: body,
            retry_after_secs,
        },
        _ => ProviderError::ApiError {
            status_code: status,
            message: body,
        },
    }
}

/// Consume a failed response into a classified error.
pub(crate) async fn error_from_response(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let should_retry = parse_should_retry(response.headers());
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    warn!(provider, status, body = %body, "Provider returned error");
    classify_response(status, should_retry, retry_after, body)
}

/// Incremental SSE framer: feed raw bytes, get back complete lines.
#[derive(Debug, Default)]
pub(crate) struct SseLines {
    buffer: String,
}

/// One meaningful SSE line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Event(String),
    Data(String),
}

impl SseLines {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseLine> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut lines = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            // Blank separators and comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(event) = line.strip_prefix("event:") {
                lines.push(SseLine::Event(event.trim().to_string()));
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    lines.push(SseLine::Data(data.to_string()));
                }
            }
        }
        lines
    }
}
