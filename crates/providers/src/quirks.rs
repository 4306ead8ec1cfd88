//! Provider-specific request remediation.
//!
//! Request bodies are built generically and then patched here for the
//! parameter renames and unsupported fields individual models insist on.

use serde_json::Value;
use tracing::debug;

/// Reasoning-family OpenAI models reject `max_tokens` and `temperature`.
pub fn is_reasoning_model(model: &str) -> bool {
    let bare = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    ["o1", "o3", "o4", "gpt-5"].iter().any(|prefix| {
        bare == *prefix
            || bare
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('-') || rest.starts_with('.'))
    })
}

/// Patch a chat-completions body in place.
pub fn apply_openai(body: &mut Value, model: &str, supports_stream_options: bool) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };

    if is_reasoning_model(model) {
        if let Some(max_tokens) = obj.remove("max_tokens") {
            obj.insert("max_completion_tokens".into(), max_tokens);
        }
        if obj.remove("temperature").is_some() {
            debug!(model, "Dropped temperature for reasoning model");
        }
    }

    if !supports_stream_options && obj.remove("stream_options").is_some() {
        debug!(model, "Stripped stream_options");
    }
}

/// Headroom added above the thinking budget when `max_tokens` is too small.
const THINKING_OUTPUT_HEADROOM: u64 = 4096;

/// Patch a Messages API body in place.
///
/// With extended thinking enabled the API only accepts `temperature = 1`
/// and requires `max_tokens` to exceed the thinking budget.
pub fn apply_anthropic(body: &mut Value) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };

    let Some(budget) = obj
        .get("thinking")
        .and_then(|t| t.get("budget_tokens"))
        .and_then(Value::as_u64)
    else {
        return;
    };

    obj.insert("temperature".into(), Value::from(1.0));
    obj.remove("top_p");

    let max_tokens = obj.get("max_tokens").and_then(Value::as_u64).unwrap_or(0);
    if max_tokens <= budget {
        obj.insert(
            "max_tokens".into(),
            Value::from(budget + THINKING_OUTPUT_HEADROOM),
        );
    }
}
