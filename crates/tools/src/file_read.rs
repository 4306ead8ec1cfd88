//! File read tool: read file contents with line numbers.

use async_trait::async_trait;
use helmsman_core::error::ToolError;
use helmsman_core::event::DomainEvent;
use helmsman_core::tool::{Tool, ToolContext, ToolResult};

use crate::{check_path, number_lines};

pub struct FileReadTool {
    /// Forbidden path prefixes.
    pub forbidden_paths: Vec<String>,
}

impl FileReadTool {
    /// Create a file read tool with no path restrictions.
    pub fn new() -> Self {
        Self {
            forbidden_paths: Vec::new(),
        }
    }

    pub fn with_forbidden(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a file. Output is prefixed with line numbers. Use offset and limit for large files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "First line to read (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            },
            "required": ["path"]
        })
    }

    fn is_concurrency_safe(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        if !input["path"].is_string() {
            return Err(ToolError::InvalidArguments("Missing 'path' argument".into()));
        }
        if input.get("offset").is_some_and(|v| v.as_u64().is_none_or(|n| n == 0)) {
            return Err(ToolError::InvalidArguments("'offset' must be a positive integer".into()));
        }
        Ok(())
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = input["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        check_path(self.name(), path, &self.forbidden_paths)?;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                return Ok(ToolResult::error(&ctx.call_id, format!("Failed to read file: {e}")));
            }
        };

        let offset = input["offset"].as_u64().unwrap_or(1) as usize;
        let limit = input["limit"].as_u64().map(|n| n as usize).unwrap_or(usize::MAX);
        let selected: Vec<&str> = content.lines().skip(offset - 1).take(limit).collect();

        ctx.events.publish(DomainEvent::file_read(path));

        let total = content.lines().count();
        Ok(ToolResult::success(&ctx.call_id, number_lines(&selected, offset))
            .with_data(serde_json::json!({ "path": path, "total_lines": total }))
            .with_render_hint("file"))
    }
}
