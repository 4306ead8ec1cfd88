//! File write tool: write or create files.

use async_trait::async_trait;
use helmsman_core::error::ToolError;
use helmsman_core::event::DomainEvent;
use helmsman_core::tool::{Tool, ToolContext, ToolResult};

use crate::check_path;

pub struct FileWriteTool {
    /// Forbidden path prefixes.
    pub forbidden_paths: Vec<String>,
}

impl FileWriteTool {
    /// Create a file write tool with no path restrictions.
    pub fn new() -> Self {
        Self {
            forbidden_paths: Vec::new(),
        }
    }

    pub fn with_forbidden(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn validate_input(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        if !input["path"].is_string() {
            return Err(ToolError::InvalidArguments("Missing 'path' argument".into()));
        }
        if !input["content"].is_string() {
            return Err(ToolError::InvalidArguments("Missing 'content' argument".into()));
        }
        Ok(())
    }

    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let path = input["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = input["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        check_path(self.name(), path, &self.forbidden_paths)?;

        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(ToolResult::error(&ctx.call_id, format!("Failed to create directory: {e}")));
        }

        match tokio::fs::write(path, content).await {
            Ok(()) => {
                ctx.events.publish(DomainEvent::file_edited(path));
                Ok(ToolResult::success(
                    &ctx.call_id,
                    format!("Successfully wrote {} bytes to {path}", content.len()),
                ))
            }
            Err(e) => Ok(ToolResult::error(&ctx.call_id, format!("Failed to write file: {e}"))),
        }
    }
}
