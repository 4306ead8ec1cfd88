//! Built-in tool implementations for Helmsman.
//!
//! A deliberately small catalog: reading and writing files, running shell
//! commands, and keeping a task list. Each tool declares whether it is safe
//! to run alongside others and whether it needs the permission gate.

pub mod file_read;
pub mod file_write;
pub mod shell;
pub mod todo;

use std::path::Path;
use std::sync::Arc;

use helmsman_core::error::ToolError;
use helmsman_core::task::TaskStore;
use helmsman_core::tool::ToolRegistry;

pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use shell::ShellTool;
pub use todo::{InMemoryTaskStore, TodoWriteTool};

/// Paths no built-in tool will touch.
pub const DEFAULT_FORBIDDEN_PATHS: &[&str] = &["/etc/shadow", "/etc/sudoers", "~/.ssh", "~/.aws"];

/// Create a default tool registry with all built-in tools.
pub fn default_registry(task_store: Arc<dyn TaskStore>) -> ToolRegistry {
    let forbidden: Vec<String> = DEFAULT_FORBIDDEN_PATHS.iter().map(|p| p.to_string()).collect();

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FileReadTool::with_forbidden(forbidden.clone())));
    registry.register(Arc::new(FileWriteTool::with_forbidden(forbidden)));
    registry.register(Arc::new(ShellTool::new(Vec::new())));
    registry.register(Arc::new(TodoWriteTool::new(task_store)));
    registry
}

/// Render lines the way `file_read` shows them, starting at `first_line`.
pub fn number_lines(lines: &[&str], first_line: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| format!("{:>6}\t{line}", first_line + i))
        .collect::<Vec<_>>()
        .join("\n")
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}/{rest}"),
        _ => path.to_string(),
    }
}

/// Reject paths that fall under a forbidden prefix or climb out with `..`.
pub(crate) fn check_path(tool_name: &str, path: &str, forbidden: &[String]) -> Result<(), ToolError> {
    let denied = |reason: String| ToolError::PermissionDenied {
        tool_name: tool_name.to_string(),
        reason,
    };

    let candidate = expand_home(path);
    let candidate = Path::new(&candidate);
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(denied(format!("path traversal is not allowed: {path}")));
    }
    for prefix in forbidden {
        if candidate.starts_with(expand_home(prefix)) {
            return Err(denied(format!("access to {prefix} is forbidden")));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_ctx(call_id: &str) -> helmsman_core::tool::ToolContext {
    helmsman_core::tool::ToolContext::new(
        call_id,
        "test-agent",
        tokio_util::sync::CancellationToken::new(),
        Arc::new(helmsman_core::event::EventBus::default()),
    )
}
