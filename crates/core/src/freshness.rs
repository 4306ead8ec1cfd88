//! File freshness tracking: which files the agent touched most recently.
//!
//! Compaction uses the tracker to decide which files to re-attach to the
//! reseeded conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccess {
    pub path: String,
    pub last_access: DateTime<Utc>,
}

pub trait FreshnessTracker: Send + Sync {
    fn record_read(&mut self, path: &str, at: DateTime<Utc>);

    fn record_edit(&mut self, path: &str, at: DateTime<Utc>);

    /// Up to `limit` files, most recently touched first.
    fn important_files(&self, limit: usize) -> Vec<FileAccess>;

    /// Forget everything (after compaction).
    fn reset(&mut self);
}
