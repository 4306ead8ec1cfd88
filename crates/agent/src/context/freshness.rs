//! In-memory file freshness tracking.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use helmsman_core::freshness::{FileAccess, FreshnessTracker};

/// Remembers the last read or edit time of every file touched this session.
#[derive(Debug, Default)]
pub struct InMemoryFreshnessTracker {
    files: HashMap<String, DateTime<Utc>>,
}

impl InMemoryFreshnessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, path: &str, at: DateTime<Utc>) {
        let entry = self.files.entry(path.to_string()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }
}

impl FreshnessTracker for InMemoryFreshnessTracker {
    fn record_read(&mut self, path: &str, at: DateTime<Utc>) {
        self.touch(path, at);
    }

    fn record_edit(&mut self, path: &str, at: DateTime<Utc>) {
        self.touch(path, at);
    }

    fn important_files(&self, limit: usize) -> Vec<FileAccess> {
        let mut files: Vec<FileAccess> = self
            .files
            .iter()
            .map(|(path, at)| FileAccess {
                path: path.clone(),
                last_access: *at,
            })
            .collect();
        // Most recent first; path breaks ties so the order is stable
        files.sort_by(|a, b| b.last_access.cmp(&a.last_access).then_with(|| a.path.cmp(&b.path)));
        files.truncate(limit);
        files
    }

    fn reset(&mut self) {
        self.files.clear();
    }
}
