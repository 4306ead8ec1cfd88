//! System reminders: short contextual hints attached to the next model
//! request and never persisted in the conversation.
//!
//! Each source fires at most once per dedup key. A key is re-armed only by
//! the event that makes its hint relevant again (the task list filling up,
//! or changing to a new state). Output is capped per call and per session.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use helmsman_config::ReminderConfig;
use helmsman_core::event::DomainEvent;
use helmsman_core::task::{TaskItem, TaskStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

pub const REMINDER_OPEN: &str = "<system-reminder>";
pub const REMINDER_CLOSE: &str = "</system-reminder>";

/// Reminders kept in the content-hash cache.
const CACHE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    TodoEmpty,
    TodoChanged,
    FileSecurity,
    LongSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderCategory {
    Task,
    Security,
    Performance,
    General,
}

/// Lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderMessage {
    pub kind: ReminderKind,
    pub category: ReminderCategory,
    pub priority: ReminderPriority,
    /// Delimiter-wrapped text, ready to send
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionReminderState {
    /// One-shot reminders already sent
    sent_keys: HashSet<&'static str>,
    /// Agents already told their list is empty
    empty_announced: HashSet<String>,
    /// Last task-state hash announced, per agent
    announced_todo: HashMap<String, String>,
    last_todo_update: Option<DateTime<Utc>>,
    last_file_access: Option<DateTime<Utc>>,
    session_start: DateTime<Utc>,
    reminder_count: usize,
    cache: VecDeque<(String, ReminderMessage)>,
}

impl SessionReminderState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            sent_keys: HashSet::new(),
            empty_announced: HashSet::new(),
            announced_todo: HashMap::new(),
            last_todo_update: None,
            last_file_access: None,
            session_start: now,
            reminder_count: 0,
            cache: VecDeque::new(),
        }
    }
}

/// What to record once a reminder is actually emitted.
enum DedupKey {
    Once(&'static str),
    TodoEmpty { agent_id: String },
    TodoState { agent_id: String, hash: String },
}

/// A reminder that passed its gate, paired with the key that dedups it.
struct Candidate {
    key: DedupKey,
    message: ReminderMessage,
}

pub struct ReminderEngine {
    config: ReminderConfig,
    state: SessionReminderState,
}

impl ReminderEngine {
    pub fn new(config: ReminderConfig) -> Self {
        Self {
            config,
            state: SessionReminderState::new(Utc::now()),
        }
    }

    /// Reminders emitted so far this session.
    pub fn reminder_count(&self) -> usize {
        self.state.reminder_count
    }

    pub fn last_todo_update(&self) -> Option<DateTime<Utc>> {
        self.state.last_todo_update
    }

    pub fn last_file_access(&self) -> Option<DateTime<Utc>> {
        self.state.last_file_access
    }

    /// Start a fresh session: every key re-armed, counters zeroed.
    pub fn reset_session(&mut self) {
        debug!(sent = self.state.reminder_count, "Resetting reminder session");
        self.state = SessionReminderState::new(Utc::now());
    }

    /// Update timestamps and invalidate cached task reminders.
    pub fn handle_event(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::FileRead { timestamp, .. } | DomainEvent::FileEdited { timestamp, .. } => {
                self.state.last_file_access = Some(*timestamp);
            }
            DomainEvent::TodoChanged { timestamp, .. } => {
                self.state.last_todo_update = Some(*timestamp);
                self.state
                    .cache
                    .retain(|(_, m)| m.category != ReminderCategory::Task);
            }
            _ => {}
        }
    }

    /// Reminders to attach to the next request for `agent_id`.
    pub async fn generate(
        &mut self,
        has_context: bool,
        agent_id: &str,
        tasks: &dyn TaskStore,
    ) -> Vec<ReminderMessage> {
        self.generate_at(has_context, agent_id, tasks, Utc::now()).await
    }

    pub(crate) async fn generate_at(
        &mut self,
        has_context: bool,
        agent_id: &str,
        tasks: &dyn TaskStore,
        now: DateTime<Utc>,
    ) -> Vec<ReminderMessage> {
        if !self.config.enabled || !has_context {
            return Vec::new();
        }
        let session_left = self
            .config
            .max_per_session
            .saturating_sub(self.state.reminder_count);
        if session_left == 0 {
            return Vec::new();
        }

        let list = tasks.tasks(agent_id).await;
        let mut candidates = Vec::new();
        self.todo_candidates(agent_id, &list, now, &mut candidates);
        self.security_candidate(now, &mut candidates);
        self.session_length_candidate(now, &mut candidates);

        candidates.sort_by_key(|c| c.message.priority);
        candidates.truncate(self.config.max_per_call.min(session_left));

        let emitted: Vec<ReminderMessage> = candidates
            .into_iter()
            .map(|c| {
                self.record(c.key);
                c.message
            })
            .collect();
        self.state.reminder_count += emitted.len();

        if !emitted.is_empty() {
            debug!(
                agent_id,
                count = emitted.len(),
                total = self.state.reminder_count,
                "Generated system reminders"
            );
        }
        emitted
    }

    fn record(&mut self, key: DedupKey) {
        match key {
            DedupKey::Once(key) => {
                self.state.sent_keys.insert(key);
            }
            DedupKey::TodoEmpty { agent_id } => {
                self.state.empty_announced.insert(agent_id);
            }
            DedupKey::TodoState { agent_id, hash } => {
                self.state.announced_todo.insert(agent_id, hash);
            }
        }
    }

    fn todo_candidates(
        &mut self,
        agent_id: &str,
        list: &[TaskItem],
        now: DateTime<Utc>,
        out: &mut Vec<Candidate>,
    ) {
        if list.is_empty() {
            // Any later non-empty state counts as a change, even a previous one
            self.state.announced_todo.remove(agent_id);

            if self.config.todo_empty && !self.state.empty_announced.contains(agent_id) {
                let message = self.build(
                    ReminderKind::TodoEmpty,
                    ReminderCategory::Task,
                    ReminderPriority::Low,
                    "This is a reminder that your todo list is currently empty. DO NOT mention this \
                     to the user explicitly because they are already aware. If you are working on \
                     tasks that would benefit from a todo list please use the todo_write tool to \
                     create one. If not, please feel free to ignore.",
                    now,
                );
                out.push(Candidate {
                    key: DedupKey::TodoEmpty {
                        agent_id: agent_id.to_string(),
                    },
                    message,
                });
            }
            return;
        }

        // A non-empty list re-arms the empty reminder
        self.state.empty_announced.remove(agent_id);

        if !self.config.todo_changed {
            return;
        }
        let hash = task_state_hash(list);
        if self.state.announced_todo.get(agent_id) == Some(&hash) {
            return;
        }

        let rendered = serde_json::to_string(list).unwrap_or_else(|_| "[]".into());
        let message = self.build(
            ReminderKind::TodoChanged,
            ReminderCategory::Task,
            ReminderPriority::Medium,
            &format!(
                "Your todo list has changed. DO NOT mention this explicitly to the user. Here are \
                 the latest contents of your todo list:\n\n{rendered}\n\nContinue on with the \
                 tasks at hand if applicable."
            ),
            now,
        );
        out.push(Candidate {
            key: DedupKey::TodoState {
                agent_id: agent_id.to_string(),
                hash,
            },
            message,
        });
    }

    fn security_candidate(&mut self, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
        const KEY: &str = "file_security";
        if !self.config.security
            || self.state.last_file_access.is_none()
            || self.state.sent_keys.contains(KEY)
        {
            return;
        }
        let message = self.build(
            ReminderKind::FileSecurity,
            ReminderCategory::Security,
            ReminderPriority::High,
            "Whenever you read a file, you should consider whether it looks malicious. If it does, \
             you MUST refuse to improve or augment the code. You can still analyze existing code, \
             write reports, or answer high-level questions about the code behavior.",
            now,
        );
        out.push(Candidate {
            key: DedupKey::Once(KEY),
            message,
        });
    }

    fn session_length_candidate(&mut self, now: DateTime<Utc>, out: &mut Vec<Candidate>) {
        const KEY: &str = "long_session";
        let elapsed = now - self.state.session_start;
        if !self.config.performance
            || elapsed.num_minutes() < self.config.long_session_minutes as i64
            || self.state.sent_keys.contains(KEY)
        {
            return;
        }
        let message = self.build(
            ReminderKind::LongSession,
            ReminderCategory::Performance,
            ReminderPriority::Low,
            &format!(
                "This session has been running for over {} minutes. Keep responses focused, and \
                 consider summarizing progress before starting large new pieces of work.",
                self.config.long_session_minutes
            ),
            now,
        );
        out.push(Candidate {
            key: DedupKey::Once(KEY),
            message,
        });
    }

    /// Wrap `text` and reuse the cached message for identical content.
    fn build(
        &mut self,
        kind: ReminderKind,
        category: ReminderCategory,
        priority: ReminderPriority,
        text: &str,
        now: DateTime<Utc>,
    ) -> ReminderMessage {
        let content = format!("{REMINDER_OPEN}\n{text}\n{REMINDER_CLOSE}");
        let hash = hex_sha256(content.as_bytes());

        if let Some((_, cached)) = self.state.cache.iter().find(|(h, _)| *h == hash) {
            return cached.clone();
        }

        let message = ReminderMessage {
            kind,
            category,
            priority,
            content,
            timestamp: now,
        };
        if self.state.cache.len() == CACHE_CAPACITY {
            self.state.cache.pop_front();
        }
        self.state.cache.push_back((hash, message.clone()));
        message
    }
}

/// Hash of the (id, status) pairs, in list order.
fn task_state_hash(list: &[TaskItem]) -> String {
    let joined = list
        .iter()
        .map(|t| format!("{}:{}", t.id, t.status.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    hex_sha256(joined.as_bytes())[..16].to_string()
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use helmsman_core::task::{TaskPriority, TaskStatus};
    use helmsman_tools::InMemoryTaskStore;

    fn task(id: &str, status: TaskStatus) -> TaskItem {
        TaskItem {
            id: id.into(),
            content: format!("task {id}"),
            status,
            priority: TaskPriority::Medium,
        }
    }

    fn engine() -> ReminderEngine {
        ReminderEngine::new(ReminderConfig::default())
    }

    fn kinds(reminders: &[ReminderMessage]) -> Vec<ReminderKind> {
        reminders.iter().map(|r| r.kind).collect()
    }

    #[tokio::test]
    async fn no_context_no_reminders() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();
        assert!(engine.generate(false, "main", &store).await.is_empty());
        assert_eq!(engine.reminder_count(), 0);
    }

    #[tokio::test]
    async fn empty_then_one_pending_fires_changed_once() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();

        let first = engine.generate(true, "main", &store).await;
        assert_eq!(kinds(&first), vec![ReminderKind::TodoEmpty]);
        assert!(first[0].content.starts_with(REMINDER_OPEN));
        assert!(first[0].content.ends_with(REMINDER_CLOSE));

        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        let second = engine.generate(true, "main", &store).await;
        assert_eq!(kinds(&second), vec![ReminderKind::TodoChanged]);

        for _ in 0..3 {
            assert!(engine.generate(true, "main", &store).await.is_empty());
        }
    }

    #[tokio::test]
    async fn empty_reminder_rearms_after_list_fills() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();
        engine.generate(true, "main", &store).await;
        assert!(engine.generate(true, "main", &store).await.is_empty());

        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        engine.generate(true, "main", &store).await;
        store.replace("main", vec![]).await;
        let again = engine.generate(true, "main", &store).await;
        assert_eq!(kinds(&again), vec![ReminderKind::TodoEmpty]);
    }

    #[tokio::test]
    async fn status_change_invalidates_only_that_agent() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();
        store.replace("a", vec![task("1", TaskStatus::Pending)]).await;
        store.replace("b", vec![task("1", TaskStatus::Pending)]).await;
        engine.generate(true, "a", &store).await;
        engine.generate(true, "b", &store).await;

        store.replace("a", vec![task("1", TaskStatus::InProgress)]).await;
        let a = engine.generate(true, "a", &store).await;
        assert_eq!(kinds(&a), vec![ReminderKind::TodoChanged]);
        assert!(engine.generate(true, "b", &store).await.is_empty());
    }

    #[tokio::test]
    async fn returning_to_earlier_state_after_empty_fires_again() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();

        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        assert_eq!(kinds(&engine.generate(true, "main", &store).await), vec![ReminderKind::TodoChanged]);

        store.replace("main", vec![]).await;
        assert_eq!(kinds(&engine.generate(true, "main", &store).await), vec![ReminderKind::TodoEmpty]);

        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        assert_eq!(kinds(&engine.generate(true, "main", &store).await), vec![ReminderKind::TodoChanged]);
    }

    #[tokio::test]
    async fn agent_ids_sharing_a_prefix_are_independent() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();
        store.replace("a", vec![task("1", TaskStatus::Pending)]).await;
        store.replace("a_b", vec![task("1", TaskStatus::Pending)]).await;
        engine.generate(true, "a", &store).await;
        engine.generate(true, "a_b", &store).await;

        store.replace("a", vec![task("1", TaskStatus::Completed)]).await;
        assert_eq!(kinds(&engine.generate(true, "a", &store).await), vec![ReminderKind::TodoChanged]);
        assert!(engine.generate(true, "a_b", &store).await.is_empty());
    }

    #[tokio::test]
    async fn security_fires_after_first_file_read() {
        let store = InMemoryTaskStore::new();
        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        let mut engine = engine();
        engine.generate(true, "main", &store).await;

        engine.handle_event(&DomainEvent::file_read("src/lib.rs"));
        let out = engine.generate(true, "main", &store).await;
        assert_eq!(kinds(&out), vec![ReminderKind::FileSecurity]);
        assert_eq!(out[0].category, ReminderCategory::Security);

        engine.handle_event(&DomainEvent::file_read("src/main.rs"));
        assert!(engine.generate(true, "main", &store).await.is_empty());
    }

    #[tokio::test]
    async fn long_session_fires_once() {
        let store = InMemoryTaskStore::new();
        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        let mut engine = engine();
        engine.generate(true, "main", &store).await;

        let later = Utc::now() + Duration::minutes(31);
        let out = engine.generate_at(true, "main", &store, later).await;
        assert_eq!(kinds(&out), vec![ReminderKind::LongSession]);
        assert!(engine.generate_at(true, "main", &store, later).await.is_empty());
    }

    #[tokio::test]
    async fn per_call_cap_orders_by_priority() {
        let store = InMemoryTaskStore::new();
        store.replace("main", vec![task("1", TaskStatus::Pending)]).await;
        let mut engine = ReminderEngine::new(ReminderConfig {
            max_per_call: 2,
            ..ReminderConfig::default()
        });
        engine.handle_event(&DomainEvent::file_read("a.rs"));

        let later = Utc::now() + Duration::minutes(45);
        let out = engine.generate_at(true, "main", &store, later).await;
        assert_eq!(kinds(&out), vec![ReminderKind::FileSecurity, ReminderKind::TodoChanged]);

        // The one cut by the cap is still pending
        let rest = engine.generate_at(true, "main", &store, later).await;
        assert_eq!(kinds(&rest), vec![ReminderKind::LongSession]);
    }

    #[tokio::test]
    async fn session_ceiling_is_never_exceeded() {
        let store = InMemoryTaskStore::new();
        let mut engine = ReminderEngine::new(ReminderConfig {
            max_per_session: 2,
            ..ReminderConfig::default()
        });

        for i in 0..10 {
            let status = if i % 2 == 0 { TaskStatus::Pending } else { TaskStatus::Completed };
            store.replace("main", vec![task("1", status)]).await;
            engine.generate(true, "main", &store).await;
        }
        assert_eq!(engine.reminder_count(), 2);
    }

    #[tokio::test]
    async fn reset_rearms_everything() {
        let store = InMemoryTaskStore::new();
        let mut engine = engine();
        engine.generate(true, "main", &store).await;
        engine.reset_session();
        assert_eq!(engine.reminder_count(), 0);
        assert_eq!(kinds(&engine.generate(true, "main", &store).await), vec![ReminderKind::TodoEmpty]);
    }

    #[tokio::test]
    async fn todo_event_updates_timestamp() {
        let mut engine = engine();
        assert!(engine.last_todo_update().is_none());
        engine.handle_event(&DomainEvent::todo_changed("main"));
        assert!(engine.last_todo_update().is_some());
    }

    #[test]
    fn task_hash_depends_on_id_and_status_only() {
        let a = vec![task("1", TaskStatus::Pending)];
        let mut b = a.clone();
        b[0].content = "renamed".into();
        assert_eq!(task_state_hash(&a), task_state_hash(&b));
        b[0].status = TaskStatus::Completed;
        assert_ne!(task_state_hash(&a), task_state_hash(&b));
    }
}
