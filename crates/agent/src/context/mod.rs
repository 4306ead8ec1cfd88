//! Per-session state the orchestrator threads through every component.
//!
//! The reminder engine and the freshness tracker are owned here rather than
//! living in globals. Domain events published by tools are drained from the
//! bus at the start of each round and applied to both.

pub mod freshness;
pub mod token;

use std::sync::Arc;

use helmsman_config::ReminderConfig;
use helmsman_core::event::{DomainEvent, EventBus};
use helmsman_core::freshness::FreshnessTracker;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use crate::reminder::ReminderEngine;

pub use freshness::InMemoryFreshnessTracker;
pub use token::{count_tokens, estimate_messages_tokens, estimate_tokens};

pub struct SessionContext {
    pub reminders: ReminderEngine,
    freshness: Box<dyn FreshnessTracker>,
    events: broadcast::Receiver<Arc<DomainEvent>>,
}

impl SessionContext {
    pub fn new(config: ReminderConfig, freshness: Box<dyn FreshnessTracker>, bus: &EventBus) -> Self {
        Self {
            reminders: ReminderEngine::new(config),
            freshness,
            events: bus.subscribe(),
        }
    }

    /// Session with the in-memory freshness tracker.
    pub fn in_memory(config: ReminderConfig, bus: &EventBus) -> Self {
        Self::new(config, Box::new(InMemoryFreshnessTracker::new()), bus)
    }

    pub fn freshness(&self) -> &dyn FreshnessTracker {
        self.freshness.as_ref()
    }

    /// Apply every event published since the last call.
    pub fn sync_events(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Session fell behind the event bus");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn apply(&mut self, event: &DomainEvent) {
        match event {
            DomainEvent::FileRead { path, timestamp } => self.freshness.record_read(path, *timestamp),
            DomainEvent::FileEdited { path, timestamp } => self.freshness.record_edit(path, *timestamp),
            _ => {}
        }
        self.reminders.handle_event(event);
    }

    /// Forget session-scoped caches after the conversation was reseeded.
    pub fn reset(&mut self) {
        self.reminders.reset_session();
        self.freshness.reset();
    }
}
