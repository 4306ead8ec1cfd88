//! Per-turn events for intermediate rendering.
//!
//! A turn yields `progress` events (tool progress, retry notices) that are
//! never part of the conversation, and `result` events for every message
//! appended to it.

use helmsman_core::message::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum TurnEvent {
    Progress(Message),
    Result(Message),
}

impl TurnEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Result(_) => "result",
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            Self::Progress(m) | Self::Result(m) => m,
        }
    }
}
