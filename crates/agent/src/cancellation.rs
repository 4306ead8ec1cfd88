//! Turn lifecycle and cancellation.
//!
//! `Idle → Active → {Completed | Cancelled} → Idle`. At most one turn is
//! active; a finished or cancelled turn returns to idle on its own after a
//! short grace period so observers can still read the terminal state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use helmsman_core::error::{Error, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// What an active turn is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingModel,
    AwaitingTools,
    AwaitingPermission,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Active { id: String, phase: TurnPhase },
    Completed { id: String },
    Cancelled { id: String, reason: String },
}

#[derive(Debug)]
struct Inner {
    state: TurnState,
    /// Bumped on every transition so stale grace timers do nothing.
    generation: u64,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for one turn. Cheap to clone; all clones share the token.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    id: String,
    token: CancellationToken,
    inner: Arc<Mutex<Inner>>,
}

impl RequestHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record what the turn is waiting on. Ignored once the turn is over.
    pub fn set_phase(&self, phase: TurnPhase) {
        let mut inner = lock(&self.inner);
        if let TurnState::Active { id, phase: current } = &mut inner.state
            && *id == self.id
        {
            *current = phase;
        }
    }
}

#[derive(Debug, Clone)]
pub struct CancellationController {
    inner: Arc<Mutex<Inner>>,
    grace: Duration,
}

impl CancellationController {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: TurnState::Idle,
                generation: 0,
            })),
            grace,
        }
    }

    pub fn state(&self) -> TurnState {
        lock(&self.inner).state.clone()
    }

    /// Begin a turn. Fails with `AlreadyActive` while another is running.
    pub fn start(&self) -> Result<RequestHandle> {
        let mut inner = lock(&self.inner);
        if let TurnState::Active { id, .. } = &inner.state {
            return Err(Error::AlreadyActive {
                active_id: id.clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        inner.state = TurnState::Active {
            id: id.clone(),
            phase: TurnPhase::AwaitingModel,
        };
        inner.generation += 1;
        debug!(turn_id = %id, "Turn started");

        Ok(RequestHandle {
            id,
            token: CancellationToken::new(),
            inner: self.inner.clone(),
        })
    }

    /// Cancel the turn behind `handle`. Idempotent; returns whether this call
    /// moved the turn to `Cancelled`.
    pub fn cancel(&self, handle: &RequestHandle, reason: impl Into<String>) -> bool {
        handle.token.cancel();

        let generation = {
            let mut inner = lock(&self.inner);
            let TurnState::Active { id, phase } = &inner.state else {
                return false;
            };
            if *id != handle.id {
                return false;
            }
            let reason = reason.into();
            info!(turn_id = %id, phase = ?phase, reason = %reason, "Turn cancelled");
            inner.state = TurnState::Cancelled {
                id: handle.id.clone(),
                reason,
            };
            inner.generation += 1;
            inner.generation
        };
        self.schedule_idle(generation);
        true
    }

    /// Mark the turn behind `handle` as completed. No-op if it was cancelled.
    pub fn finish(&self, handle: &RequestHandle) {
        let generation = {
            let mut inner = lock(&self.inner);
            match &inner.state {
                TurnState::Active { id, .. } if *id == handle.id => {}
                _ => return,
            }
            inner.state = TurnState::Completed {
                id: handle.id.clone(),
            };
            inner.generation += 1;
            inner.generation
        };
        debug!(turn_id = %handle.id, "Turn completed");
        self.schedule_idle(generation);
    }

    fn schedule_idle(&self, generation: u64) {
        let inner = self.inner.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut inner = lock(&inner);
            if inner.generation == generation {
                inner.state = TurnState::Idle;
            }
        });
    }
}
