//! Query orchestration for Helmsman.
//!
//! A turn flows through these pieces:
//!
//! 1. **Cancellation**: the controller hands out a [`RequestHandle`] and
//!    rejects a second concurrent turn
//! 2. **Compression**: over-budget conversations are summarized and reseeded
//! 3. **Reminders**: session events become `<system-reminder>` blocks on
//!    the outbound request
//! 4. **Model call** through the resilient client (retries, key rotation)
//! 5. **Tools**: requested calls are partitioned into concurrent and
//!    sequential groups and executed by the scheduler
//!
//! The loop repeats 2-5 until the model stops asking for tools.

pub mod cancellation;
pub mod compression;
pub mod context;
pub mod loop_runner;
pub mod reminder;
pub mod runtime;
pub mod scheduler;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use cancellation::{CancellationController, RequestHandle, TurnPhase, TurnState};
pub use compression::Compressor;
pub use context::SessionContext;
pub use loop_runner::AgentLoop;
pub use reminder::{ReminderEngine, ReminderMessage};
pub use runtime::Agent;
pub use scheduler::{ExecutionGroup, ToolScheduler, partition};
pub use stream_event::TurnEvent;
