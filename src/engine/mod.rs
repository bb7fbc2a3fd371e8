// src/engine/mod.rs

//! The coordinator engine.
//!
//! This module ties together:
//! - the process registry and its buffers
//! - the refresh scheduler (periodic flushes of partial output)
//! - the poll step (one bounded pass of transport I/O)
//! - the main event loop that reacts to:
//!   - command submissions
//!   - refresh ticks from the clock
//!   - completions raised by polling
//!   - shutdown requests
//!
//! The dispatcher state machine lives in [`core`]; the queue-driving shell
//! and the submitter-facing handle are in [`runtime`].

use tokio::sync::oneshot;

use crate::errors::LaunchError;
use crate::types::{Command, ProcessId, Termination};

/// Answers a submitter with the id of its launched process, or why the
/// launch failed.
pub type LaunchAck = oneshot::Sender<Result<ProcessId, LaunchError>>;

/// Every event the dispatcher reacts to.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Launch a command. Comes from outside the coordinator.
    Submit {
        command: Command,
        ack: Option<LaunchAck>,
    },
    /// A command was launched; raised right after a successful `Submit`.
    Launched {
        process_id: ProcessId,
        ack: Option<LaunchAck>,
    },
    /// Periodic flush of partial output. Comes from the clock.
    RefreshTick,
    /// A process has terminated; raised by the poll step.
    Completed {
        process_id: ProcessId,
        termination: Termination,
    },
    /// Run one poll step.
    PollNow,
    /// Stop the event loop (e.g. Ctrl-C).
    Shutdown,
}

impl CoordinatorEvent {
    /// Convenience for a fire-and-forget submission.
    pub fn submit(command: Command) -> Self {
        CoordinatorEvent::Submit { command, ack: None }
    }
}

pub mod core;
pub mod event_handlers;
pub mod poll;
pub mod refresh;
pub mod runtime;

pub use self::core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use refresh::RefreshScheduler;
pub use runtime::{CoordinatorHandle, Runtime, spawn_coordinator};
