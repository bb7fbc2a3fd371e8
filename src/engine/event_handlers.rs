// src/engine/event_handlers.rs

//! Event handling logic for the dispatcher.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::poll::poll_once;
use crate::engine::refresh::RefreshScheduler;
use crate::engine::{CoordinatorEvent, LaunchAck};
use crate::errors::TransportError;
use crate::process::{Registry, launch, notifier};
use crate::transport::Transport;
use crate::types::{Command, ProcessId, Termination};

/// Command produced by the dispatcher, to be executed by the outer loop.
#[derive(Debug)]
pub enum CoreCommand {
    /// Queue an internally generated event ahead of external input.
    Raise(CoordinatorEvent),
    /// Deliver a `RefreshTick` after this delay.
    ScheduleRefresh(Duration),
}

/// Decision returned by the dispatcher after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn with(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn empty() -> Self {
        Self::with(Vec::new())
    }
}

/// Handle a submission: launch it, then make sure a refresh is armed.
///
/// A failed launch is reported through `ack` (when there is one) and does
/// not stop the coordinator.
pub fn handle_submit<T: Transport>(
    transport: &mut T,
    registry: &mut Registry<T::Channel>,
    refresh: &mut RefreshScheduler,
    command: Command,
    ack: Option<LaunchAck>,
) -> CoreStep {
    let mut commands = Vec::new();

    match launch(transport, registry, command) {
        Ok(process_id) => {
            commands.push(CoreCommand::Raise(CoordinatorEvent::Launched { process_id, ack }));
        }
        Err(e) => {
            if let Some(ack) = ack {
                let _ = ack.send(Err(e));
            }
        }
    }

    if let Some(delay) = refresh.arm(registry.len()) {
        commands.push(CoreCommand::ScheduleRefresh(delay));
    }

    CoreStep::with(commands)
}

/// Tell the submitter which id its command got. No state change.
pub fn handle_launched(process_id: ProcessId, ack: Option<LaunchAck>) -> CoreStep {
    debug!(process_id, "launch acknowledged");
    if let Some(ack) = ack {
        if ack.send(Ok(process_id)).is_err() {
            debug!(process_id, "submitter stopped waiting for launch acknowledgement");
        }
    }
    CoreStep::empty()
}

/// Flush unread output of every running process, then re-arm if needed.
pub fn handle_refresh_tick<C>(
    registry: &mut Registry<C>,
    refresh: &mut RefreshScheduler,
) -> CoreStep {
    let delivered = notifier::flush_all_pending(registry);
    debug!(delivered, active = registry.len(), "refresh tick");

    refresh.on_tick();

    let mut commands = Vec::new();
    if let Some(delay) = refresh.arm(registry.len()) {
        commands.push(CoreCommand::ScheduleRefresh(delay));
    }
    CoreStep::with(commands)
}

/// Deliver the terminal update for a process.
pub fn handle_completed<C>(
    registry: &mut Registry<C>,
    process_id: ProcessId,
    termination: Termination,
) -> CoreStep {
    notifier::complete(registry, process_id, termination);
    CoreStep::empty()
}

/// Run one poll step and raise a `Completed` for every terminated process.
///
/// If the connection failed, every registered caller gets a terminal
/// `TransportFailed` update before the error is returned.
pub fn handle_poll<T: Transport>(
    transport: &mut T,
    registry: &mut Registry<T::Channel>,
    timeout: Duration,
) -> Result<CoreStep, TransportError> {
    match poll_once(transport, registry, timeout) {
        Ok(finished) => {
            let commands = finished
                .into_iter()
                .map(|(process_id, termination)| {
                    CoreCommand::Raise(CoordinatorEvent::Completed {
                        process_id,
                        termination,
                    })
                })
                .collect();
            Ok(CoreStep::with(commands))
        }
        Err(e) => {
            error!(error = %e, active = registry.len(), "transport failed; terminating all commands");
            let failed = notifier::fail_all(registry, &e.to_string());
            info!(failed, "callers notified of transport failure");
            Err(e)
        }
    }
}
