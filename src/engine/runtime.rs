// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;
use std::thread;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace};

use crate::clock::{Clock, TokioClock};
use crate::config::CoordinatorSettings;
use crate::errors::{LaunchError, Result};
use crate::transport::Transport;
use crate::types::{Caller, Command, ProcessId};

use super::core::CoreRuntime;
use super::{CoordinatorEvent, CoreCommand};

/// Drives the dispatcher from its inbound queue.
///
/// Events are taken in this order:
/// 1. internally raised events (`Launched`, `Completed`), oldest first;
/// 2. whatever is waiting in the inbound queue;
/// 3. a `PollNow` if anything is running;
/// 4. otherwise block until the next inbound event.
///
/// So the loop keeps polling while commands run, reacts to a new submission
/// after at most one bounded poll, and sleeps when nothing is running.
///
/// Refresh ticks normally arrive from the [`Clock`] through the inbound
/// queue. Once every submitter is gone the clock can no longer post into
/// it, so while commands are still running the loop raises the tick itself
/// when its deadline has passed.
///
/// [`run`](Self::run) blocks its thread; use [`spawn`](Self::spawn) to give
/// the coordinator a thread of its own.
pub struct Runtime<T: Transport, K: Clock> {
    core: CoreRuntime<T>,
    inbound: mpsc::Receiver<CoordinatorEvent>,
    local: VecDeque<CoordinatorEvent>,
    clock: K,
    /// Deadline of the outstanding refresh, if any.
    refresh_due: Option<Instant>,
}

impl<T: Transport, K: Clock> fmt::Debug for Runtime<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("active", &self.core.active())
            .field("local", &self.local.len())
            .finish_non_exhaustive()
    }
}

impl<T: Transport + 'static, K: Clock + 'static> Runtime<T, K> {
    pub fn new(core: CoreRuntime<T>, inbound: mpsc::Receiver<CoordinatorEvent>, clock: K) -> Self {
        Self {
            core,
            inbound,
            local: VecDeque::new(),
            clock,
            refresh_due: None,
        }
    }

    /// Run the event loop on a dedicated thread.
    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<Result<()>>> {
        thread::Builder::new()
            .name("shellmux-coordinator".to_string())
            .spawn(move || self.run())
    }

    /// Main event loop. Must not be called from inside an async context.
    ///
    /// Returns when a `Shutdown` is handled, when every submitter is gone and
    /// nothing is running, or with an error when the connection failed.
    pub fn run(mut self) -> Result<()> {
        info!("shellmux coordinator started");

        while let Some(event) = self.next_event() {
            match event {
                CoordinatorEvent::PollNow => trace!("polling"),
                ref other => debug!(event = ?other, "coordinator received event"),
            }

            let step = self.core.step(event).inspect_err(|e| {
                error!(error = %e, "coordinator stopping after transport failure");
            })?;

            for command in step.commands {
                self.execute_command(command);
            }

            if !step.keep_running {
                info!("shutdown requested; stopping coordinator");
                break;
            }
        }

        info!(active = self.core.active(), "coordinator exiting");
        Ok(())
    }

    fn next_event(&mut self) -> Option<CoordinatorEvent> {
        if let Some(event) = self.local.pop_front() {
            return Some(event);
        }

        match self.inbound.try_recv() {
            Ok(event) => Some(self.received(event)),
            Err(TryRecvError::Empty) if self.core.wants_poll() => Some(CoordinatorEvent::PollNow),
            Err(TryRecvError::Empty) => self.inbound.blocking_recv().map(|e| self.received(e)),
            Err(TryRecvError::Disconnected) if self.core.wants_poll() => {
                // No more submitters, but running commands still finish and
                // still get their refreshes.
                if self.refresh_due.is_some_and(|due| Instant::now() >= due) {
                    self.refresh_due = None;
                    Some(CoordinatorEvent::RefreshTick)
                } else {
                    Some(CoordinatorEvent::PollNow)
                }
            }
            Err(TryRecvError::Disconnected) => {
                info!("all submitters gone and nothing running");
                None
            }
        }
    }

    fn received(&mut self, event: CoordinatorEvent) -> CoordinatorEvent {
        if matches!(event, CoordinatorEvent::RefreshTick) {
            self.refresh_due = None;
        }
        event
    }

    fn execute_command(&mut self, command: CoreCommand) {
        match command {
            CoreCommand::Raise(event) => self.local.push_back(event),
            CoreCommand::ScheduleRefresh(delay) => {
                self.refresh_due = Some(Instant::now() + delay);
                self.clock.schedule(delay, CoordinatorEvent::RefreshTick)
            }
        }
    }
}

/// Submitter-side handle to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    pub fn new(tx: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self { tx }
    }

    /// Submit a command and wait until it has been launched.
    ///
    /// Updates for the command go to `caller`; the returned id is the one
    /// they will carry.
    pub async fn submit(
        &self,
        text: impl Into<String>,
        caller: Caller,
    ) -> std::result::Result<ProcessId, LaunchError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(CoordinatorEvent::Submit {
                command: Command::new(text, caller),
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| LaunchError::CoordinatorGone)?;

        ack_rx.await.map_err(|_| LaunchError::CoordinatorGone)?
    }

    /// Submit without waiting for the launch result. A launch failure is
    /// only logged by the coordinator.
    pub async fn submit_detached(
        &self,
        text: impl Into<String>,
        caller: Caller,
    ) -> std::result::Result<(), LaunchError> {
        self.tx
            .send(CoordinatorEvent::submit(Command::new(text, caller)))
            .await
            .map_err(|_| LaunchError::CoordinatorGone)
    }

    /// Ask the coordinator to stop. No-op if it already stopped.
    pub async fn shutdown(&self) {
        if self.tx.send(CoordinatorEvent::Shutdown).await.is_err() {
            debug!("coordinator already stopped");
        }
    }
}

/// Build a coordinator around `transport` and start it on its own thread.
///
/// Must be called from within a Tokio runtime; refresh timers run there.
pub fn spawn_coordinator<T: Transport + 'static>(
    transport: T,
    settings: &CoordinatorSettings,
) -> std::io::Result<(CoordinatorHandle, thread::JoinHandle<Result<()>>)> {
    let (tx, rx) = mpsc::channel::<CoordinatorEvent>(settings.inbound_queue);
    let clock = TokioClock::new(Handle::current(), tx.downgrade());
    let core = CoreRuntime::new(transport, settings);
    let join = Runtime::new(core, rx, clock).spawn()?;
    Ok((CoordinatorHandle::new(tx), join))
}
