// src/engine/core.rs

//! The dispatcher state machine.
//!
//! `CoreRuntime` owns the transport, the process registry and the refresh
//! scheduler, and consumes [`CoordinatorEvent`]s one at a time. It returns
//! [`CoreCommand`]s describing what the outer loop should queue or schedule
//! next; it never reads a queue or touches a clock itself.
//!
//! This keeps the semantics unit-testable with a scripted transport and no
//! threads, channels or timers.

use std::time::Duration;

use tracing::warn;

use crate::config::CoordinatorSettings;
use crate::engine::event_handlers::{
    CoreStep, handle_completed, handle_launched, handle_poll, handle_refresh_tick, handle_submit,
};
use crate::engine::refresh::RefreshScheduler;
use crate::engine::CoordinatorEvent;
use crate::errors::TransportError;
use crate::process::Registry;
use crate::transport::Transport;

#[derive(Debug)]
pub struct CoreRuntime<T: Transport> {
    transport: T,
    registry: Registry<T::Channel>,
    refresh: RefreshScheduler,
    poll_timeout: Duration,
}

impl<T: Transport> CoreRuntime<T> {
    pub fn new(transport: T, settings: &CoordinatorSettings) -> Self {
        Self {
            transport,
            registry: Registry::new(),
            refresh: RefreshScheduler::new(settings.refresh_interval),
            poll_timeout: settings.poll_timeout,
        }
    }

    /// Number of processes currently registered.
    pub fn active(&self) -> usize {
        self.registry.len()
    }

    /// True while anything is running, i.e. the loop should keep polling
    /// instead of waiting for input.
    pub fn wants_poll(&self) -> bool {
        !self.registry.is_empty()
    }

    /// Expose the registry (for tests and diagnostics).
    pub fn registry(&self) -> &Registry<T::Channel> {
        &self.registry
    }

    /// Expose the refresh scheduler (for tests).
    pub fn refresh(&self) -> &RefreshScheduler {
        &self.refresh
    }

    /// Handle a single event, updating state and returning the resulting
    /// commands for the outer loop.
    ///
    /// Errors only when the shared connection failed; all callers have been
    /// notified by then and the coordinator should stop.
    pub fn step(&mut self, event: CoordinatorEvent) -> Result<CoreStep, TransportError> {
        let step = match event {
            CoordinatorEvent::Submit { command, ack } => handle_submit(
                &mut self.transport,
                &mut self.registry,
                &mut self.refresh,
                command,
                ack,
            ),
            CoordinatorEvent::Launched { process_id, ack } => handle_launched(process_id, ack),
            CoordinatorEvent::RefreshTick => {
                handle_refresh_tick(&mut self.registry, &mut self.refresh)
            }
            CoordinatorEvent::Completed {
                process_id,
                termination,
            } => handle_completed(&mut self.registry, process_id, termination),
            CoordinatorEvent::PollNow => {
                handle_poll(&mut self.transport, &mut self.registry, self.poll_timeout)?
            }
            CoordinatorEvent::Shutdown => {
                if !self.registry.is_empty() {
                    warn!(
                        active = self.registry.len(),
                        ids = ?self.registry.ids(),
                        "shutting down with remote commands still running"
                    );
                }
                CoreStep {
                    commands: Vec::new(),
                    keep_running: false,
                }
            }
        };
        Ok(step)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::engine::CoreCommand;
    use crate::errors::LaunchError;
    use crate::transport::{MockTransport, ScriptStep};
    use crate::types::{Command, ProcessUpdate, Termination};

    fn settings() -> CoordinatorSettings {
        CoordinatorSettings {
            refresh_interval: Duration::from_millis(100),
            poll_timeout: Duration::ZERO,
            inbound_queue: 8,
        }
    }

    fn caller() -> (Arc<mpsc::UnboundedSender<ProcessUpdate>>, mpsc::UnboundedReceiver<ProcessUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(tx), rx)
    }

    /// Feed `event` and then every raised event, like the outer loop does.
    /// Returns the refresh delays that were requested.
    fn drive(core: &mut CoreRuntime<MockTransport>, event: CoordinatorEvent) -> Vec<Duration> {
        let mut queue = vec![event];
        let mut scheduled = Vec::new();
        while let Some(event) = queue.pop() {
            let step = core.step(event).unwrap();
            for command in step.commands {
                match command {
                    CoreCommand::Raise(raised) => queue.push(raised),
                    CoreCommand::ScheduleRefresh(delay) => scheduled.push(delay),
                }
            }
        }
        scheduled
    }

    #[test]
    fn submit_launches_and_arms_one_refresh() {
        let mut core = CoreRuntime::new(MockTransport::new(), &settings());
        let (tx, _rx) = caller();

        let scheduled = drive(&mut core, CoordinatorEvent::submit(Command::new("echo a", tx.clone())));
        assert_eq!(scheduled, vec![Duration::from_millis(100)]);

        let scheduled = drive(&mut core, CoordinatorEvent::submit(Command::new("echo b", tx)));
        assert!(scheduled.is_empty(), "refresh already armed");
        assert_eq!(core.active(), 2);
        assert!(core.wants_poll());
    }

    #[test]
    fn launch_ack_carries_id_or_error() {
        let transport = MockTransport::new();
        transport.fail_exec("nope");
        let mut core = CoreRuntime::new(transport, &settings());
        let (tx, _rx) = caller();

        let (ok_tx, mut ok_rx) = oneshot::channel();
        drive(
            &mut core,
            CoordinatorEvent::Submit {
                command: Command::new("echo ok", tx.clone()),
                ack: Some(ok_tx),
            },
        );
        assert_eq!(ok_rx.try_recv().unwrap(), Ok(0));

        let (err_tx, mut err_rx) = oneshot::channel();
        let scheduled = drive(
            &mut core,
            CoordinatorEvent::Submit {
                command: Command::new("nope", tx),
                ack: Some(err_tx),
            },
        );
        assert!(matches!(err_rx.try_recv().unwrap(), Err(LaunchError::Exec { .. })));
        assert!(scheduled.is_empty());
        assert_eq!(core.active(), 1);
    }

    #[test]
    fn failed_launch_with_empty_registry_arms_nothing() {
        let transport = MockTransport::new();
        transport.fail_open_channel();
        let mut core = CoreRuntime::new(transport, &settings());
        let (tx, _rx) = caller();

        let scheduled = drive(&mut core, CoordinatorEvent::submit(Command::new("echo x", tx)));
        assert!(scheduled.is_empty());
        assert!(!core.refresh().is_armed());
        assert!(!core.wants_poll());
    }

    #[test]
    fn poll_completes_echo_with_single_terminal_update() {
        let mut core = CoreRuntime::new(MockTransport::new(), &settings());
        let (tx, mut rx) = caller();

        drive(&mut core, CoordinatorEvent::submit(Command::new("echo hi", tx)));
        // Round 1: output. Round 2: exit status.
        drive(&mut core, CoordinatorEvent::PollNow);
        assert!(rx.try_recv().is_err());
        drive(&mut core, CoordinatorEvent::PollNow);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.process_id, 0);
        assert_eq!(update.lines, "hi\n");
        assert_eq!(update.exit_status, Some(0));
        assert!(rx.try_recv().is_err());
        assert!(!core.wants_poll());

        // Late duplicate completion is a no-op.
        drive(
            &mut core,
            CoordinatorEvent::Completed {
                process_id: 0,
                termination: Termination::Exited(0),
            },
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn refresh_flushes_partial_output_and_rearms_while_running() {
        let transport = MockTransport::new().with_script(
            "slow",
            vec![ScriptStep::stdout("first\n"), ScriptStep::Pause, ScriptStep::Exit(0)],
        );
        let mut core = CoreRuntime::new(transport, &settings());
        let (tx, mut rx) = caller();

        drive(&mut core, CoordinatorEvent::submit(Command::new("slow", tx)));
        drive(&mut core, CoordinatorEvent::PollNow);

        let scheduled = drive(&mut core, CoordinatorEvent::RefreshTick);
        assert_eq!(scheduled, vec![Duration::from_millis(100)]);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.lines, "first\n");
        assert_eq!(update.exit_status, None);
        assert_eq!(core.active(), 1);

        drive(&mut core, CoordinatorEvent::PollNow);
        drive(&mut core, CoordinatorEvent::PollNow);
        let last = rx.try_recv().unwrap();
        assert_eq!(last.lines, "");
        assert_eq!(last.exit_status, Some(0));

        // Registry empty: the tick that was outstanding does not re-arm.
        let scheduled = drive(&mut core, CoordinatorEvent::RefreshTick);
        assert!(scheduled.is_empty());
        assert!(!core.refresh().is_armed());
    }

    #[test]
    fn exit_signal_completes_with_shell_style_status() {
        let transport = MockTransport::new().with_script(
            "sleep 100",
            vec![ScriptStep::stdout("zz"), ScriptStep::Signal("TERM".into())],
        );
        let mut core = CoreRuntime::new(transport, &settings());
        let (tx, mut rx) = caller();

        drive(&mut core, CoordinatorEvent::submit(Command::new("sleep 100", tx)));
        drive(&mut core, CoordinatorEvent::PollNow);
        assert!(rx.try_recv().is_err());
        drive(&mut core, CoordinatorEvent::PollNow);

        let update = rx.try_recv().unwrap();
        assert_eq!(update.lines, "zz");
        assert_eq!(update.exit_status, Some(143));
        assert_eq!(
            update.termination,
            Some(Termination::Signaled {
                signal: "TERM".into(),
                core_dumped: false
            })
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(core.active(), 0);
    }

    #[test]
    fn transport_failure_notifies_every_caller() {
        let transport = MockTransport::new()
            .with_script("a", vec![ScriptStep::stdout("x\n"), ScriptStep::Pause])
            .with_script("b", vec![ScriptStep::Pause, ScriptStep::Pause]);
        transport.drop_connection_after(1);
        let mut core = CoreRuntime::new(transport, &settings());
        let (tx_a, mut rx_a) = caller();
        let (tx_b, mut rx_b) = caller();

        drive(&mut core, CoordinatorEvent::submit(Command::new("a", tx_a)));
        drive(&mut core, CoordinatorEvent::submit(Command::new("b", tx_b)));
        drive(&mut core, CoordinatorEvent::PollNow);

        let err = core.step(CoordinatorEvent::PollNow).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));

        let a = rx_a.try_recv().unwrap();
        assert_eq!(a.lines, "x\n");
        assert!(matches!(a.termination, Some(Termination::TransportFailed(_))));
        let b = rx_b.try_recv().unwrap();
        assert!(b.is_terminal());
        assert_eq!(core.active(), 0);
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let mut core = CoreRuntime::new(MockTransport::new(), &settings());
        let step = core.step(CoordinatorEvent::Shutdown).unwrap();
        assert!(!step.keep_running);
    }
}
