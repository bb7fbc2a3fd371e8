// src/engine/poll.rs

//! The poll/wait step.
//!
//! One bounded pass of the transport's I/O processing, during which channel
//! callbacks land in the registry, followed by a sweep over every registered
//! process in registry order:
//! - fresh bytes are drained into the ready text, in arrival order;
//! - processes whose termination has been observed are reported.
//!
//! Completion is driven only by an observed termination (exit status,
//! exit signal or channel close). Output without a termination is left for
//! the next refresh.

use std::time::Duration;

use tracing::trace;

use crate::errors::TransportError;
use crate::process::Registry;
use crate::transport::Transport;
use crate::types::{ProcessId, Termination};

pub fn poll_once<T: Transport>(
    transport: &mut T,
    registry: &mut Registry<T::Channel>,
    timeout: Duration,
) -> Result<Vec<(ProcessId, Termination)>, TransportError> {
    transport.process(timeout, registry)?;

    let mut finished = Vec::new();
    for process in registry.iter_mut() {
        if process.buffer.has_fresh() {
            trace!(process_id = process.id, "output ready");
            process.buffer.drain();
        }
        if let Some(termination) = process.termination() {
            finished.push((process.id, termination.clone()));
        }
    }
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::process::launch;
    use crate::transport::{MockTransport, ScriptStep};
    use crate::types::{Command, ProcessUpdate};

    #[test]
    fn output_without_exit_status_is_not_a_completion() {
        let mut transport = MockTransport::new().with_script(
            "tail -f log",
            vec![ScriptStep::stdout("line\n"), ScriptStep::Pause, ScriptStep::Exit(0)],
        );
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel::<ProcessUpdate>();
        let id = launch(
            &mut transport,
            &mut registry,
            Command::new("tail -f log", Arc::new(tx)),
        )
        .unwrap();

        let first = poll_once(&mut transport, &mut registry, Duration::ZERO).unwrap();
        assert!(first.is_empty());
        assert!(registry.get(id).unwrap().buffer.has_unread());
        assert!(!registry.get(id).unwrap().buffer.has_fresh());

        let second = poll_once(&mut transport, &mut registry, Duration::ZERO).unwrap();
        assert!(second.is_empty());

        let third = poll_once(&mut transport, &mut registry, Duration::ZERO).unwrap();
        assert_eq!(third, vec![(id, Termination::Exited(0))]);
        assert_eq!(transport.process_calls(), 3);
    }

    #[test]
    fn close_without_status_completes_as_channel_closed() {
        let mut transport =
            MockTransport::new().with_script("flaky", vec![ScriptStep::Close]);
        let mut registry = Registry::new();
        let (tx, _rx) = mpsc::unbounded_channel::<ProcessUpdate>();
        let id = launch(&mut transport, &mut registry, Command::new("flaky", Arc::new(tx)))
            .unwrap();

        let finished = poll_once(&mut transport, &mut registry, Duration::ZERO).unwrap();
        assert_eq!(finished, vec![(id, Termination::ChannelClosed)]);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut transport = MockTransport::new();
        transport.drop_connection_after(0);
        let mut registry: Registry<_> = Registry::new();

        let err = poll_once(&mut transport, &mut registry, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
        assert_eq!(transport.process_calls(), 0);
    }
}
