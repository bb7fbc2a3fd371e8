// src/process/notifier.rs

//! Delivering updates to callers.
//!
//! - [`flush`] / [`flush_all_pending`] hand out unread output of processes
//!   that are still running (refresh path).
//! - [`complete`] hands out the terminal update and retires the process.
//! - [`fail_all`] terminates every registered process after the shared
//!   connection died.
//!
//! All of these are no-ops for ids that are no longer registered, which is
//! what makes duplicate or late completion signals harmless.

use tracing::{debug, info, warn};

use crate::process::buffer::join_chunks;
use crate::process::registry::{Process, Registry};
use crate::types::{ProcessId, ProcessUpdate, Termination};

/// Deliver a non-terminal update with the process's unread output, if any.
///
/// Returns `true` if an update was handed to the caller.
pub fn flush<C>(registry: &mut Registry<C>, id: ProcessId) -> bool {
    let Some(process) = registry.get_mut(id) else {
        return false;
    };
    if !process.buffer.has_unread() {
        return false;
    }

    let chunks = process.buffer.take(false);
    if chunks.is_empty() {
        // Only an incomplete character is buffered so far.
        return false;
    }

    let update = ProcessUpdate {
        process_id: id,
        lines: join_chunks(&chunks),
        exit_status: None,
        chunks,
        termination: None,
    };
    deliver(process, update)
}

/// [`flush`] every registered process that has unread output.
///
/// Returns the number of updates delivered.
pub fn flush_all_pending<C>(registry: &mut Registry<C>) -> usize {
    let pending: Vec<ProcessId> = registry
        .iter()
        .filter(|p| p.buffer.has_unread())
        .map(|p| p.id)
        .collect();

    pending
        .into_iter()
        .filter(|id| flush(registry, *id))
        .count()
}

/// Deliver the terminal update for `id` and remove it from the registry.
///
/// Returns `false` (and does nothing) if the process was already retired.
pub fn complete<C>(registry: &mut Registry<C>, id: ProcessId, termination: Termination) -> bool {
    let Some(mut process) = registry.remove(id) else {
        debug!(process_id = id, "completion for unregistered process; ignoring");
        return false;
    };

    let chunks = process.buffer.take(true);
    let exit_status = termination.exit_status();
    info!(
        process_id = id,
        cmd = %process.command.text,
        exit_status,
        ?termination,
        "remote command finished"
    );

    let update = ProcessUpdate {
        process_id: id,
        lines: join_chunks(&chunks),
        exit_status: Some(exit_status),
        chunks,
        termination: Some(termination),
    };
    // The process is retired whether or not the caller is still listening.
    deliver(&process, update);
    true
}

/// Terminate every registered process with [`Termination::TransportFailed`].
///
/// Returns the number of processes retired.
pub fn fail_all<C>(registry: &mut Registry<C>, reason: &str) -> usize {
    registry
        .ids()
        .into_iter()
        .filter(|id| complete(registry, *id, Termination::TransportFailed(reason.to_string())))
        .count()
}

fn deliver<C>(process: &Process<C>, update: ProcessUpdate) -> bool {
    let id = update.process_id;
    match process.command.caller.deliver(update) {
        Ok(()) => true,
        Err(e) => {
            warn!(process_id = id, error = %e, "dropping update");
            false
        }
    }
}
