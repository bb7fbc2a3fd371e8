// src/process/launcher.rs

//! Starting remote commands.

use tracing::{error, info};

use crate::errors::LaunchError;
use crate::process::registry::{Process, Registry};
use crate::transport::{ChannelHandle, Transport};
use crate::types::{Command, ProcessId};

/// Open a channel, start `command` on it and register the resulting process.
///
/// Channel output reaches the process's buffer through the registry's
/// [`ChannelEventHandler`](crate::transport::ChannelEventHandler) impl,
/// which the transport drives from inside `process`.
///
/// A failure here is fatal to this launch only and is not retried.
pub fn launch<T: Transport>(
    transport: &mut T,
    registry: &mut Registry<T::Channel>,
    command: Command,
) -> Result<ProcessId, LaunchError> {
    let channel = transport.open_channel().inspect_err(|e| {
        error!(cmd = %command.text, error = %e, "failed to open channel");
    })?;

    let id = channel.local_id();
    if registry.contains(id) {
        error!(process_id = id, "transport reused an id that is still registered");
        return Err(LaunchError::DuplicateProcess(id));
    }

    transport.exec(&channel, &command.text).inspect_err(|e| {
        error!(process_id = id, cmd = %command.text, error = %e, "couldn't execute command");
    })?;

    info!(process_id = id, cmd = %command.text, "remote command started");
    registry.insert(Process::new(command, channel))?;

    Ok(id)
}
