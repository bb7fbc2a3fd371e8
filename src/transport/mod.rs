// src/transport/mod.rs

//! Remote transport abstraction.
//!
//! The coordinator talks to a `Transport` instead of a concrete SSH library.
//! This makes it easy to swap in a scripted transport in tests while keeping
//! the production implementation in [`openssh`].
//!
//! - [`openssh`] multiplexes channels over one OpenSSH control connection.
//! - [`mock`] replays scripted channel events without any network.
//!
//! Channel events are never pushed into coordinator state from another
//! thread. They are handed to a [`ChannelEventHandler`] synchronously from
//! inside [`Transport::process`], which the coordinator calls on its own turn
//! of the loop.

use std::fmt::Debug;
use std::time::Duration;

use crate::errors::{LaunchError, TransportError};
use crate::types::ProcessId;

pub mod mock;
pub mod openssh;

pub use mock::{MockTransport, ScriptStep};
pub use openssh::OpenSshTransport;

/// SSH extended-data type code for stderr.
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Handle to an open channel on the shared connection.
pub trait ChannelHandle: Debug + Send {
    /// Connection-local channel id; doubles as the process id.
    fn local_id(&self) -> ProcessId;
}

/// Receives channel events while the transport processes pending I/O.
pub trait ChannelEventHandler {
    fn on_data(&mut self, channel: ProcessId, data: &[u8]);
    fn on_extended_data(&mut self, channel: ProcessId, data_type: u32, data: &[u8]);
    fn on_exit_status(&mut self, channel: ProcessId, status: i32);
    fn on_exit_signal(&mut self, channel: ProcessId, signal: &str, core_dumped: bool);
    fn on_close(&mut self, channel: ProcessId);
}

/// The shared connection as seen by the coordinator.
pub trait Transport: Send {
    type Channel: ChannelHandle;

    /// Open a new channel on the shared connection.
    fn open_channel(&mut self) -> Result<Self::Channel, LaunchError>;

    /// Start `command` on an open channel.
    fn exec(&mut self, channel: &Self::Channel, command: &str) -> Result<(), LaunchError>;

    /// Process pending connection I/O once, dispatching channel events to
    /// `handler`. Blocks for at most `timeout` when nothing is ready.
    fn process(
        &mut self,
        timeout: Duration,
        handler: &mut dyn ChannelEventHandler,
    ) -> Result<(), TransportError>;
}
