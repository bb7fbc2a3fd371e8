// src/process/registry.rs

//! The set of remote commands that are currently running.
//!
//! The registry is the single source of truth for "what is running": a
//! process is present iff its terminal update has not been delivered yet.
//! It is keyed by [`ProcessId`] and iterates in ascending id order, which is
//! the order the poll step visits processes in.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::errors::LaunchError;
use crate::process::buffer::OutputBuffer;
use crate::transport::{ChannelEventHandler, ChannelHandle, EXTENDED_DATA_STDERR};
use crate::types::{Command, OutputStream, ProcessId, Termination};

/// Bookkeeping record for one in-flight remote command.
#[derive(Debug)]
pub struct Process<C> {
    pub command: Command,
    pub id: ProcessId,
    pub channel: C,
    pub buffer: OutputBuffer,
    /// First termination observed on the channel.
    termination: Option<Termination>,
}

impl<C: ChannelHandle> Process<C> {
    pub fn new(command: Command, channel: C) -> Self {
        Self {
            id: channel.local_id(),
            command,
            channel,
            buffer: OutputBuffer::new(),
            termination: None,
        }
    }
}

impl<C> Process<C> {
    pub fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    /// Record how the command ended. Later reports (e.g. the close that
    /// follows an exit status) do not override the first one.
    pub fn record_termination(&mut self, termination: Termination) {
        if self.termination.is_none() {
            self.termination = Some(termination);
        }
    }
}

#[derive(Debug)]
pub struct Registry<C> {
    processes: BTreeMap<ProcessId, Process<C>>,
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self {
            processes: BTreeMap::new(),
        }
    }
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly launched process.
    ///
    /// Fails if a process with the same id is still registered.
    pub fn insert(&mut self, process: Process<C>) -> Result<(), LaunchError> {
        let id = process.id;
        if self.processes.contains_key(&id) {
            return Err(LaunchError::DuplicateProcess(id));
        }
        self.processes.insert(id, process);
        debug!(process_id = id, active = self.processes.len(), "process registered");
        Ok(())
    }

    pub fn remove(&mut self, id: ProcessId) -> Option<Process<C>> {
        let removed = self.processes.remove(&id);
        if removed.is_some() {
            debug!(process_id = id, active = self.processes.len(), "process retired");
        }
        removed
    }

    pub fn get(&self, id: ProcessId) -> Option<&Process<C>> {
        self.processes.get(&id)
    }

    pub fn get_mut(&mut self, id: ProcessId) -> Option<&mut Process<C>> {
        self.processes.get_mut(&id)
    }

    pub fn contains(&self, id: ProcessId) -> bool {
        self.processes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Registered ids in registry order.
    pub fn ids(&self) -> Vec<ProcessId> {
        self.processes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process<C>> {
        self.processes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process<C>> {
        self.processes.values_mut()
    }

    fn on_event(&mut self, channel: ProcessId, kind: &str) -> Option<&mut Process<C>> {
        let process = self.processes.get_mut(&channel);
        if process.is_none() {
            trace!(channel, kind, "event for unregistered channel; ignoring");
        }
        process
    }
}

impl<C> ChannelEventHandler for Registry<C> {
    fn on_data(&mut self, channel: ProcessId, data: &[u8]) {
        if let Some(process) = self.on_event(channel, "data") {
            process.buffer.append(OutputStream::Stdout, data);
        }
    }

    fn on_extended_data(&mut self, channel: ProcessId, data_type: u32, data: &[u8]) {
        if data_type != EXTENDED_DATA_STDERR {
            trace!(channel, data_type, "unknown extended data type; treating as stderr");
        }
        if let Some(process) = self.on_event(channel, "extended-data") {
            process.buffer.append(OutputStream::Stderr, data);
        }
    }

    fn on_exit_status(&mut self, channel: ProcessId, status: i32) {
        if let Some(process) = self.on_event(channel, "exit-status") {
            trace!(process_id = channel, status, "exit status observed");
            process.record_termination(Termination::Exited(status));
        }
    }

    fn on_exit_signal(&mut self, channel: ProcessId, signal: &str, core_dumped: bool) {
        if let Some(process) = self.on_event(channel, "exit-signal") {
            debug!(process_id = channel, signal, core_dumped, "remote command killed by signal");
            process.record_termination(Termination::Signaled {
                signal: signal.to_string(),
                core_dumped,
            });
        }
    }

    fn on_close(&mut self, channel: ProcessId) {
        if let Some(process) = self.on_event(channel, "close") {
            process.record_termination(Termination::ChannelClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;
    use crate::types::ProcessUpdate;

    #[derive(Debug)]
    struct TestChannel(ProcessId);

    impl ChannelHandle for TestChannel {
        fn local_id(&self) -> ProcessId {
            self.0
        }
    }

    fn process(id: ProcessId) -> Process<TestChannel> {
        let (tx, _rx) = mpsc::unbounded_channel::<ProcessUpdate>();
        Process::new(Command::new("true", Arc::new(tx)), TestChannel(id))
    }

    #[test]
    fn rejects_duplicate_ids_until_retired() {
        let mut registry = Registry::new();
        registry.insert(process(4)).unwrap();

        assert_eq!(
            registry.insert(process(4)),
            Err(LaunchError::DuplicateProcess(4))
        );
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(4).is_some());
        registry.insert(process(4)).unwrap();
        assert!(registry.contains(4));
    }

    #[test]
    fn iterates_in_id_order() {
        let mut registry = Registry::new();
        for id in [9, 2, 5] {
            registry.insert(process(id)).unwrap();
        }
        assert_eq!(registry.ids(), vec![2, 5, 9]);
    }

    #[test]
    fn routes_channel_events_to_the_matching_process() {
        let mut registry = Registry::new();
        registry.insert(process(1)).unwrap();
        registry.insert(process(2)).unwrap();

        registry.on_data(1, b"hello\n");
        registry.on_extended_data(2, EXTENDED_DATA_STDERR, b"oops\n");
        registry.on_exit_status(2, 3);
        registry.on_close(2);
        // Unknown channel: ignored.
        registry.on_data(42, b"stray");

        assert!(registry.get(1).unwrap().buffer.has_fresh());
        assert!(registry.get(1).unwrap().termination().is_none());
        assert_eq!(
            registry.get(2).unwrap().termination(),
            Some(&Termination::Exited(3))
        );
    }
}
