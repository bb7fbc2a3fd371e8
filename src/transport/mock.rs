// src/transport/mock.rs

//! Scripted in-memory transport.
//!
//! Every command text maps to a script of [`ScriptStep`]s. Each call to
//! `process` plays at most one step per open channel, so a script reads like
//! a timeline of poll rounds. When a script runs out the channel closes.
//!
//! Commands without a script behave like a tiny shell: `echo X` prints
//! `X\n` and exits 0, anything else exits 0 silently.
//!
//! State sits behind an `Arc<Mutex<..>>` so a test can keep a clone for
//! inspection after the transport has been moved into a coordinator.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::errors::{LaunchError, TransportError};
use crate::transport::{ChannelEventHandler, ChannelHandle, EXTENDED_DATA_STDERR, Transport};
use crate::types::ProcessId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(i32),
    Signal(String),
    /// Close the channel right away, without an exit status.
    Close,
    /// Produce nothing during this round.
    Pause,
}

impl ScriptStep {
    pub fn stdout(text: &str) -> Self {
        ScriptStep::Stdout(text.as_bytes().to_vec())
    }

    pub fn stderr(text: &str) -> Self {
        ScriptStep::Stderr(text.as_bytes().to_vec())
    }
}

#[derive(Debug)]
pub struct MockChannel {
    id: ProcessId,
}

impl ChannelHandle for MockChannel {
    fn local_id(&self) -> ProcessId {
        self.id
    }
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<String, Vec<ScriptStep>>,
    failing_exec: HashSet<String>,
    fail_open: bool,
    next_id: ProcessId,
    /// Channels that have been exec'd and not closed yet.
    running: BTreeMap<ProcessId, VecDeque<ScriptStep>>,
    executed: Vec<String>,
    /// Fail `process` once this many calls have succeeded.
    drop_after: Option<usize>,
    process_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script played for every execution of `command`.
    pub fn with_script(self, command: &str, steps: Vec<ScriptStep>) -> Self {
        self.lock().scripts.insert(command.to_string(), steps);
        self
    }

    /// Make `exec` of `command` fail.
    pub fn fail_exec(&self, command: &str) {
        self.lock().failing_exec.insert(command.to_string());
    }

    /// Make every subsequent `open_channel` fail.
    pub fn fail_open_channel(&self) {
        self.lock().fail_open = true;
    }

    /// Simulate a dropped connection after `calls` successful `process` calls.
    pub fn drop_connection_after(&self, calls: usize) {
        self.lock().drop_after = Some(calls);
    }

    /// Force the id handed out by the next `open_channel`.
    pub fn set_next_id(&self, id: ProcessId) {
        self.lock().next_id = id;
    }

    /// Command texts that were successfully exec'd, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Number of channels whose script has not finished yet.
    pub fn open_channels(&self) -> usize {
        self.lock().running.len()
    }

    /// Number of `process` calls made so far.
    pub fn process_calls(&self) -> usize {
        self.lock().process_calls
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A test that panicked while holding the lock already failed.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn default_script(command: &str) -> Vec<ScriptStep> {
    match command.strip_prefix("echo ") {
        Some(rest) => vec![ScriptStep::stdout(&format!("{rest}\n")), ScriptStep::Exit(0)],
        None => vec![ScriptStep::Exit(0)],
    }
}

impl Transport for MockTransport {
    type Channel = MockChannel;

    fn open_channel(&mut self) -> Result<MockChannel, LaunchError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(LaunchError::ChannelOpen("mock channel open refused".into()));
        }
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);
        Ok(MockChannel { id })
    }

    fn exec(&mut self, channel: &MockChannel, command: &str) -> Result<(), LaunchError> {
        let mut state = self.lock();
        if state.failing_exec.contains(command) {
            return Err(LaunchError::Exec {
                cmd: command.to_string(),
                reason: "mock exec refused".into(),
            });
        }
        let script = state
            .scripts
            .get(command)
            .cloned()
            .unwrap_or_else(|| default_script(command));
        state.running.insert(channel.id, script.into());
        state.executed.push(command.to_string());
        Ok(())
    }

    fn process(
        &mut self,
        timeout: Duration,
        handler: &mut dyn ChannelEventHandler,
    ) -> Result<(), TransportError> {
        let round: Vec<(ProcessId, Option<ScriptStep>)> = {
            let mut state = self.lock();
            if state.drop_after.is_some_and(|n| state.process_calls >= n) {
                return Err(TransportError::Disconnected("mock connection dropped".into()));
            }
            state.process_calls += 1;

            let round = state
                .running
                .iter_mut()
                .map(|(id, steps)| (*id, steps.pop_front()))
                .collect::<Vec<_>>();
            for (id, step) in &round {
                if step.is_none() {
                    state.running.remove(id);
                }
            }
            round
        };

        let mut active = false;
        for (id, step) in round {
            match step {
                Some(ScriptStep::Stdout(bytes)) => handler.on_data(id, &bytes),
                Some(ScriptStep::Stderr(bytes)) => {
                    handler.on_extended_data(id, EXTENDED_DATA_STDERR, &bytes)
                }
                Some(ScriptStep::Exit(status)) => handler.on_exit_status(id, status),
                Some(ScriptStep::Signal(signal)) => handler.on_exit_signal(id, &signal, false),
                Some(ScriptStep::Close) => {
                    self.lock().running.remove(&id);
                    handler.on_close(id);
                }
                Some(ScriptStep::Pause) => continue,
                None => handler.on_close(id),
            }
            active = true;
        }

        if !active {
            // Nothing was ready: behave like a bounded wait.
            std::thread::sleep(timeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl ChannelEventHandler for Recorder {
        fn on_data(&mut self, channel: ProcessId, data: &[u8]) {
            self.events
                .push(format!("{channel}:out:{}", String::from_utf8_lossy(data)));
        }
        fn on_extended_data(&mut self, channel: ProcessId, _data_type: u32, data: &[u8]) {
            self.events
                .push(format!("{channel}:err:{}", String::from_utf8_lossy(data)));
        }
        fn on_exit_status(&mut self, channel: ProcessId, status: i32) {
            self.events.push(format!("{channel}:exit:{status}"));
        }
        fn on_exit_signal(&mut self, channel: ProcessId, signal: &str, _core_dumped: bool) {
            self.events.push(format!("{channel}:signal:{signal}"));
        }
        fn on_close(&mut self, channel: ProcessId) {
            self.events.push(format!("{channel}:close"));
        }
    }

    #[test]
    fn plays_one_step_per_channel_per_round() {
        let mut transport = MockTransport::new().with_script(
            "build",
            vec![ScriptStep::stdout("a"), ScriptStep::stderr("b"), ScriptStep::Exit(2)],
        );
        let ch = transport.open_channel().unwrap();
        transport.exec(&ch, "build").unwrap();

        let mut rec = Recorder::default();
        for _ in 0..4 {
            transport.process(Duration::ZERO, &mut rec).unwrap();
        }

        assert_eq!(rec.events, vec!["0:out:a", "0:err:b", "0:exit:2", "0:close"]);
        assert_eq!(transport.open_channels(), 0);
        assert_eq!(transport.process_calls(), 4);
    }

    #[test]
    fn dropped_connection_fails_process() {
        let mut transport = MockTransport::new();
        transport.drop_connection_after(1);

        let mut rec = Recorder::default();
        transport.process(Duration::ZERO, &mut rec).unwrap();
        assert!(matches!(
            transport.process(Duration::ZERO, &mut rec),
            Err(TransportError::Disconnected(_))
        ));
    }
}
