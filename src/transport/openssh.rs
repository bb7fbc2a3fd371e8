// src/transport/openssh.rs

//! Transport backed by the system OpenSSH client.
//!
//! One master connection is opened with `ControlMaster`; every channel is a
//! `ssh -S <control_path>` client that rides on it, so all commands share a
//! single authenticated connection.
//!
//! Each channel gets a Tokio task that pumps the client's stdout (data) and
//! stderr (extended data) and finally reports the exit status and the
//! close. Those tasks never touch coordinator state: they only post
//! [`ChannelEvent`]s into a std channel, which [`Transport::process`] drains
//! on the coordinator thread.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionSection;
use crate::errors::{LaunchError, TransportError};
use crate::transport::{ChannelEventHandler, ChannelHandle, EXTENDED_DATA_STDERR, Transport};
use crate::types::{ProcessId, signal_name};

/// The OpenSSH client exits with this status when ssh itself failed.
const SSH_ERROR_STATUS: i32 = 255;

const READ_CHUNK: usize = 8192;

/// Raw event posted by a channel task.
#[derive(Debug)]
enum ChannelEvent {
    Data { channel: ProcessId, bytes: Vec<u8> },
    ExtendedData { channel: ProcessId, bytes: Vec<u8> },
    ExitStatus { channel: ProcessId, status: i32 },
    ExitSignal { channel: ProcessId, signal: String, core_dumped: bool },
    Close { channel: ProcessId },
    ConnectionLost { reason: String },
}

#[derive(Debug)]
pub struct OpenSshChannel {
    id: ProcessId,
}

impl ChannelHandle for OpenSshChannel {
    fn local_id(&self) -> ProcessId {
        self.id
    }
}

/// Everything needed to build an ssh command line.
#[derive(Debug, Clone)]
struct SshTarget {
    program: String,
    destination: String,
    port: Option<u16>,
    options: Vec<String>,
    control_path: PathBuf,
}

impl SshTarget {
    fn from_config(conn: &ConnectionSection) -> Self {
        let control_path = conn.control_path.clone().unwrap_or_else(|| {
            std::env::temp_dir().join(format!("shellmux-{}.sock", std::process::id()))
        });
        Self {
            program: conn.ssh_program.clone(),
            destination: conn.destination(),
            port: conn.port,
            options: conn.options.clone(),
            control_path,
        }
    }

    /// Arguments shared by every invocation, up to (excluding) the destination.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec!["-S".to_string(), self.control_path.display().to_string()];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        args
    }

    fn master_args(&self) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-f".to_string(),
            "-o".to_string(),
            "ControlPersist=yes".to_string(),
        ];
        args.extend(self.base_args());
        args.push(self.destination.clone());
        args
    }

    fn control_args(&self, op: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-O".to_string());
        args.push(op.to_string());
        args.push(self.destination.clone());
        args
    }

    fn exec_args(&self, command: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push("-T".to_string());
        args.push(self.destination.clone());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

pub struct OpenSshTransport {
    target: SshTarget,
    runtime: Handle,
    events_tx: mpsc::Sender<ChannelEvent>,
    events_rx: mpsc::Receiver<ChannelEvent>,
    /// Channels opened and not yet closed.
    open: HashSet<ProcessId>,
    next_id: ProcessId,
    closed: bool,
}

impl std::fmt::Debug for OpenSshTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenSshTransport")
            .field("destination", &self.target.destination)
            .field("control_path", &self.target.control_path)
            .field("open", &self.open.len())
            .finish_non_exhaustive()
    }
}

impl OpenSshTransport {
    /// Start the master connection and verify it is usable.
    ///
    /// Blocks until ssh has authenticated (or failed). `runtime` is where
    /// the per-channel reader tasks will run.
    pub fn connect(conn: &ConnectionSection, runtime: Handle) -> Result<Self, TransportError> {
        let target = SshTarget::from_config(conn);
        info!(
            destination = %target.destination,
            control_path = %target.control_path.display(),
            "opening shared ssh connection"
        );

        // `-f` forks after authentication while keeping our stderr, so
        // only wait for the status; capturing output would never reach EOF.
        let status = std::process::Command::new(&target.program)
            .args(target.master_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .map_err(|e| TransportError::Connect(format!("spawning {}: {e}", target.program)))?;
        if !status.success() {
            return Err(TransportError::Connect(format!(
                "ssh master for {} exited with {status}",
                target.destination
            )));
        }

        let check = std::process::Command::new(&target.program)
            .args(target.control_args("check"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if !check.success() {
            return Err(TransportError::Connect(format!(
                "control socket {} is not usable",
                target.control_path.display()
            )));
        }

        let (events_tx, events_rx) = mpsc::channel();
        Ok(Self {
            target,
            runtime,
            events_tx,
            events_rx,
            open: HashSet::new(),
            next_id: 0,
            closed: false,
        })
    }

    /// Ask the master connection to exit.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        match std::process::Command::new(&self.target.program)
            .args(self.target.control_args("exit"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) => debug!(%status, "ssh master asked to exit"),
            Err(e) => warn!(error = %e, "failed to stop ssh master"),
        }
    }

    fn allocate_id(&mut self) -> Result<ProcessId, LaunchError> {
        // Skip ids whose channel is still open; the space only runs out
        // with 2^32 concurrent channels.
        for _ in 0..=u32::MAX {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.open.contains(&id) {
                return Ok(id);
            }
        }
        Err(LaunchError::ChannelOpen("no free channel id".into()))
    }

    fn dispatch(
        &mut self,
        event: ChannelEvent,
        handler: &mut dyn ChannelEventHandler,
    ) -> Result<(), TransportError> {
        trace!(?event, "channel event");
        match event {
            ChannelEvent::Data { channel, bytes } => handler.on_data(channel, &bytes),
            ChannelEvent::ExtendedData { channel, bytes } => {
                handler.on_extended_data(channel, EXTENDED_DATA_STDERR, &bytes)
            }
            ChannelEvent::ExitStatus { channel, status } => handler.on_exit_status(channel, status),
            ChannelEvent::ExitSignal {
                channel,
                signal,
                core_dumped,
            } => handler.on_exit_signal(channel, &signal, core_dumped),
            ChannelEvent::Close { channel } => {
                self.open.remove(&channel);
                handler.on_close(channel);
            }
            ChannelEvent::ConnectionLost { reason } => {
                return Err(TransportError::Disconnected(reason));
            }
        }
        Ok(())
    }
}

impl Drop for OpenSshTransport {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for OpenSshTransport {
    type Channel = OpenSshChannel;

    fn open_channel(&mut self) -> Result<OpenSshChannel, LaunchError> {
        if self.closed {
            return Err(LaunchError::ChannelOpen("connection is closed".into()));
        }
        let id = self.allocate_id()?;
        self.open.insert(id);
        Ok(OpenSshChannel { id })
    }

    fn exec(&mut self, channel: &OpenSshChannel, command: &str) -> Result<(), LaunchError> {
        let spawned = {
            // tokio::process needs a reactor; the coordinator thread is not
            // a runtime thread, so enter ours.
            let _guard = self.runtime.enter();
            Command::new(&self.target.program)
                .args(self.target.exec_args(command))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
        };

        let child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.open.remove(&channel.id);
                return Err(LaunchError::Exec {
                    cmd: command.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        debug!(channel = channel.id, cmd = %command, "ssh channel process spawned");
        self.runtime.spawn(pump_channel(
            channel.id,
            child,
            self.target.clone(),
            self.events_tx.clone(),
        ));
        Ok(())
    }

    fn process(
        &mut self,
        timeout: Duration,
        handler: &mut dyn ChannelEventHandler,
    ) -> Result<(), TransportError> {
        let first = match self.events_rx.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return Ok(()),
            Err(RecvTimeoutError::Disconnected) => {
                return Err(TransportError::Disconnected("event channel closed".into()));
            }
        };
        self.dispatch(first, handler)?;

        loop {
            match self.events_rx.try_recv() {
                Ok(event) => self.dispatch(event, handler)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    return Err(TransportError::Disconnected("event channel closed".into()));
                }
            }
        }
    }
}

/// Drive one channel's client process to completion.
async fn pump_channel(
    channel: ProcessId,
    mut child: Child,
    target: SshTarget,
    events: mpsc::Sender<ChannelEvent>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::join!(
        pump_stream(channel, stdout, false, events.clone()),
        pump_stream(channel, stderr, true, events.clone()),
    );

    match child.wait().await {
        Ok(status) => {
            if status.code() == Some(SSH_ERROR_STATUS) && !master_alive(&target).await {
                warn!(channel, "ssh master connection is gone");
                let _ = events.send(ChannelEvent::ConnectionLost {
                    reason: format!("ssh master for {} is gone", target.destination),
                });
            }
            if let Some(event) = termination_event(channel, status) {
                let _ = events.send(event);
            }
        }
        Err(e) => warn!(channel, error = %e, "waiting for ssh channel process failed"),
    }

    let _ = events.send(ChannelEvent::Close { channel });
}

async fn pump_stream<R: AsyncRead + Unpin>(
    channel: ProcessId,
    reader: Option<R>,
    extended: bool,
    events: mpsc::Sender<ChannelEvent>,
) {
    let Some(mut reader) = reader else {
        return;
    };
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = buf[..n].to_vec();
                let event = if extended {
                    ChannelEvent::ExtendedData { channel, bytes }
                } else {
                    ChannelEvent::Data { channel, bytes }
                };
                if events.send(event).is_err() {
                    // Transport dropped; nobody is listening anymore.
                    break;
                }
            }
            Err(e) => {
                warn!(channel, extended, error = %e, "reading ssh channel output failed");
                break;
            }
        }
    }
}

async fn master_alive(target: &SshTarget) -> bool {
    Command::new(&target.program)
        .args(target.control_args("check"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

fn termination_event(channel: ProcessId, status: ExitStatus) -> Option<ChannelEvent> {
    if let Some(code) = status.code() {
        return Some(ChannelEvent::ExitStatus {
            channel,
            status: code,
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signo) = status.signal() {
            return Some(ChannelEvent::ExitSignal {
                channel,
                signal: signal_name(signo),
                core_dumped: status.core_dumped(),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionSection {
        ConnectionSection {
            host: "build.example.org".into(),
            user: Some("deploy".into()),
            port: Some(2222),
            ssh_program: "ssh".into(),
            options: vec!["BatchMode=yes".into()],
            control_path: Some(PathBuf::from("/tmp/mux.sock")),
        }
    }

    #[test]
    fn exec_args_route_through_control_socket() {
        let target = SshTarget::from_config(&conn());
        assert_eq!(
            target.exec_args("ls -l"),
            vec![
                "-S",
                "/tmp/mux.sock",
                "-p",
                "2222",
                "-o",
                "BatchMode=yes",
                "-T",
                "deploy@build.example.org",
                "--",
                "ls -l",
            ]
        );
    }

    #[test]
    fn master_args_start_a_persistent_master() {
        let target = SshTarget::from_config(&conn());
        let args = target.master_args();
        assert_eq!(&args[..5], &["-M", "-N", "-f", "-o", "ControlPersist=yes"]);
        assert_eq!(args.last().map(String::as_str), Some("deploy@build.example.org"));
    }

    #[test]
    fn control_args_end_with_operation_and_destination() {
        let target = SshTarget::from_config(&conn());
        let args = target.control_args("check");
        let n = args.len();
        assert_eq!(&args[n - 3..], &["-O", "check", "deploy@build.example.org"]);
    }
}
