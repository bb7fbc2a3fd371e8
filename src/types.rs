// src/types.rs

//! Value types shared by the coordinator, its callers and the transport.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::errors::DeliveryError;

/// Connection-local identifier of a running remote command.
///
/// Assigned by the transport when the channel is opened. Unique among the
/// currently registered processes; may be reused after a process retires.
pub type ProcessId = u32;

/// Exit status reported when the real status is unknown
/// (channel closed without a status, or the connection died).
pub const EXIT_UNKNOWN: i32 = -1;

/// Which remote stream a piece of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A run of output text from a single stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: OutputStream,
    pub text: String,
}

/// How a remote command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The remote side reported an exit status.
    Exited(i32),
    /// The remote command was killed by a signal (SSH `exit-signal`).
    Signaled { signal: String, core_dumped: bool },
    /// The channel closed without any exit status or signal.
    ChannelClosed,
    /// The shared connection failed while the command was running.
    TransportFailed(String),
}

impl Termination {
    /// Numeric exit status delivered to callers.
    ///
    /// - `Exited(c)` → `c`
    /// - `Signaled` → `128 + signo` (shell convention), 255 for unknown names
    /// - everything else → [`EXIT_UNKNOWN`]
    pub fn exit_status(&self) -> i32 {
        match self {
            Termination::Exited(code) => *code,
            Termination::Signaled { signal, .. } => signal_number(signal)
                .map(|n| 128 + n)
                .unwrap_or(255),
            Termination::ChannelClosed | Termination::TransportFailed(_) => EXIT_UNKNOWN,
        }
    }
}

/// POSIX signal names (without the `SIG` prefix, as SSH reports them).
const SIGNALS: &[(&str, i32)] = &[
    ("HUP", 1),
    ("INT", 2),
    ("QUIT", 3),
    ("ILL", 4),
    ("ABRT", 6),
    ("FPE", 8),
    ("KILL", 9),
    ("USR1", 10),
    ("SEGV", 11),
    ("USR2", 12),
    ("PIPE", 13),
    ("ALRM", 14),
    ("TERM", 15),
];

/// Map an SSH signal name (`"TERM"`, `"SIGKILL"`, ...) to its POSIX number.
pub fn signal_number(name: &str) -> Option<i32> {
    let name = name.trim().trim_start_matches("SIG");
    SIGNALS.iter().find(|(n, _)| *n == name).map(|(_, num)| *num)
}

/// Inverse of [`signal_number`]; unknown numbers are rendered numerically.
pub fn signal_name(number: i32) -> String {
    SIGNALS
        .iter()
        .find(|(_, num)| *num == number)
        .map(|(n, _)| n.to_string())
        .unwrap_or_else(|| number.to_string())
}

/// Update delivered to the caller of a command.
///
/// `exit_status == None` means the command is still running and `lines` is
/// newly observed output. A present status marks the terminal update; no
/// further updates follow for this `process_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessUpdate {
    pub process_id: ProcessId,
    /// Untagged output text, in production order.
    pub lines: String,
    pub exit_status: Option<i32>,
    /// Same text as `lines`, split into stream-tagged runs.
    pub chunks: Vec<OutputChunk>,
    /// Present iff `exit_status` is present.
    pub termination: Option<Termination>,
}

impl ProcessUpdate {
    pub fn is_terminal(&self) -> bool {
        self.exit_status.is_some()
    }
}

/// Something the coordinator can post updates to.
///
/// The coordinator never inspects the caller beyond this; delivery must not
/// block the coordinator thread.
pub trait UpdateSink: Send + Sync {
    fn deliver(&self, update: ProcessUpdate) -> std::result::Result<(), DeliveryError>;
}

impl UpdateSink for mpsc::UnboundedSender<ProcessUpdate> {
    fn deliver(&self, update: ProcessUpdate) -> std::result::Result<(), DeliveryError> {
        let id = update.process_id;
        self.send(update).map_err(|_| DeliveryError::CallerGone(id))
    }
}

impl UpdateSink for mpsc::Sender<ProcessUpdate> {
    fn deliver(&self, update: ProcessUpdate) -> std::result::Result<(), DeliveryError> {
        let id = update.process_id;
        self.try_send(update).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::CallerFull(id),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::CallerGone(id),
        })
    }
}

/// Shared handle to a caller.
pub type Caller = Arc<dyn UpdateSink>;

/// A command submitted for remote execution.
#[derive(Clone)]
pub struct Command {
    pub text: String,
    pub caller: Caller,
}

impl Command {
    pub fn new(text: impl Into<String>, caller: Caller) -> Self {
        Self {
            text: text.into(),
            caller,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("text", &self.text)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_follows_termination_kind() {
        assert_eq!(Termination::Exited(3).exit_status(), 3);
        assert_eq!(
            Termination::Signaled {
                signal: "TERM".into(),
                core_dumped: false
            }
            .exit_status(),
            143
        );
        assert_eq!(
            Termination::Signaled {
                signal: "SIGKILL".into(),
                core_dumped: false
            }
            .exit_status(),
            137
        );
        assert_eq!(
            Termination::Signaled {
                signal: "WINCH".into(),
                core_dumped: false
            }
            .exit_status(),
            255
        );
        assert_eq!(Termination::ChannelClosed.exit_status(), EXIT_UNKNOWN);
    }

    #[test]
    fn unbounded_sink_reports_gone_caller() {
        let (tx, rx) = mpsc::unbounded_channel::<ProcessUpdate>();
        drop(rx);

        let update = ProcessUpdate {
            process_id: 7,
            lines: String::new(),
            exit_status: None,
            chunks: Vec::new(),
            termination: None,
        };

        assert_eq!(tx.deliver(update), Err(DeliveryError::CallerGone(7)));
    }
}
