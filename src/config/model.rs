// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration exactly as read from a TOML file.
///
/// ```toml
/// [connection]
/// host = "build.example.org"
/// user = "deploy"
/// options = ["StrictHostKeyChecking=accept-new"]
///
/// [coordinator]
/// refresh_interval = "1s"
/// poll_timeout = "50ms"
///
/// [[command]]
/// cmd = "uname -a"
/// ```
///
/// Only `[connection].host` is mandatory. Use [`ConfigFile`] (obtained via
/// `TryFrom`) for anything that relies on the values being sane.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    pub connection: ConnectionSection,

    #[serde(default)]
    pub coordinator: CoordinatorSection,

    /// `[[command]]` entries submitted at startup.
    #[serde(default, rename = "command")]
    pub commands: Vec<CommandConfig>,
}

/// `[connection]` section: where and how to reach the remote host.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionSection {
    pub host: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// The OpenSSH client binary.
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,

    /// Extra `-o` options passed to every ssh invocation.
    #[serde(default)]
    pub options: Vec<String>,

    /// Control socket of the shared connection. Defaults to a per-process
    /// path in the temp directory.
    #[serde(default)]
    pub control_path: Option<PathBuf>,
}

impl ConnectionSection {
    /// `user@host`, or just `host`.
    pub fn destination(&self) -> String {
        match self.user {
            Some(ref user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

/// `[coordinator]` section, durations still as strings (e.g. `"1s"`).
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorSection {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    /// Upper bound on one pass of connection I/O processing.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout: String,

    /// Capacity of the coordinator's inbound queue.
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
}

fn default_refresh_interval() -> String {
    "1s".to_string()
}

fn default_poll_timeout() -> String {
    "50ms".to_string()
}

fn default_inbound_queue() -> usize {
    64
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            refresh_interval: default_refresh_interval(),
            poll_timeout: default_poll_timeout(),
            inbound_queue: default_inbound_queue(),
        }
    }
}

/// `[[command]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub cmd: String,
}

/// Parsed coordinator timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub refresh_interval: Duration,
    pub poll_timeout: Duration,
    pub inbound_queue: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_millis(50),
            inbound_queue: default_inbound_queue(),
        }
    }
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>`, so holding one means
/// the host is set, every duration parsed and every command is non-empty.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub connection: ConnectionSection,
    pub coordinator: CoordinatorSettings,
    pub commands: Vec<CommandConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        connection: ConnectionSection,
        coordinator: CoordinatorSettings,
        commands: Vec<CommandConfig>,
    ) -> Self {
        Self {
            connection,
            coordinator,
            commands,
        }
    }
}
