// src/errors.rs

//! Crate-wide error types.
//!
//! `ShellmuxError` is what the ambient layer (config, CLI, runtime) returns.
//! The narrower enums below are used at the seams of the core so that the
//! dispatcher can tell a failed launch from a dead connection.

use thiserror::Error;

use crate::types::ProcessId;

#[derive(Error, Debug)]
pub enum ShellmuxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A command could not be started on the remote host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),

    #[error("couldn't execute command `{cmd}`: {reason}")]
    Exec { cmd: String, reason: String },

    #[error("transport assigned id {0} which is already registered")]
    DuplicateProcess(ProcessId),

    #[error("coordinator is not running")]
    CoordinatorGone,
}

/// The shared connection itself failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection lost: {0}")]
    Disconnected(String),
}

/// An update could not be handed to its caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("caller for process {0} is gone")]
    CallerGone(ProcessId),

    #[error("caller for process {0} is not accepting updates")]
    CallerFull(ProcessId),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, ShellmuxError>;
