// src/process/mod.rs

//! Bookkeeping for remote commands that are in flight.
//!
//! - [`buffer`] accumulates a command's output between flushes.
//! - [`registry`] holds the `Process` records and routes channel events.
//! - [`launcher`] opens channels and registers new processes.
//! - [`notifier`] delivers updates to callers and retires processes.

pub mod buffer;
pub mod launcher;
pub mod notifier;
pub mod registry;

pub use buffer::OutputBuffer;
pub use launcher::launch;
pub use registry::{Process, Registry};
