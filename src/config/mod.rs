// src/config/mod.rs

//! Configuration loading and validation for shellmux.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it and parse durations (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    CommandConfig, ConfigFile, ConnectionSection, CoordinatorSection, CoordinatorSettings,
    RawConfigFile,
};
pub use validate::parse_duration;
