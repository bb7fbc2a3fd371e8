// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{ConfigFile, CoordinatorSection, CoordinatorSettings, RawConfigFile};
use crate::errors::{Result, ShellmuxError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ShellmuxError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        let coordinator = coordinator_settings(&raw.coordinator)?;
        Ok(ConfigFile::new_unchecked(raw.connection, coordinator, raw.commands))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_connection(cfg)?;
    validate_commands(cfg)?;
    Ok(())
}

fn validate_connection(cfg: &RawConfigFile) -> Result<()> {
    let conn = &cfg.connection;
    if conn.host.trim().is_empty() {
        return Err(ShellmuxError::ConfigError(
            "[connection].host must not be empty".to_string(),
        ));
    }
    if conn.port == Some(0) {
        return Err(ShellmuxError::ConfigError(
            "[connection].port must be >= 1 (got 0)".to_string(),
        ));
    }
    if conn.ssh_program.trim().is_empty() {
        return Err(ShellmuxError::ConfigError(
            "[connection].ssh_program must not be empty".to_string(),
        ));
    }
    if let Some(opt) = conn.options.iter().find(|o| !o.contains('=')) {
        return Err(ShellmuxError::ConfigError(format!(
            "[connection].options entry '{opt}' must look like Key=value"
        )));
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for (idx, command) in cfg.commands.iter().enumerate() {
        if command.cmd.trim().is_empty() {
            return Err(ShellmuxError::ConfigError(format!(
                "[[command]] #{} has an empty `cmd`",
                idx + 1
            )));
        }
    }
    Ok(())
}

fn coordinator_settings(section: &CoordinatorSection) -> Result<CoordinatorSettings> {
    let refresh_interval = positive_duration("refresh_interval", &section.refresh_interval)?;
    let poll_timeout = positive_duration("poll_timeout", &section.poll_timeout)?;

    if section.inbound_queue == 0 {
        return Err(ShellmuxError::ConfigError(
            "[coordinator].inbound_queue must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok(CoordinatorSettings {
        refresh_interval,
        poll_timeout,
        inbound_queue: section.inbound_queue,
    })
}

fn positive_duration(key: &str, value: &str) -> Result<Duration> {
    let dur = parse_duration(value)
        .map_err(|e| ShellmuxError::ConfigError(format!("[coordinator].{key}: {e}")))?;
    if dur.is_zero() {
        return Err(ShellmuxError::ConfigError(format!(
            "[coordinator].{key} must be greater than zero"
        )));
    }
    Ok(dur)
}

/// Parse durations like `"50ms"`, `"1s"`, `"2m"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", s)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, or m",
            unit
        )),
    }
}
