// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `shellmux`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "shellmux",
    version,
    about = "Run shell commands concurrently on a remote host over one shared SSH connection.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `$SHELLMUX_CONFIG`, else `Shellmux.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `SHELLMUX_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print what would run, but don't connect.
    #[arg(long)]
    pub dry_run: bool,

    /// Commands to run, in addition to the config's `[[command]]` entries.
    #[arg(value_name = "COMMAND")]
    pub commands: Vec<String>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_commands_are_collected() {
        let args = CliArgs::try_parse_from([
            "shellmux",
            "--config",
            "remote.toml",
            "--log-level",
            "debug",
            "uptime",
            "df -h",
        ])
        .unwrap();

        assert_eq!(args.config.as_deref(), Some("remote.toml"));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert_eq!(args.commands, vec!["uptime".to_string(), "df -h".to_string()]);
        assert!(!args.dry_run);
    }
}
