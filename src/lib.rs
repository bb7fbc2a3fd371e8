// src/lib.rs

pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod process;
pub mod transport;
pub mod types;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, default_config_path, load_and_validate};
use crate::engine::spawn_coordinator;
use crate::transport::OpenSshTransport;
use crate::types::{OutputStream, ProcessId, ProcessUpdate, Termination};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the shared ssh connection
/// - the coordinator thread
/// - Ctrl-C handling
///
/// and prints every update as it arrives. Returns the process exit code:
/// the highest exit status among the commands (1 for anything that did not
/// end with a plain status, or failed to launch).
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args
        .config
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;

    let commands: Vec<String> = cfg
        .commands
        .iter()
        .map(|c| c.cmd.clone())
        .chain(args.commands.iter().cloned())
        .collect();

    if args.dry_run {
        print_dry_run(&cfg, &commands);
        return Ok(0);
    }
    if commands.is_empty() {
        return Err(anyhow!(
            "nothing to run: pass commands on the command line or add [[command]] entries"
        ));
    }

    let connection = cfg.connection.clone();
    let runtime = Handle::current();
    let transport =
        tokio::task::spawn_blocking(move || OpenSshTransport::connect(&connection, runtime))
            .await
            .context("joining ssh connect task")??;

    let (handle, coordinator) = spawn_coordinator(transport, &cfg.coordinator)
        .context("starting coordinator thread")?;

    // Ctrl-C → graceful shutdown.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            handle.shutdown().await;
        });
    }

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<ProcessUpdate>();
    let caller = Arc::new(updates_tx);

    let mut exit_code = 0;
    let mut running: BTreeMap<ProcessId, String> = BTreeMap::new();
    for cmd in commands {
        match handle.submit(cmd.clone(), caller.clone()).await {
            Ok(id) => {
                info!(process_id = id, cmd = %cmd, "submitted");
                running.insert(id, cmd);
            }
            Err(e) => {
                error!(cmd = %cmd, error = %e, "launch failed");
                exit_code = exit_code.max(1);
            }
        }
    }
    // Only the registered processes keep the update channel open now.
    drop(caller);

    while let Some(update) = updates_rx.recv().await {
        print_update(&update);
        if let Some(status) = update.exit_status {
            running.remove(&update.process_id);
            exit_code = exit_code.max(exit_code_for(&update, status));
        }
    }

    if !running.is_empty() {
        warn!(ids = ?running.keys().collect::<Vec<_>>(), "commands never reported completion");
        exit_code = exit_code.max(1);
    }

    handle.shutdown().await;
    drop(handle);
    let outcome = tokio::task::spawn_blocking(move || coordinator.join())
        .await
        .context("joining coordinator thread")?
        .map_err(|_| anyhow!("coordinator thread panicked"))?;
    if let Err(e) = outcome {
        error!(error = %e, "coordinator failed");
        exit_code = exit_code.max(1);
    }

    debug!(exit_code, "all commands finished");
    Ok(exit_code)
}

fn exit_code_for(update: &ProcessUpdate, status: i32) -> i32 {
    match update.termination {
        Some(Termination::Exited(_)) | Some(Termination::Signaled { .. }) => status.clamp(0, 255),
        _ => 1,
    }
}

fn print_update(update: &ProcessUpdate) {
    let id = update.process_id;
    for chunk in &update.chunks {
        for line in chunk.text.lines() {
            match chunk.stream {
                OutputStream::Stdout => println!("[{id}] {line}"),
                OutputStream::Stderr => eprintln!("[{id}] {line}"),
            }
        }
    }

    if let (Some(status), Some(termination)) = (update.exit_status, &update.termination) {
        match termination {
            Termination::Exited(_) => println!("[{id}] exit {status}"),
            Termination::Signaled { signal, .. } => {
                println!("[{id}] exit {status} (signal {signal})")
            }
            Termination::ChannelClosed => println!("[{id}] exit {status} (channel closed)"),
            Termination::TransportFailed(reason) => {
                println!("[{id}] exit {status} (connection failed: {reason})")
            }
        }
    }
}

/// Simple dry-run output: connection, timings and commands.
fn print_dry_run(cfg: &ConfigFile, commands: &[String]) {
    println!("shellmux dry-run");
    println!("  connection.destination = {}", cfg.connection.destination());
    if let Some(port) = cfg.connection.port {
        println!("  connection.port = {port}");
    }
    println!("  connection.ssh_program = {}", cfg.connection.ssh_program);
    if !cfg.connection.options.is_empty() {
        println!("  connection.options = {:?}", cfg.connection.options);
    }
    println!(
        "  coordinator.refresh_interval = {:?}",
        cfg.coordinator.refresh_interval
    );
    println!("  coordinator.poll_timeout = {:?}", cfg.coordinator.poll_timeout);
    println!();

    println!("commands ({}):", commands.len());
    for cmd in commands {
        println!("  - {cmd}");
    }

    debug!("dry-run complete (no connection)");
}
