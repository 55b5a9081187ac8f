//! rce - client for the remote code execution daemon.
//!
//! Uploads files, spawns a remote command, streams its stdio, and exits
//! with the remote exit code. With `--with-stdin` on a terminal, the remote
//! side gets a PTY sized like the local one and the local terminal runs in
//! raw mode for the duration of the session.

mod client;

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use client::SpawnOptions;

/// Remote code execution client.
#[derive(Parser, Debug)]
#[command(name = "rce")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Remote server address (host:port; a bare `:port` means localhost)
    #[arg(long)]
    address: String,

    /// Forward local stdin to the remote process
    #[arg(long)]
    with_stdin: bool,

    /// Environment variable for the remote process
    #[arg(long = "env", value_name = "KEY=VALUE")]
    envs: Vec<String>,

    /// Upload a local file before starting
    #[arg(long = "upload", value_name = "LOCAL:REMOTE")]
    uploads: Vec<String>,

    /// Write the remote process identifier to this file
    #[arg(long, value_name = "PATH")]
    pid_file: Option<PathBuf>,

    /// Remote working directory; omit for a server-allocated temp dir
    #[arg(long, value_name = "PATH")]
    dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Command and arguments to run remotely, after `--`
    #[arg(last = true, required = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("rce: {err:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let options = spawn_options(cli)?;
    let interactive = options.with_stdin && std::io::stdin().is_terminal();

    let _raw = interactive.then(RawModeGuard::enable).transpose()?;

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install signal handler")?;
    let mut pid = None;
    let outcome = tokio::select! {
        result = client::run_spawn(&options, interactive, &mut pid) => result,
        _ = sigterm.recv() => Ok(-1),
    };

    // Mirror the session end with a best-effort remote kill; a process that
    // already exited comes back as "process not found" and is ignored.
    if let Some(id) = &pid {
        if let Err(err) = client::kill(&options.address, id).await {
            debug!(id = %id, error = format!("{err:#}"), "remote kill skipped");
        }
    }

    outcome
}

fn spawn_options(cli: Cli) -> Result<SpawnOptions> {
    let mut command = cli.command.into_iter();
    let Some(program) = command.next() else {
        bail!("no command given");
    };
    Ok(SpawnOptions {
        address: cli.address,
        command: program,
        args: command.collect(),
        envs: cli
            .envs
            .iter()
            .map(|raw| client::parse_env(raw))
            .collect::<Result<_>>()?,
        uploads: cli
            .uploads
            .iter()
            .map(|raw| client::parse_upload(raw))
            .collect::<Result<_>>()?,
        dir: cli.dir,
        with_stdin: cli.with_stdin,
        pid_file: cli.pid_file,
    })
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Puts the local terminal into raw mode and restores it on drop, so every
/// exit path, including errors, leaves the terminal usable.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode().context("failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
    }
}
