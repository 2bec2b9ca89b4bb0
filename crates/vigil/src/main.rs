//! vigil — standalone health supervisor.
//!
//! Loads subjects from a TOML file, probes them, and reports the
//! aggregated health as JSON.
//!
//! # Usage
//!
//! ```text
//! vigil check --config vigil.toml --rounds 3
//! vigil validate --config vigil.toml
//! ```
//!
//! `check` exits 0 when healthy, 1 when degraded, 2 otherwise.

mod config;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::info;

use vigil_core::{ProcessState, Status};

use crate::config::VigilConfig;
use crate::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil health supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe all configured subjects and print the aggregated health.
    Check {
        /// Path to the TOML config file.
        #[arg(long, default_value = "vigil.toml")]
        config: PathBuf,

        /// Lifecycle state of the supervised process.
        #[arg(long, value_enum, default_value = "running")]
        process_state: ProcessArg,

        /// Operator status override (anything but HEALTHY degrades).
        #[arg(long)]
        custom_status: Option<String>,

        /// Number of probe rounds.
        #[arg(long, default_value = "1")]
        rounds: u32,
    },
    /// Load and validate the config file without probing.
    Validate {
        #[arg(long, default_value = "vigil.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProcessArg {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl From<ProcessArg> for ProcessState {
    fn from(arg: ProcessArg) -> Self {
        match arg {
            ProcessArg::Stopped => ProcessState::Stopped,
            ProcessArg::Starting => ProcessState::Starting,
            ProcessArg::Running => ProcessState::Running,
            ProcessArg::Stopping => ProcessState::Stopping,
            ProcessArg::Failed => ProcessState::Failed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,vigil=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check {
            config,
            process_state,
            custom_status,
            rounds,
        } => run_check(config, process_state.into(), custom_status, rounds).await,
        Command::Validate { config } => {
            let loaded = VigilConfig::from_file(&config)?;
            loaded.validate()?;
            info!(path = ?config, subjects = loaded.subjects.len(), "config valid");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_check(
    path: PathBuf,
    process_state: ProcessState,
    custom_status: Option<String>,
    rounds: u32,
) -> anyhow::Result<ExitCode> {
    let config = VigilConfig::from_file(&path)?;
    let mut supervisor = Supervisor::from_config(&config, process_state)?;
    if let Some(status) = custom_status {
        supervisor.set_custom_status(status);
    }
    info!(path = ?path, subjects = config.subjects.len(), rounds, "vigil check starting");

    // ── Shutdown signal ────────────────────────────────────────

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    supervisor.run(rounds.max(1), cancel).await;

    let health = supervisor.health();
    println!("{}", serde_json::to_string_pretty(health)?);

    Ok(exit_code(health.status()))
}

fn exit_code(status: Status) -> ExitCode {
    match status {
        Status::Healthy => ExitCode::SUCCESS,
        Status::Degraded => ExitCode::from(1),
        Status::Unhealthy | Status::Unknown => ExitCode::from(2),
    }
}
