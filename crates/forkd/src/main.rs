//! forkd — the forkgrid daemon.
//!
//! One binary plays both roles. `forkd master` forks copies of itself in
//! the hidden `worker` mode, supervises them, balances the application
//! port across them, and serves `/health` and `/metrics`.
//!
//! # Usage
//!
//! ```text
//! forkd master --config forkgrid.toml
//! MAX_WORKERS=8 ENABLE_STICKY_SESSIONS=true forkd master --log-format json
//! ```

mod master_mode;
mod signals;
mod worker_mode;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use forkgrid_core::ClusterConfig;

#[derive(Parser)]
#[command(name = "forkd", about = "forkgrid process cluster manager")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the cluster master.
    Master {
        /// TOML configuration file. Environment variables override it.
        #[arg(long, env = "FORKGRID_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Run as a worker under a master. Not meant to be started by hand.
    #[command(hide = true)]
    Worker {
        /// Interval between resource reports, e.g. "5s" or "500ms".
        #[arg(long, default_value = "5s", value_parser = parse_interval)]
        metrics_interval: Duration,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Master { config } => {
            let config = ClusterConfig::load(config.as_deref())?;
            master_mode::run_master(config).await
        }
        Command::Worker { metrics_interval } => worker_mode::run_worker(metrics_interval).await,
    }
}

/// Logs go to stderr; a worker's stdout carries IPC.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forkd=debug,forkgrid=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    match forkgrid_core::config::parse_duration(s) {
        Some(d) if !d.is_zero() => Ok(d),
        Some(_) => Err("interval must be non-zero".into()),
        None => Err(format!("invalid duration {s:?}")),
    }
}
