//! lagscaled — the lagscale daemon.
//!
//! Loads scaler definitions from a TOML file and either serves them over
//! HTTP for an external control loop, or evaluates them once from a broker
//! snapshot and prints the decisions.
//!
//! # Usage
//!
//! ```text
//! lagscaled serve --config /etc/lagscale/lagscale.toml
//! lagscaled evaluate --config lagscale.toml --snapshot broker.json --passes 3
//! ```

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,lagscaled=debug,lagscale=debug";

#[derive(Parser)]
#[command(name = "lagscaled", about = "Kafka consumer-group lag autoscaling daemon")]
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
    /// Serve the HTTP API.
    Serve {
        /// Path to lagscale.toml.
        #[arg(long)]
        config: PathBuf,

        /// Serve from a broker snapshot file instead of a live cluster.
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Override `daemon.listen`.
        #[arg(long)]
        listen: Option<String>,
    },

    /// Evaluate scalers against a broker snapshot and print the decisions.
    Evaluate {
        /// Path to lagscale.toml.
        #[arg(long)]
        config: PathBuf,

        /// Broker snapshot (JSON).
        #[arg(long)]
        snapshot: PathBuf,

        /// Only evaluate this scaler.
        #[arg(long)]
        scaler: Option<String>,

        /// Consecutive passes per scaler.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        passes: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            snapshot,
            listen,
        } => commands::serve(&config, snapshot.as_deref(), listen).await,
        Command::Evaluate {
            config,
            snapshot,
            scaler,
            passes,
        } => {
            let reports = commands::evaluate(&config, &snapshot, scaler.as_deref(), passes).await?;
            for report in &reports {
                println!("{}", serde_json::to_string(report)?);
            }
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
