//! netlens CLI
//!
//! Command-line tool for the netlens inspector. Replays recorded HTTP task
//! traces and prints the DevTools network events they produce.

use clap::{Parser, Subcommand};
use netlens_core::{InspectorConfig, StdoutEventSink};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod replay;
mod trace;

/// netlens - DevTools network events from HTTP task lifecycles
#[derive(Parser, Debug)]
#[command(name = "netlens")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a JSON-lines trace of task callbacks
    Replay {
        /// Trace file, one recorded callback per line
        trace: PathBuf,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,

        /// Inspector configuration file (JSON)
        #[arg(short, long, env = "NETLENS_CONFIG")]
        config: Option<PathBuf>,

        /// Override the per-task body capture cap
        #[arg(long)]
        max_body_bytes: Option<u64>,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn load_config(
    path: Option<&PathBuf>,
    max_body_bytes: Option<u64>,
) -> Result<InspectorConfig, String> {
    let config = match path {
        Some(path) => InspectorConfig::from_file(path)?,
        None => InspectorConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(max) = max_body_bytes {
        config = config.with_max_body_bytes(max);
    }
    Ok(config)
}

fn main() -> ExitCode {
    // Logs go to stderr; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Replay {
            trace,
            format,
            config,
            max_body_bytes,
        } => {
            let config = match load_config(config.as_ref(), max_body_bytes) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };
            let records = match trace::load_trace(&trace) {
                Ok(records) => records,
                Err(e) => {
                    eprintln!("Error: {e}");
                    return ExitCode::FAILURE;
                }
            };

            tracing::info!("Replaying {} record(s) from {}", records.len(), trace.display());

            let sink = Arc::new(StdoutEventSink::new(matches!(format, OutputFormat::Json)));
            match replay::run_replay(records, config, &sink) {
                Ok(_) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
