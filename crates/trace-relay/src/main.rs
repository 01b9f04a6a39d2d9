//! trace-relay binary entry point.
//!
//! Usage: trace-relay --config <destinations.json> [--input <traces.ndjson>]
//!
//! Reads one JSON trace payload per line (stdin by default) and delivers
//! each to every destination. EOF or Ctrl-C drains all pipelines.

use anyhow::Context;
use clap::Parser;
use relay_observability::{LogConfig, LogFormat};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, BufReader};
use trace_relay::{IngestStats, Relay, RelayConfig, SinkFactories};
use tracing::{info, warn};

/// trace-relay: buffered, retried delivery of trace records.
#[derive(Parser, Debug)]
#[command(name = "trace-relay")]
#[command(about = "Buffered, retried delivery of trace records to observability backends")]
struct Args {
    /// Destinations file (JSON).
    #[arg(long, env = "RELAY_CONFIG")]
    config: PathBuf,

    /// NDJSON input file. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error, or RUST_LOG syntax).
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Console log format (compact or json).
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,

    /// Append JSONL logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    relay_observability::init_with_config(LogConfig {
        service_name: "trace-relay".into(),
        default_level: args.log_level.clone(),
        format: args.log_format,
        log_path: args.log_file.clone(),
        also_stderr: false,
    })?;

    let config = RelayConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let factories = SinkFactories::with_builtins()?;
    let relay = Relay::from_config(&config, &factories)?;

    info!(destinations = relay.pipelines().len(), "Relay started");

    let input: Box<dyn AsyncBufRead + Send + Unpin> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut stats = IngestStats::default();
    let interrupted = tokio::select! {
        result = relay.ingest(input, &mut stats) => {
            if let Err(e) = result {
                warn!(error = %e, "Input read failed, shutting down");
            }
            false
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, draining...");
            true
        }
    };

    let mut undelivered = 0;
    for summary in relay.shutdown().await {
        if let Some(report) = summary.report {
            undelivered += report.undelivered;
            info!(
                destination = %summary.destination,
                delivered = report.delivered,
                undelivered = report.undelivered,
                timed_out = report.timed_out,
                "Destination drained"
            );
        }
    }

    info!(
        lines = stats.lines,
        accepted = stats.accepted,
        malformed = stats.malformed,
        rejected = stats.rejected,
        interrupted = interrupted,
        "Relay stopped"
    );

    if undelivered > 0 {
        anyhow::bail!("{undelivered} record(s) could not be delivered");
    }
    Ok(())
}
