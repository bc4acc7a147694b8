use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use varship::kernel::slot::SlotSpec;
use varship::source::decode_sample;
use varship::{Config, Pipeline, ShutdownSummary};

/// Ships variable-observation samples to a message broker.
#[derive(Parser)]
#[command(name = "varship", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NDJSON sample stream. Reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Logging verbosity, overrides the config file.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    pub fn full() -> String {
        format!(
            "{} ({}/{})",
            RELEASE,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("varship {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)?;

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {}", level))?;
    // Logs go to stderr so stdout carries only the summary.
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = version::RELEASE, name = %cfg.name, "starting varship");

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let summary = rt.block_on(run(cfg, cli.input))?;

    print_summary(&summary);
    if !summary.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cfg: Config, input: Option<PathBuf>) -> Result<ShutdownSummary> {
    let specs = SlotSpec::load_points(&cfg.slots_path)
        .with_context(|| format!("loading observation points from {}", cfg.slots_path.display()))?;
    tracing::info!(slots = specs.len(), "observation points loaded");

    let brokers = cfg.brokers()?;
    let mut pipeline = Pipeline::start(cfg.pipeline_config(), specs, |id| {
        Arc::clone(&brokers[id])
    })?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let streamed = pump(&mut pipeline, reader, &shutdown).await;

    // End-of-stream is signalled even when the input failed part-way.
    let summary = pipeline
        .signal_end_of_stream()
        .await
        .context("shutting down pipeline")?;

    streamed?;
    tracing::info!("varship stopped");
    Ok(summary)
}

/// Feeds decoded lines into the pipeline until EOF or a shutdown signal.
async fn pump(
    pipeline: &mut Pipeline,
    reader: Box<dyn AsyncRead + Unpin + Send>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = lines.next_line() => line.context("reading sample stream")?,
        };

        let Some(line) = line else {
            tracing::info!("sample stream ended");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_sample(&line) {
            // A signal while the queue is full abandons the pending report.
            Ok(sample) => tokio::select! {
                biased;
                ingested = pipeline.ingest(sample) => ingested?,
                _ = shutdown.cancelled() => {
                    tracing::warn!("shutdown requested while the report queue was full, pending report dropped");
                    return Ok(());
                }
            },
            Err(e) => pipeline.reject(e),
        }
    }
}

fn spawn_signal_listener(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }
        shutdown.cancel();
    });
    Ok(())
}

fn print_summary(summary: &ShutdownSummary) {
    let stats = &summary.aggregator;
    println!(
        "aggregator: ingested={} dropped={} reports={} sentinels={}",
        stats.ingested, stats.dropped, stats.data_reports, stats.sentinels
    );
    for worker in &summary.workers {
        println!(
            "worker {}: published={} acknowledged={} failures={} end_of_stream={} outcome={:?}",
            worker.id,
            worker.state.published,
            worker.state.acknowledged,
            worker.state.failures,
            worker.state.end_of_stream_seen,
            worker.outcome,
        );
    }
    for id in &summary.unjoined {
        println!("worker {}: did not stop before the join timeout", id);
    }
    if summary.queue_lost {
        println!("report queue was lost during shutdown");
    }
    if summary.missing_sentinels > 0 {
        println!(
            "{} worker(s) never received end-of-stream",
            summary.missing_sentinels
        );
    }
}
