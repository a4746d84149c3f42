use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clean_probe::probe::engine::DEFAULT_TRANSFER_BYTES;
use clean_probe::probe::events;
use clean_probe::{
    DescriptorParser, DiscoveryMode, EngineConfig, ProbeEngine, ProbeEvent, ProbeReport,
    SessionEvent,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use uuid::Uuid;

/// A proxy endpoint and clean IP prober with cancellable sessions
#[derive(Parser)]
#[command(name = "clean-probe")]
#[command(about = "A proxy endpoint and clean IP prober with cancellable sessions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Session id for this batch (defaults to a random UUID)
    #[arg(long, global = true, env = "CLEAN_PROBE_SESSION")]
    session: Option<String>,

    /// Maximum simultaneous probes (defaults depend on the probe kind)
    #[arg(short = 'n', long, global = true)]
    concurrency: Option<usize>,

    /// Per-probe timeout in milliseconds (defaults depend on the probe kind)
    #[arg(long, global = true)]
    timeout: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Measure transport and TLS latency of share links
    Latency {
        /// File containing vless:// or vmess:// links, one per line
        input: PathBuf,
    },
    /// Measure download throughput through each link's address
    Throughput {
        /// File containing vless:// or vmess:// links, one per line
        input: PathBuf,
        /// Bytes to download per probe
        #[arg(short, long, default_value_t = DEFAULT_TRANSFER_BYTES)]
        bytes: u64,
    },
    /// Discover addresses that complete a TLS handshake
    Discover {
        /// Sample size: small, medium, large
        #[arg(short, long, default_value = "small")]
        mode: String,
    },
}

/// Counts accumulated while printing events
#[derive(Debug, Default)]
struct Summary {
    success: usize,
    failed: usize,
    found: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let session = cli
        .session
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let timeout = cli.timeout.map(Duration::from_millis);

    let (tx, rx) = events::channel();
    let mut config = EngineConfig::new();

    let (engine, handle) = match cli.command {
        Commands::Latency { input } => {
            if let Some(limit) = cli.concurrency {
                config = config.with_latency_concurrency(limit);
            }
            if let Some(t) = timeout {
                config = config.with_handshake_timeout(t);
            }
            let descriptors = load_descriptors(&input)?;
            let engine = ProbeEngine::with_config(config, tx);
            let handle = engine.start_latency_batch(descriptors, &session);
            (engine, handle)
        }
        Commands::Throughput { input, bytes } => {
            if let Some(limit) = cli.concurrency {
                config = config.with_throughput_concurrency(limit);
            }
            if let Some(t) = timeout {
                config = config.with_transfer_timeout(t);
            }
            let descriptors = load_descriptors(&input)?;
            let engine = ProbeEngine::with_config(config, tx);
            let handle = engine.start_throughput_batch(descriptors, &session, Some(bytes));
            (engine, handle)
        }
        Commands::Discover { mode } => {
            let mode: DiscoveryMode = mode.parse()?;
            if let Some(limit) = cli.concurrency {
                config = config.with_discovery_concurrency(limit);
            }
            if let Some(t) = timeout {
                config = config.with_discovery_timeout(t);
            }
            let engine = ProbeEngine::with_config(config, tx);
            let handle = engine.start_discovery_batch(mode, &session);
            (engine, handle)
        }
    };

    info!(session = %session, "batch started");

    // Ctrl-C cancels the session; the batch still runs to its completion event
    let canceller = engine.clone();
    let cancel_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(session = %cancel_session, "interrupted, cancelling session");
            canceller.cancel(&cancel_session);
        }
    });

    let summary = print_events(rx, cli.json).await?;
    handle.await?;

    if !cli.json {
        println!();
        println!(
            "Results: {} good, {} bad, {} found",
            summary.success, summary.failed, summary.found
        );
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn load_descriptors(input: &Path) -> Result<Vec<clean_probe::Descriptor>> {
    let descriptors = DescriptorParser::parse_file(input)
        .with_context(|| format!("Failed to read descriptors from {:?}", input))?;
    info!("Loaded {} descriptors from {:?}", descriptors.len(), input);
    if descriptors.is_empty() {
        warn!("No valid descriptors found in {:?}", input);
    }
    Ok(descriptors)
}

/// Print events until the batch completes
async fn print_events(mut rx: UnboundedReceiver<SessionEvent>, json: bool) -> Result<Summary> {
    let mut summary = Summary::default();

    while let Some(SessionEvent { event, .. }) = rx.recv().await {
        match &event {
            ProbeEvent::LatencyResult(report) | ProbeEvent::ThroughputResult(report) => {
                if report.is_success() {
                    summary.success += 1;
                } else {
                    summary.failed += 1;
                }
            }
            ProbeEvent::DiscoveryFound(_) => summary.found += 1,
            _ => {}
        }

        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        if matches!(event, ProbeEvent::BatchComplete { .. }) {
            break;
        }
    }

    Ok(summary)
}

fn print_event(event: &ProbeEvent) {
    match event {
        ProbeEvent::LatencyResult(report) => match &report.error_message {
            None => println!(
                "✓ {} tcp {} tls {}",
                label(report),
                format_ms(report.transport_latency_ms),
                format_ms(report.tls_latency_ms)
            ),
            Some(error) => println!("✗ {} {}", label(report), error),
        },
        ProbeEvent::ThroughputResult(report) => match (&report.error_message, report.throughput_mbps) {
            (None, Some(mbps)) => println!("✓ {} {:.2} MB/s", label(report), mbps),
            (error, _) => println!(
                "✗ {} {}",
                label(report),
                error.as_deref().unwrap_or("no measurement")
            ),
        },
        ProbeEvent::DiscoveryFound(candidate) => {
            println!("✓ {} ({:.0}ms)", candidate.address, candidate.latency_ms)
        }
        ProbeEvent::DiscoveryBatchStarted { total } => {
            println!("Probing {} candidate addresses", total)
        }
        ProbeEvent::DiscoveryProgress { processed, total } => {
            println!("Progress: {}/{}", processed, total)
        }
        ProbeEvent::BatchComplete { kind } => println!("{} batch complete", kind),
    }
}

fn label(report: &ProbeReport) -> String {
    let descriptor = &report.descriptor;
    if descriptor.name.is_empty() {
        descriptor.endpoint()
    } else {
        format!("{} [{}]", descriptor.endpoint(), descriptor.name)
    }
}

fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) if ms >= 0.0 => format!("{:.0}ms", ms),
        _ => "-".to_string(),
    }
}
