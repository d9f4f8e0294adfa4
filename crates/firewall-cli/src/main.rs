//! Firewall CLI
//!
//! Runs the packet-filtering firewall for a fixed duration and reports
//! throughput.
//!
//! # Usage
//!
//! ```bash
//! firewall serial
//! firewall pipeline --head-workers 8 --cache-miss-workers 4
//! firewall --config firewall.json --format json pipeline --duration-ms 2000
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use firewall_dataplane::{run, FirewallConfig, RunMode, TrafficGenerator};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod output;

#[derive(Parser)]
#[command(name = "firewall")]
#[command(version)]
#[command(about = "Concurrent packet-filtering firewall throughput simulator", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, short, env = "FIREWALL_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Single worker thread, no queues
    Serial {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Dispatcher, head workers and cache-miss workers
    Pipeline {
        #[command(flatten)]
        overrides: Overrides,

        /// Head workers
        #[arg(long)]
        head_workers: Option<usize>,

        /// Cache-miss workers
        #[arg(long)]
        cache_miss_workers: Option<usize>,

        /// Slots per queue
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// Packets allowed in flight
        #[arg(long)]
        in_flight_budget: Option<usize>,
    },
}

#[derive(Args)]
struct Overrides {
    /// Run length in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Addresses are drawn from [0, 2^address_log)
    #[arg(long)]
    address_log: Option<u32>,

    /// Traffic generator seed
    #[arg(long, env = "FIREWALL_SEED")]
    seed: Option<u64>,
}

impl Overrides {
    fn apply(&self, config: &mut FirewallConfig) {
        if let Some(duration_ms) = self.duration_ms {
            config.pipeline.duration_ms = duration_ms;
        }
        if let Some(address_log) = self.address_log {
            config.traffic.address_log = address_log;
        }
        if let Some(seed) = self.seed {
            config.traffic.seed = seed;
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => FirewallConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => FirewallConfig::default(),
    };

    let mode = match &cli.command {
        Commands::Serial { overrides } => {
            overrides.apply(&mut config);
            RunMode::Serial
        }
        Commands::Pipeline {
            overrides,
            head_workers,
            cache_miss_workers,
            queue_capacity,
            in_flight_budget,
        } => {
            overrides.apply(&mut config);
            if let Some(n) = head_workers {
                config.pipeline.head_workers = *n;
            }
            if let Some(m) = cache_miss_workers {
                config.pipeline.cache_miss_workers = *m;
            }
            if let Some(capacity) = queue_capacity {
                config.pipeline.queue_capacity = *capacity;
            }
            if let Some(budget) = in_flight_budget {
                config.pipeline.in_flight_budget = *budget;
            }
            RunMode::Pipelined
        }
    };

    config.validate().context("invalid configuration")?;
    tracing::info!("firewall v{} ({} mode)", env!("CARGO_PKG_VERSION"), mode);

    let source = TrafficGenerator::new(config.traffic.clone());
    let report = run(mode, &config, source).context("run failed")?;
    cli.format.print(&report);

    Ok(())
}
