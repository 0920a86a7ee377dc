//! peerlink-sim: replay a scenario against the peer node control plane.

mod scenario;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use peerlink_node::{init_logging, LogFormat, NodeConfig};

use crate::scenario::{Scenario, Simulator};

#[derive(Parser)]
#[command(name = "peerlink-sim", about = "Replay link and packet events against a peer node control plane")]
struct Cli {
    /// Scenario file (JSON).
    scenario: PathBuf,

    /// Path to a TOML configuration file.
    #[arg(long, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Log output: "human" or "json". Overrides the config file.
    #[arg(long, env = "PEERLINK_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log filter, e.g. "info" or "debug,peerlink_node=trace".
    #[arg(long, env = "PEERLINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the Prometheus metrics after the report.
    #[arg(long)]
    metrics: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }
    let format: LogFormat = config.log_format.parse()?;
    init_logging(format, &config.log_level)?;

    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading scenario {}", cli.scenario.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw).context("parsing scenario")?;

    let print_metrics = cli.metrics || config.enable_metrics;
    let sim = Simulator::new(config);
    let report = sim.run(&scenario)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if print_metrics {
        print!("{}", sim.manager().metrics().encode_text());
    }
    sim.manager().stop();
    tracing::info!("scenario complete");
    Ok(())
}
