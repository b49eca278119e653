//! SIMS Node - host simulator for the incident mesh
//!
//! This binary runs several mesh routers on an in-memory air medium:
//! - A line topology of `--nodes` routers with optional link loss
//! - The phone bridge on node 0 with a scripted phone attached
//! - Periodic incident reports from the last node
//!
//! Final counters are printed to stdout as JSON.

mod sim;
mod store;

use anyhow::Context;
use clap::Parser;
use sims_core::{Clock, MemoryStore, MeshConfig, ParamStore, SystemClock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use sim::Simulation;
use store::JsonFileStore;

/// Main-loop period
const TICK: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "sims-node")]
#[command(about = "Simulated SIMS LoRa mesh with a phone bridge")]
struct Args {
    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of nodes in the line
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=64))]
    nodes: u16,

    /// How long to run (e.g. "30s", "5m")
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Probability that a single delivery is lost
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Directory for persisted node parameters (in memory when absent)
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    anyhow::ensure!(
        (0.0..=1.0).contains(&args.loss),
        "--loss must be between 0 and 1"
    );

    let config = load_config(args.config.as_deref())?;
    info!(
        region = ?config.radio.region,
        frequency_hz = config.radio.region.frequency_hz(),
        sf = config.radio.spreading_factor,
        bandwidth_khz = config.radio.bandwidth_khz,
        sync_word = format_args!("{:#04x}", config.radio.sync_word.value()),
        "Radio profile"
    );

    let stores = open_stores(args.state_dir.as_deref(), args.nodes as usize)?;
    let clock = Arc::new(SystemClock::new());
    let mut sim = Simulation::new(&config, stores, clock.clone())?;
    sim.set_loss(args.loss);

    info!(
        nodes = args.nodes,
        duration = %humantime::format_duration(args.duration),
        loss = args.loss,
        "Starting simulation"
    );

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = tokio::time::sleep(args.duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = ticker.tick() => sim.step(clock.monotonic_ms()),
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let report = sim.report(clock.monotonic_ms());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Read a JSON configuration, or the defaults when no path is given
fn load_config(path: Option<&Path>) -> anyhow::Result<MeshConfig> {
    let config: MeshConfig = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => MeshConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// One parameter store per node
fn open_stores(dir: Option<&Path>, nodes: usize) -> anyhow::Result<Vec<Box<dyn ParamStore>>> {
    let Some(dir) = dir else {
        return Ok((0..nodes)
            .map(|_| Box::new(MemoryStore::new()) as Box<dyn ParamStore>)
            .collect());
    };

    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    (0..nodes)
        .map(|index| -> anyhow::Result<Box<dyn ParamStore>> {
            let store = JsonFileStore::open(dir.join(format!("node-{}.json", index)))?;
            Ok(Box::new(store) as Box<dyn ParamStore>)
        })
        .collect()
}
