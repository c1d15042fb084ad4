use clap::Parser;
use minesim::{Simulator, report};
use minesim_config::SimConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minesim")]
#[command(
    about = "Discrete-event simulator for a proof-of-work peer network",
    long_about = None
)]
struct Cli {
    /// JSON configuration file (created with defaults when missing).
    /// Falls back to ~/.minesim/config.json.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the configured PRNG seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Override the configured horizon, in simulated seconds.
    #[arg(long)]
    simulation_time: Option<f64>,
    /// Override the configured results directory.
    #[arg(long)]
    results_dir: Option<String>,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SimConfig::load_from(path),
        None => SimConfig::load(),
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if let Some(simulation_time) = cli.simulation_time {
        config.simulation_time = simulation_time;
    }
    if let Some(results_dir) = cli.results_dir {
        config.results_dir = results_dir;
    }

    let mut sim = match Simulator::new(config) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Failed to set up simulation: {e}");
            std::process::exit(1);
        }
    };

    println!("Simulation started.");
    sim.run();

    for summary in report::summarize(&sim) {
        println!(
            "node {:>3}: tip position {}, {} blocks in store, {} pending txns",
            summary.node_id,
            summary.tip_position,
            summary.blocks_in_store,
            summary.pending_txns
        );
    }

    match report::write_reports(&sim) {
        Ok(dir) => println!("Reports written to {}", dir.display()),
        Err(e) => {
            eprintln!("Failed to write reports: {e}");
            std::process::exit(1);
        }
    }
    println!("Simulation ended successfully.");
}
