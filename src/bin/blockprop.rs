//! Command-line runner: loads a profile, runs a simulation and writes its
//! output files.

use std::{num::NonZeroUsize, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use blockprop_sim::prelude::*;

#[derive(Parser)]
#[command(name = "blockprop")]
#[command(about = "Simulates block propagation in a blockchain network")]
struct Cli {
    /// Name of the profile to load from the profiles directory.
    #[arg(long, default_value = blockprop_sim::config::DEFAULT_PROFILE)]
    properties: String,

    #[arg(long, default_value = "profiles")]
    profiles_dir: PathBuf,

    /// Directory receiving the output files.
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Seed of the random number generator.
    #[arg(long)]
    seed: Option<u64>,

    /// Run the network this many times on distinct random streams and print
    /// a summary table instead of writing output files.
    #[arg(long)]
    repeat: Option<NonZeroUsize>,

    /// Use proof of stake instead of proof of work.
    #[arg(long)]
    proof_of_stake: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let start = Instant::now();
    let config = SimulationConfig::profile(&cli.profiles_dir, &cli.properties)
        .with_context(|| format!("cannot load profile {:?}", cli.properties))?;

    let mut settings = Settings::default();
    if let Some(seed) = cli.seed {
        settings.seed = seed;
    }
    if cli.proof_of_stake {
        settings.consensus = ConsensusKind::ProofOfStake;
    }

    if let Some(repeat) = cli.repeat {
        let results = SimulationGroup::new(config, settings)
            .repeat_all(repeat)
            .run_all()?
            .all()
            .build();

        println!("{}", results);
    } else {
        let recorder = FileRecorder::create(&cli.output_dir, &cli.properties)
            .with_context(|| {
                format!("cannot create output directory {:?}", cli.output_dir)
            })?;

        let output = SimulationBuilder::new()
            .config(config)
            .settings(settings)
            .recorder(recorder)
            .build()?
            .run()?;

        let propagation = &output.results.propagation;
        info!(
            average_50 = propagation.average_50,
            average_90 = propagation.average_90,
            average_100 = propagation.average_100,
            orphans = output.average_orphans,
            output = %cli.output_dir.display(),
            "results written"
        );
    }

    info!("elapsed time: {:.4} secs", start.elapsed().as_secs_f64());

    Ok(())
}
