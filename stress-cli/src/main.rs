//! # balloon-stress
//!
//! Memory-balloon stress test for a QEMU guest.
//!
//! ## Commands
//!
//! - `run`: Run the stress loop against the configured guest
//! - `validate`: Load and check the config file without touching the guest
//!
//! ## Example
//!
//! ```bash
//! # Check the config
//! balloon-stress --config vm1.toml validate
//!
//! # Short reproducible run
//! balloon-stress --config vm1.toml run --repeat-times 20 --seed 7
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{run, validate};
use config::{Config, Overrides};

/// Memory-balloon stress test for a QEMU guest.
#[derive(Parser, Debug)]
#[command(name = "balloon-stress")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the run configuration file
    #[arg(long, short, global = true, default_value = "balloon-stress.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the stress test
    Run {
        /// Number of balloon adjustments
        #[arg(long)]
        repeat_times: Option<u32>,

        /// Seconds the workload may run before it is restarted
        #[arg(long)]
        time_for_video: Option<f64>,

        /// Seed for balloon target selection
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Validate the config file and print the resolved settings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = Config::from_file(&cli.config)?;
    tracing::debug!("Loaded config from {}", cli.config.display());

    match cli.command {
        Commands::Run {
            repeat_times,
            time_for_video,
            seed,
        } => {
            config.apply(&Overrides {
                repeat_times,
                time_for_video,
                seed,
            });
            config.validate()?;
            run::run(config).await?;
        }
        Commands::Validate => {
            config.validate()?;
            validate::run(&cli.config, &config)?;
        }
    }

    Ok(())
}

/// Set up tracing subscriber for run logging.
fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .init();
}
