//! BagStore CLI
//!
//! Maintenance tools for on-disk BagStore instances.
//!
//! # Commands
//!
//! - `inspect` - Show bags, their sizes and index state
//! - `verify` - Check that every record of a bag decodes
//! - `rebuild` - Rebuild every index of a bag from its records

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BagStore command-line maintenance tools.
#[derive(Parser)]
#[command(name = "bagstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the instance directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bags, their sizes and index state
    Inspect {
        /// Only inspect this bag
        #[arg(short, long)]
        bag: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check that every record decodes to an entity with an id
    Verify {
        /// Only verify this bag (all bags by default)
        #[arg(short, long)]
        bag: Option<String>,
    },

    /// Rebuild every index of a bag from its records
    Rebuild {
        /// Bag to rebuild
        #[arg(short, long)]
        bag: String,

        /// Number of rebuild workers
        #[arg(short, long, default_value = "2")]
        workers: usize,
    },

    /// Show version information
    Version,
}

/// `--verbose` forces debug output, otherwise `RUST_LOG` applies with an
/// `info` default.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose))
        .init();

    match cli.command {
        Commands::Inspect { bag, format } => {
            let path = cli.path.ok_or("Instance path required for inspect")?;
            commands::inspect::run(&path, bag.as_deref(), &format)?;
        }
        Commands::Verify { bag } => {
            let path = cli.path.ok_or("Instance path required for verify")?;
            commands::verify::run(&path, bag.as_deref())?;
        }
        Commands::Rebuild { bag, workers } => {
            let path = cli.path.ok_or("Instance path required for rebuild")?;
            commands::rebuild::run(&path, &bag, workers)?;
        }
        Commands::Version => {
            println!("BagStore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BagStore Core v{}", bagstore_core::VERSION);
        }
    }

    Ok(())
}
