use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use stripeset_core::{observability, StripesetResult};

mod config;
mod simulate;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "stripeset")]
#[command(about = "Drive an erasure-coded storage set against simulated nodes", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a concurrent workload against a simulated set
    Simulate {
        /// Files the workload spreads over
        #[arg(long)]
        files: Option<usize>,

        /// Operations issued per file
        #[arg(long)]
        operations: Option<usize>,

        /// Base node latency in milliseconds
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Nodes that never answer (comma-separated indices)
        #[arg(long, value_delimiter = ',')]
        unreachable: Vec<usize>,

        /// Nodes that answer with I/O errors (comma-separated indices)
        #[arg(long, value_delimiter = ',')]
        failing: Vec<usize>,

        /// Nodes reported down before the run (comma-separated indices)
        #[arg(long, value_delimiter = ',')]
        down: Vec<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Print as JSON instead of TOML
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> StripesetResult<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            files,
            operations,
            latency_ms,
            unreachable,
            failing,
            down,
            json,
        } => {
            let simulation = &mut config.simulation;
            if let Some(files) = files {
                simulation.files = files;
            }
            if let Some(operations) = operations {
                simulation.operations = operations;
            }
            if let Some(ms) = latency_ms {
                simulation.latency = Duration::from_millis(ms);
            }
            simulation.unreachable.extend(unreachable);
            simulation.failing.extend(failing);
            simulation.down.extend(down);
            config.validate()?;

            observability::init_tracing(&config.stripeset.logging)?;

            let summary = simulate::run(&config.stripeset, &config.simulation).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                summary.print();
            }
        }
        Commands::Config { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}
