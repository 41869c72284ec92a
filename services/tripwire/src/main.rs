use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tripwire::{runner, Config};

#[derive(Debug, Parser)]
#[command(name = "tripwire")]
#[command(version, about = "Benchmark server-overload mitigation strategies")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a benchmark described by a config file.
    Run {
        /// Path to the YAML config file.
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => {
            let config = match Config::load(&config) {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(error = %err, "failed to load config");
                    std::process::exit(1);
                }
            };
            if let Err(err) = runner::run(config).await {
                tracing::error!(error = %err, "run failed");
                std::process::exit(1);
            }
        }
    }
}
