//! Feedback Coordinator - fuses subsystem feedback into one trading action
//!
//! # WARNING
//! - The coordinator only decides. Trade execution lives elsewhere.
//! - Emergency mode stops trading until the next cycle says otherwise.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

// Use the library crate
use feedback_coordinator::cli::commands;
use feedback_coordinator::config::Config;

/// Feedback Coordinator - autonomous control core
#[derive(Parser)]
#[command(name = "coordinator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml", env = "COORD_CONFIG")]
    config: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordination (until Ctrl-C)
    Run {
        /// Run a single cycle and print the decision
        #[arg(long)]
        once: bool,
    },

    /// Show current configuration (endpoints masked)
    Config,

    /// List decision rules in priority order
    Rules,

    /// Probe the configured health endpoints
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs)?;

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run { once } => commands::run(&config, once).await,
        Commands::Config => commands::show_config(&config),
        Commands::Rules => commands::rules(&config),
        Commands::Probe => commands::probe(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("feedback_coordinator=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }

    Ok(())
}
