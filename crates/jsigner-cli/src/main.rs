//! jsigner - expedient signing robot
//!
//! Lists the personal certificates, prints the browser auto-selection policy
//! for one of them, and runs signing jobs in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jsigner_core::{Category, SignerConfig, Speed};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// jsigner - signs pending expedients on the administrative portal
#[derive(Parser, Debug)]
#[command(name = "jsigner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (defaults apply when missing)
    #[arg(short, long, default_value = "jsigner.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List valid certificates of the personal store
    Certs {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Sign every pending expedient of a category
    Run {
        /// Thumbprint of the certificate to sign with
        #[arg(short, long)]
        thumbprint: String,

        /// Listing to work through (kd or kc)
        #[arg(short = 'k', long)]
        category: Category,

        /// Delay preset (fast, medium, slow)
        #[arg(short, long, default_value = "medium")]
        speed: Speed,

        /// Run the browser without a window
        #[arg(long)]
        headless: bool,
    },

    /// Print the certificate auto-selection policy for a certificate
    Policy {
        /// Thumbprint of the certificate
        #[arg(short, long)]
        thumbprint: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = SignerConfig::load_or_default(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;

    match cli.command {
        Commands::Certs { json } => commands::certs::list(&config, json).await,
        Commands::Run {
            thumbprint,
            category,
            speed,
            headless,
        } => commands::run::run(config, thumbprint, category, speed, headless).await,
        Commands::Policy { thumbprint } => commands::policy::print(&config, &thumbprint).await,
    }
}
