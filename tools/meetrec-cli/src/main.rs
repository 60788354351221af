//! meetrec CLI: synthetic recordings and store inspection.
//!
//! Usage:
//!   meetrec record [OPTIONS]   Record a synthetic meeting end to end
//!   meetrec check              Check encoder availability
//!   meetrec ls [--prefix P]    List objects in the store
//!   meetrec config             Print the effective configuration

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use meetrec_common::{AppConfig, LoggingConfig};

mod commands;

#[derive(Parser)]
#[command(
    name = "meetrec",
    about = "Meeting recorder: synchronize, encode and store recordings",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the standard location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a synthetic meeting and store the final video
    Record {
        /// Session id
        #[arg(short, long, default_value = "demo")]
        session: String,

        /// Recording length (seconds)
        #[arg(short, long, default_value = "10")]
        duration: f64,

        /// Number of synthetic participants, each with its own tone
        #[arg(short, long, default_value = "2")]
        participants: usize,

        /// Store directory (overrides the configured root)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output frame rate (overrides the configured rate)
        #[arg(long)]
        fps: Option<u32>,
    },

    /// Check encoder availability and the selected profile
    Check,

    /// List objects in the store
    Ls {
        /// Only keys starting with this prefix
        #[arg(long, default_value = "")]
        prefix: String,

        /// Store directory (overrides the configured root)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load(),
    };

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    meetrec_common::logging::init_logging(&LoggingConfig {
        level,
        ..config.logging.clone()
    });

    match cli.command {
        Commands::Record {
            session,
            duration,
            participants,
            store,
            fps,
        } => commands::record::run(config, session, duration, participants, store, fps).await,
        Commands::Check => commands::check::run(&config).await,
        Commands::Ls { prefix, store } => commands::ls::run(&config, &prefix, store).await,
        Commands::Config { path } => commands::config::run(&config, path),
    }
}
