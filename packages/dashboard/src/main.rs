#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Live terminal dashboard for the Seattle Real Time Fire 911 Calls feed.
//!
//! Polls the dataset on a timer, keeps every incident seen since start-up,
//! and shows the ones inside a trailing window of hours as a dot map, a
//! ranked chart of incident types and a table.

mod render;
mod snapshot;
mod watch;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use incident_feed_cache::clock::ZonedClock;
use incident_feed_cache::config::FeedConfig;

#[derive(Parser)]
#[command(name = "incident_feed", about = "Live 911 incident feed dashboard")]
struct Cli {
    /// TOML config file (defaults to the built-in Seattle config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Initial window in hours
    #[arg(long, global = true)]
    hours: Option<u32>,
    /// Largest window in hours; also the span of the first fetch
    #[arg(long, global = true)]
    max_hours: Option<u32>,
    /// Number of incident types to chart
    #[arg(long, global = true)]
    n_types: Option<usize>,
    /// Seconds between refreshes
    #[arg(long, global = true)]
    interval: Option<u64>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the live dashboard (default)
    Watch,
    /// Fetch once and print the current window as JSON
    Snapshot {
        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    fn feed_config(&self) -> Result<FeedConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => FeedConfig::load(path)?,
            None => FeedConfig::embedded()?,
        };
        if let Some(hours) = self.hours {
            config.hours = hours;
        }
        if let Some(max_hours) = self.max_hours {
            config.max_hours = max_hours;
        }
        if let Some(n_types) = self.n_types {
            config.n_types = n_types;
        }
        if let Some(interval) = self.interval {
            config.update_interval_secs = interval;
        }
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = incident_feed_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = cli.feed_config()?;
    let clock = ZonedClock::new(config.time_zone()?);

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => watch::run(&config, clock, &multi).await?,
        Commands::Snapshot { pretty } => snapshot::run(&config, clock, &multi, pretty).await?,
        Commands::Config => print!("{}", config.redacted().to_toml_string()?),
    }

    Ok(())
}
