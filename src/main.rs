//! geowatch - unified CLI entrypoint.
//!
//! Usage:
//!   geowatch encode --lat 37.78 --lon -122.40 --precision 10
//!   geowatch decode 9q8yywdgue --neighbors
//!   geowatch plan --lat 37.78 --lon -122.40 --radius-km 1.5
//!   geowatch config validate --config config/geowatch.toml
//!   geowatch demo --radius-km 1

use anyhow::Result;
use clap::Parser;
use geowatch::cli::commands::{run_config, run_decode, run_demo, run_encode, run_plan};
use geowatch::cli::{init_tracing, load_config, Cli, Commands};
use geowatch::core::config::ConfigOverrides;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "config/geowatch.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Explicit --config must exist; the default path is optional.
    let config_path = match cli.config {
        Some(path) => Some(PathBuf::from(path)),
        None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists()),
    };
    let overrides = ConfigOverrides {
        log_level: cli.log_level,
        ..Default::default()
    };
    let config = load_config(config_path.as_deref(), &overrides)?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Encode(args) => run_encode(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Plan(args) => run_plan(args, &config),
        Commands::Config(args) => run_config(args),
        Commands::Demo(args) => run_demo(args, &config).await,
    }
}
