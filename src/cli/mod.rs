//! Command-line interface.
//!
//! Geohash inspection, coverage planning and a live query demo over the
//! in-memory store.

pub mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;

use crate::core::config::{Config, ConfigOverrides};

/// geowatch - live radius queries over range-indexed document stores.
#[derive(Parser, Debug)]
#[command(name = "geowatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encode a coordinate pair as a geohash.
    Encode(commands::EncodeArgs),
    /// Decode a geohash into its bounding box.
    Decode(commands::DecodeArgs),
    /// Show the key ranges covering a circle.
    Plan(commands::PlanArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Run a live query against an in-memory store.
    Demo(commands::DemoArgs),
}

/// Load the configuration file if one was given, else defaults, then apply
/// overrides.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::default(),
    };
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` takes precedence over the configured level.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A second initialization (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}
