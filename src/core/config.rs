//! Configuration parsing and validation.
//!
//! geowatch configuration is loaded from TOML files with CLI overrides.
//! Sections mirror the crate's components: record field layout, geohash
//! encoding, query planning, event delivery and telemetry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::geo::cell::{DEFAULT_PRECISION, MAX_PRECISION};
use crate::geo::point::MAX_SUPPORTED_RADIUS_KM;

/// Top-level geowatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Names of the persisted location fields.
    #[serde(default)]
    pub fields: FieldsConfig,

    /// Geohash encoding settings.
    #[serde(default)]
    pub geohash: GeohashConfig,

    /// Query planning settings.
    #[serde(default)]
    pub query: QueryConfig,

    /// Event delivery context.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Persisted field names. These form the wire contract with stored records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldsConfig {
    /// Field holding the geohash string; the sole range-query sort key.
    #[serde(default = "default_geohash_field")]
    pub geohash: String,

    /// Field holding the `[latitude, longitude]` pair.
    #[serde(default = "default_location_field")]
    pub location: String,
}

impl Default for FieldsConfig {
    fn default() -> Self {
        Self {
            geohash: default_geohash_field(),
            location: default_location_field(),
        }
    }
}

/// Geohash encoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeohashConfig {
    /// Length of geohashes written alongside each record.
    #[serde(default = "default_storage_precision")]
    pub storage_precision: usize,
}

impl Default for GeohashConfig {
    fn default() -> Self {
        Self {
            storage_precision: default_storage_precision(),
        }
    }
}

/// Query planning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Radius ceiling in kilometers; larger requests are clamped.
    #[serde(default = "default_max_radius_km")]
    pub max_radius_km: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_radius_km: default_max_radius_km(),
        }
    }
}

/// Event delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Mode: "immediate", "thread" or "tokio".
    #[serde(default = "default_delivery_mode")]
    pub mode: String,

    /// Worker thread name for "thread" mode.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: default_delivery_mode(),
            thread_name: default_thread_name(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

// Default value functions

fn default_geohash_field() -> String {
    "g".to_string()
}

fn default_location_field() -> String {
    "l".to_string()
}

fn default_storage_precision() -> usize {
    DEFAULT_PRECISION
}

fn default_max_radius_km() -> f64 {
    MAX_SUPPORTED_RADIUS_KM
}

fn default_delivery_mode() -> String {
    "thread".to_string()
}

fn default_thread_name() -> String {
    "geowatch-events".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Accepted delivery modes.
pub const DELIVERY_MODES: [&str; 3] = ["immediate", "thread", "tokio"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render config")
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref mode) = overrides.delivery_mode {
            self.delivery.mode = mode.clone();
        }
        if let Some(precision) = overrides.storage_precision {
            self.geohash.storage_precision = precision;
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_fields()?;
        self.validate_geohash()?;
        self.validate_query()?;
        self.validate_delivery()?;
        self.validate_telemetry()?;
        Ok(())
    }

    fn validate_fields(&self) -> Result<()> {
        if self.fields.geohash.is_empty() {
            anyhow::bail!("fields.geohash must not be empty");
        }
        if self.fields.location.is_empty() {
            anyhow::bail!("fields.location must not be empty");
        }
        if self.fields.geohash == self.fields.location {
            anyhow::bail!(
                "fields.geohash and fields.location must differ, both are: {}",
                self.fields.geohash
            );
        }
        Ok(())
    }

    fn validate_geohash(&self) -> Result<()> {
        let precision = self.geohash.storage_precision;
        if precision == 0 || precision > MAX_PRECISION {
            anyhow::bail!(
                "geohash.storage_precision must be within 1..={}, got: {}",
                MAX_PRECISION,
                precision
            );
        }
        Ok(())
    }

    fn validate_query(&self) -> Result<()> {
        let max = self.query.max_radius_km;
        if !max.is_finite() || max <= 0.0 {
            anyhow::bail!("query.max_radius_km must be > 0, got: {}", max);
        }
        if max > MAX_SUPPORTED_RADIUS_KM {
            anyhow::bail!(
                "query.max_radius_km cannot exceed {} km, got: {}",
                MAX_SUPPORTED_RADIUS_KM,
                max
            );
        }
        Ok(())
    }

    fn validate_delivery(&self) -> Result<()> {
        if !DELIVERY_MODES.contains(&self.delivery.mode.as_str()) {
            anyhow::bail!(
                "delivery.mode must be one of {:?}, got: {}",
                DELIVERY_MODES,
                self.delivery.mode
            );
        }
        if self.delivery.thread_name.is_empty() {
            anyhow::bail!("delivery.thread_name must not be empty");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override delivery mode.
    pub delivery_mode: Option<String>,
    /// Override storage precision.
    pub storage_precision: Option<usize>,
}
