//! Configuration module.
//!
//! Handles loading, validating, and merging `shardpix.toml`. Stock defaults
//! are overridden by whatever the user file sets.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! database_path = "shardpix.db"
//! attachments_path = "storage/attachments"
//! derivatives_path = "storage/derivatives"
//!
//! [encoding]
//! jpeg_quality = 90         # JPEG derivative quality (1-100)
//!
//! [processing]
//! max_processes = 4         # Max parallel workers for `warm` (omit for auto)
//!
//! [dimensions.thumbnail]    # One table per whitelisted size
//! width = 300
//! height = 300
//! allow_crop = true
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want:
//!
//! ```toml
//! [encoding]
//! jpeg_quality = 80
//! ```
//!
//! The one exception is `[dimensions]`: if the user file has it at all, it
//! replaces the stock whitelist instead of merging into it, so sizes can be
//! removed as well as added.
//!
//! Unknown keys are rejected to catch typos early.

use crate::dimensions::CannedDimensions;
use crate::imaging::Quality;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "shardpix.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `shardpix.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite catalog file.
    pub database_path: PathBuf,
    /// Root of the sharded tree holding originals.
    pub attachments_path: PathBuf,
    /// Root of the sharded tree holding derivatives.
    pub derivatives_path: PathBuf,
    /// Output encoder settings.
    pub encoding: EncodingConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Whitelist of sizes that may be materialized.
    pub dimensions: CannedDimensions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("shardpix.db"),
            attachments_path: PathBuf::from("storage/attachments"),
            derivatives_path: PathBuf::from("storage/derivatives"),
            encoding: EncodingConfig::default(),
            processing: ProcessingConfig::default(),
            dimensions: CannedDimensions::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, path) in [
            ("database_path", &self.database_path),
            ("attachments_path", &self.attachments_path),
            ("derivatives_path", &self.derivatives_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!("{key} must not be empty")));
            }
        }
        if !(1..=100).contains(&self.encoding.jpeg_quality) {
            return Err(ConfigError::Validation(
                "encoding.jpeg_quality must be 1-100".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }

        let mut seen = BTreeMap::new();
        for (name, dims) in self.dimensions.iter() {
            if dims.width == Some(0) || dims.height == Some(0) {
                return Err(ConfigError::Validation(format!(
                    "dimensions.{name}: width and height must be non-zero"
                )));
            }
            // Only `full` may leave both sides unset
            if dims.width.is_none() && dims.height.is_none() && !dims.is_full() {
                return Err(ConfigError::Validation(format!(
                    "dimensions.{name}: allow_crop needs a width or a height"
                )));
            }
            if let Some(other) = seen.insert(dims, name) {
                return Err(ConfigError::Validation(format!(
                    "dimensions.{name} and dimensions.{other} describe the same size"
                )));
            }
        }
        Ok(())
    }

    pub fn quality(&self) -> Quality {
        Quality::new(self.encoding.jpeg_quality)
    }
}

/// Output encoder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    /// JPEG quality (1 = worst, 100 = best). Other formats are lossless.
    pub jpeg_quality: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { jpeg_quality: 90 }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file doesn't exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => {
            let mut base = base;
            // A user whitelist replaces the stock one wholesale
            if ov.get("dimensions").is_some()
                && let toml::Value::Table(table) = &mut base
            {
                table.remove("dimensions");
            }
            merge_toml(base, ov)
        }
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults if it's missing.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `shardpix.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# shardpix Configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Unknown keys will cause an error.

# SQLite catalog holding attachment and derivative records.
database_path = "shardpix.db"

# Sharded trees for originals and derivatives. Files land at
# <path>/<d1>/<d2>/<id>.<ext>, where d1/d2 come from the id's leading digits.
attachments_path = "storage/attachments"
derivatives_path = "storage/derivatives"

# ---------------------------------------------------------------------------
# Encoding
# ---------------------------------------------------------------------------
[encoding]
# JPEG derivative quality (1 = worst, 100 = best).
# PNG and WebP derivatives are lossless; GIF, TIFF and BMP have no knob.
jpeg_quality = 90

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers for `shardpix warm`.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Whitelisted sizes
# ---------------------------------------------------------------------------
# Only these sizes can ever be generated. Each table is one named size:
#   width/height  pixels; omit one to scale by the other, omit both for
#                 the original size
#   allow_crop    true  = center-crop to fill width x height exactly
#                 false = shrink to fit inside width x height
#
# Defining [dimensions] at all replaces this whole list.

[dimensions.full]

[dimensions.opengraph]
width = 750
height = 750
allow_crop = false

[dimensions.single]
width = 960
height = 720
allow_crop = false

[dimensions.single2x]
width = 1920
height = 1440
allow_crop = false

[dimensions.thumbnail]
width = 300
height = 300
allow_crop = true

[dimensions.thumbnail2x]
width = 600
height = 600
allow_crop = true
"##
}
