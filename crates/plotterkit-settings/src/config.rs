//! Configuration for PlotterKit
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats, chosen by file extension; the default file lives in the
//! platform configuration directory.
//!
//! Configuration is organized into sections:
//! - Connection settings (port, baud rate, protocol timing)
//! - Auxiliary controller
//! - Plotter geometry and motion
//! - Path simplification
//! - Colour classification thresholds
//! - Job queue storage

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "plotterkit";

/// Plotter serial link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Serial port (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Longest wait for an acknowledgment
    pub ack_timeout_ms: u64,
    /// Wait after opening before the first line
    pub settle_delay_ms: u64,
    /// Wait after a finished program before closing
    pub grace_delay_ms: u64,
    /// Interval between connection health checks
    pub health_interval_ms: u64,
    /// Keep the port open between operations
    pub persistent: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            ack_timeout_ms: 5000,
            settle_delay_ms: 2000,
            grace_delay_ms: 500,
            health_interval_ms: 1000,
            persistent: false,
        }
    }
}

/// Auxiliary controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuxiliarySettings {
    /// Serial port; no auxiliary controller when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
}

impl Default for AuxiliarySettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
        }
    }
}

/// Plotter geometry and motion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotterSettings {
    /// Drawing feed rate (mm/min)
    pub feed_rate: f64,
    /// Pen-up Z height (mm)
    pub pen_up_z: f64,
    /// Pen-down Z height (mm)
    pub pen_down_z: f64,
    /// Working area width (mm)
    pub width_mm: f64,
    /// Working area height (mm)
    pub height_mm: f64,
    /// Blank border inside the working area (mm)
    pub margin_mm: f64,
    /// Feed rate of the safe return to origin (mm/min)
    pub recovery_feed_rate: f64,
}

impl Default for PlotterSettings {
    fn default() -> Self {
        Self {
            feed_rate: 1500.0,
            pen_up_z: 5.0,
            pen_down_z: 0.0,
            width_mm: 200.0,
            height_mm: 200.0,
            margin_mm: 5.0,
            recovery_feed_rate: 500.0,
        }
    }
}

/// Path simplification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifySettings {
    /// Maximum deviation (mm)
    pub tolerance: f64,
    /// Shortest kept path (mm)
    pub min_path_length: f64,
    /// Drop paths shorter than `min_path_length`
    pub remove_noise: bool,
}

impl Default for SimplifySettings {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            min_path_length: 2.0,
            remove_noise: true,
        }
    }
}

/// Colour classification thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Every channel above this is background
    pub background_min: u8,
    /// Minimum value of a dominant channel
    pub channel_min: u8,
    /// How far a dominant channel must exceed the others
    pub dominance_margin: u8,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            background_min: 240,
            channel_min: 100,
            dominance_margin: 50,
        }
    }
}

/// Job queue settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Job store file; defaults to `jobs.json` in the config directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
}

impl QueueSettings {
    /// Configured store path, or the default location
    pub fn resolved_store_path(&self) -> SettingsResult<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("jobs.json")),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plotter link
    pub connection: ConnectionSettings,
    /// Auxiliary controller
    pub auxiliary: AuxiliarySettings,
    /// Plotter geometry and motion
    pub plotter: PlotterSettings,
    /// Path simplification
    pub simplify: SimplifySettings,
    /// Colour classification
    pub classifier: ClassifierSettings,
    /// Job queue
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> ConfigResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed = match format {
            Format::Json => serde_json::from_str::<Self>(&content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str::<Self>(&content).map_err(|e| e.to_string()),
        };
        let config = parsed.map_err(|reason| SettingsError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load config from file, falling back to defaults when it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(
                "No configuration at {}, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML), creating its directory
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            Format::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        }
        .map_err(SettingsError::Serialize)?;

        let write_error = |source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_error)?;
            }
        }
        std::fs::write(path, content).map_err(write_error)?;

        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let connection = &self.connection;
        if connection.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", connection.baud_rate));
        }
        for (key, value) in [
            ("connection.ack_timeout_ms", connection.ack_timeout_ms),
            ("connection.health_interval_ms", connection.health_interval_ms),
        ] {
            if value == 0 {
                return Err(out_of_range(key, value));
            }
        }
        if self.auxiliary.port.is_some() && self.auxiliary.baud_rate == 0 {
            return Err(out_of_range(
                "auxiliary.baud_rate",
                self.auxiliary.baud_rate,
            ));
        }

        let plotter = &self.plotter;
        for (key, value) in [
            ("plotter.feed_rate", plotter.feed_rate),
            ("plotter.recovery_feed_rate", plotter.recovery_feed_rate),
            ("plotter.width_mm", plotter.width_mm),
            ("plotter.height_mm", plotter.height_mm),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(out_of_range(key, value));
            }
        }
        if plotter.margin_mm < 0.0
            || plotter.margin_mm * 2.0 >= plotter.width_mm.min(plotter.height_mm)
        {
            return Err(out_of_range("plotter.margin_mm", plotter.margin_mm));
        }
        if plotter.pen_down_z >= plotter.pen_up_z {
            return Err(ConfigError::Inconsistent(format!(
                "pen_down_z ({}) must be below pen_up_z ({})",
                plotter.pen_down_z, plotter.pen_up_z
            )));
        }

        if self.simplify.tolerance.is_nan() || self.simplify.tolerance < 0.0 {
            return Err(out_of_range("simplify.tolerance", self.simplify.tolerance));
        }
        if self.simplify.min_path_length.is_nan() || self.simplify.min_path_length < 0.0 {
            return Err(out_of_range(
                "simplify.min_path_length",
                self.simplify.min_path_length,
            ));
        }

        Ok(())
    }
}

fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Platform configuration directory for PlotterKit
pub fn config_dir() -> SettingsResult<PathBuf> {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .map(|dir| dir.join(APP_DIR))
        .ok_or(SettingsError::NoConfigDirectory)
}

/// Default configuration file
pub fn default_config_path() -> SettingsResult<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}
