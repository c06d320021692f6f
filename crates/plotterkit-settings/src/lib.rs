//! PlotterKit Settings Crate
//!
//! Handles application configuration: file formats, defaults, validation and
//! the platform configuration directory.

pub mod config;
pub mod error;

pub use config::{
    config_dir, default_config_path, AuxiliarySettings, ClassifierSettings, Config,
    ConnectionSettings, PlotterSettings, QueueSettings, SimplifySettings,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
