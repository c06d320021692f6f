//! Settings errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read, write or locate a configuration file
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        /// Configuration file.
        path: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },

    /// The file or its directory could not be written.
    #[error("Cannot write {}: {source}", .path.display())]
    Write {
        /// Configuration file.
        path: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },

    /// The file is not valid JSON or TOML for a configuration.
    #[error("Malformed settings in {}: {reason}", .path.display())]
    Parse {
        /// Configuration file.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// The configuration could not be rendered.
    #[error("Cannot serialize settings: {0}")]
    Serialize(String),

    /// Neither a configuration nor a home directory exists.
    #[error("No configuration directory on this system")]
    NoConfigDirectory,

    /// The values were read but do not make sense.
    #[error("Invalid settings: {0}")]
    Invalid(#[from] ConfigError),
}

/// Rejected configuration values
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Files must end in `.json` or `.toml`.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is out of valid range.
    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },

    /// Two values contradict each other.
    #[error("Inconsistent settings: {0}")]
    Inconsistent(String),
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Result type alias for validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
