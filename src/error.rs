//! Error types for cardscan
//!
//! Scanning itself never fails: an empty prediction is ordinary input and
//! cancellation is a state, not an error. These errors cover setting the
//! scanner up and loading its configuration.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    /// The scanner was given no engines
    #[error("At least one recognition engine is required")]
    NoEngines,

    /// Configuration values out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker or notification thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file I/O errors
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file is not valid TOML for the expected layout
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No home directory to place the configuration in
    #[error("Could not determine configuration directory")]
    NoConfigDir,
}

pub type Result<T> = std::result::Result<T, ScanError>;
