//! Scanner Configuration
//!
//! Settings stored in TOML format.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ScanError};
use crate::scan::state::{EvidenceGated, FixedDuration, SessionStateMachine};

/// Scanner settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Scheduling settings
    #[serde(default)]
    pub scanner: ScannerSettings,
    /// When a session is considered done
    #[serde(default)]
    pub state_machine: StateMachineSettings,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl ScanConfig {
    /// Reject values the scanner cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scanner.frame_buffer_capacity == 0 {
            return Err(ScanError::InvalidConfig(
                "scanner.frame_buffer_capacity must be at least 1".to_string(),
            ));
        }
        if self.scanner.engine_count == 0 {
            return Err(ScanError::InvalidConfig(
                "scanner.engine_count must be at least 1".to_string(),
            ));
        }
        self.state_machine.validate()
    }
}

/// Frame scheduling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Frames kept waiting for an engine; older frames are dropped first
    pub frame_buffer_capacity: usize,
    /// Engines to run side by side
    pub engine_count: usize,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            frame_buffer_capacity: 2,
            engine_count: 2,
        }
    }
}

/// Session state machine selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateMachineSettings {
    /// Finish a fixed time after the first card number is read
    FixedDuration { finish_after_secs: f64 },
    /// Finish after `min_secs` once an expiry was seen, or after `max_secs`
    EvidenceGated { min_secs: f64, max_secs: f64 },
}

impl Default for StateMachineSettings {
    fn default() -> Self {
        StateMachineSettings::FixedDuration {
            finish_after_secs: FixedDuration::DEFAULT_FINISH_AFTER.as_secs_f64(),
        }
    }
}

impl StateMachineSettings {
    pub fn validate(&self) -> Result<()> {
        let check = |name: &str, secs: f64| {
            if secs.is_finite() && secs >= 0.0 {
                Ok(())
            } else {
                Err(ScanError::InvalidConfig(format!(
                    "state_machine.{} must be a non-negative number of seconds, got {}",
                    name, secs
                )))
            }
        };

        match *self {
            StateMachineSettings::FixedDuration { finish_after_secs } => {
                check("finish_after_secs", finish_after_secs)
            }
            StateMachineSettings::EvidenceGated { min_secs, max_secs } => {
                check("min_secs", min_secs)?;
                check("max_secs", max_secs)?;
                if min_secs > max_secs {
                    return Err(ScanError::InvalidConfig(format!(
                        "state_machine.min_secs ({}) exceeds max_secs ({})",
                        min_secs, max_secs
                    )));
                }
                Ok(())
            }
        }
    }

    /// Build a state machine at its initial state
    pub fn build(&self) -> SessionStateMachine {
        let secs = |value: f64, fallback: Duration| {
            Duration::try_from_secs_f64(value).unwrap_or(fallback)
        };

        match *self {
            StateMachineSettings::FixedDuration { finish_after_secs } => {
                SessionStateMachine::fixed_duration(secs(
                    finish_after_secs,
                    FixedDuration::DEFAULT_FINISH_AFTER,
                ))
            }
            StateMachineSettings::EvidenceGated { min_secs, max_secs } => {
                SessionStateMachine::evidence_gated(
                    secs(min_secs, EvidenceGated::DEFAULT_MIN),
                    secs(max_secs, EvidenceGated::DEFAULT_MAX),
                )
            }
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: ScanConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &ScanConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    let proj_dirs =
        directories::ProjectDirs::from("com", "cardscan", "cardscan").ok_or(ScanError::NoConfigDir)?;
    Ok(proj_dirs.config_dir().join("config.toml"))
}
