//! Simulator configuration types
//!
//! Configuration is a small TOML document:
//!
//! ```toml
//! protocol = "moesi"
//! num_caches = 4
//! check_invariants = true
//! event_log_capacity = 1024
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::coherence::bus::DEFAULT_EVENT_LOG_CAPACITY;
use crate::coherence::protocol::ProtocolVariant;

/// Largest number of private caches a bus can connect
pub const MAX_CACHES: u8 = 64;

/// Main simulator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulatorConfig {
    /// Coherence protocol shared by every cache
    pub protocol: ProtocolVariant,
    /// Number of private caches on the bus
    pub num_caches: u8,
    /// Verify the single-writer invariant after every bus transaction
    pub check_invariants: bool,
    /// Undrained bus events kept before the oldest are discarded; 0 disables
    pub event_log_capacity: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolVariant::Mesi,
            num_caches: 4,
            check_invariants: true,
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
        }
    }
}

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    FileNotFound(String),
    NotAFile(String),
    FileReadError(String),
    TomlParseError(String),
    TomlSerializeError(String),
    InvalidFieldValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Configuration file not found: {}", path),
            ConfigError::NotAFile(path) => write!(f, "Path is not a file: {}", path),
            ConfigError::FileReadError(msg) => {
                write!(f, "Failed to read configuration file: {}", msg)
            }
            ConfigError::TomlParseError(msg) => write!(f, "TOML parsing error: {}", msg),
            ConfigError::TomlSerializeError(msg) => write!(f, "TOML serialization error: {}", msg),
            ConfigError::InvalidFieldValue {
                field,
                value,
                reason,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for field '{}': {}",
                    value, field, reason
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl SimulatorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SimulatorConfig =
            toml::from_str(contents).map_err(|e| ConfigError::TomlParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display));
        }
        if !path.is_file() {
            return Err(ConfigError::NotAFile(display));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("{}: {}", display, e)))?;
        let config = Self::from_toml_str(&contents)?;
        log::info!(
            "Loaded {} configuration with {} caches from {}",
            config.protocol,
            config.num_caches,
            display
        );
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::TomlSerializeError(e.to_string()))
    }

    /// Validate field ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_caches == 0 || self.num_caches > MAX_CACHES {
            return Err(ConfigError::InvalidFieldValue {
                field: "num_caches".to_string(),
                value: self.num_caches.to_string(),
                reason: format!("must be between 1 and {}", MAX_CACHES),
            });
        }
        if !self.check_invariants {
            log::warn!("Single-writer invariant checks disabled");
        }
        Ok(())
    }
}
