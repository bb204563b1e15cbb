//! Simulator configuration loaded from TOML

pub mod types;

pub use types::{ConfigError, MAX_CACHES, SimulatorConfig};
