//! gnump Configuration System
//!
//! Provides configuration for the binding runtime:
//! - Bridge configuration (gnump.toml)
//! - Discovery by walking up from a start directory
//! - Environment variable overrides (GNUMP_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Nearest gnump.toml
//! 3. Environment variables (GNUMP_*)
//!
//! # Example
//!
//! ```no_run
//! use gnump_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("growth increment: {}", config.bridge.growth_increment());
//! ```

pub mod bridge;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Name of the configuration file searched for by [`ConfigLoader`]
pub const CONFIG_FILE_NAME: &str = "gnump.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use bridge::{BridgeConfig, EngineConfig, FloatConfig, MarshalConfig, ROUNDING_NAMES};
pub use loader::{Config, ConfigLoader};
