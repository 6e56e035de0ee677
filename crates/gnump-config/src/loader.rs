//! Configuration Loader
//!
//! Finds the nearest gnump.toml and applies environment variable overrides on top.

use crate::bridge::BridgeConfig;
use crate::{ConfigError, ConfigResult, CONFIG_FILE_NAME};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Configuration loader
///
/// Precedence, lowest first:
/// 1. Built-in defaults
/// 2. Nearest gnump.toml (./gnump.toml, then parent directories)
/// 3. Environment variables (GNUMP_*)
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Skip the GNUMP_* environment overrides
    ignore_env: bool,
}

/// Loaded configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Bridge configuration
    pub bridge: BridgeConfig,

    /// Directory containing the gnump.toml that was loaded
    pub config_root: Option<PathBuf>,
}

impl Config {
    /// Whether the configuration came from a file rather than defaults alone
    pub fn has_file(&self) -> bool {
        self.config_root.is_some()
    }

    /// Directory containing the loaded gnump.toml
    pub fn config_root(&self) -> Option<&Path> {
        self.config_root.as_deref()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { ignore_env: false }
    }

    /// Disable environment overrides (used where the process env must not leak in)
    pub fn without_env(mut self) -> Self {
        self.ignore_env = true;
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find gnump.toml. Falls back to defaults
    /// when no file exists anywhere up to the filesystem root.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (config_root, bridge) = self.find_config(start_dir)?;
        let bridge = self.apply_env_overrides(bridge)?;

        Ok(Config {
            bridge,
            config_root,
        })
    }

    /// Load configuration from a specific gnump.toml
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let bridge = BridgeConfig::load_from_file(config_path)?;
        let bridge = self.apply_env_overrides(bridge)?;

        Ok(Config {
            bridge,
            config_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    fn find_config(&self, start_dir: &Path) -> ConfigResult<(Option<PathBuf>, BridgeConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let config = BridgeConfig::load_from_file(&config_path)?;
                return Ok((Some(current), config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, BridgeConfig::default())),
            }
        }
    }

    /// Apply environment variable overrides
    ///
    /// Recognised: GNUMP_GROWTH_INCREMENT, GNUMP_MAX_PAGES,
    /// GNUMP_DEFAULT_PRECISION, GNUMP_DEFAULT_ROUNDING.
    fn apply_env_overrides(&self, mut config: BridgeConfig) -> ConfigResult<BridgeConfig> {
        if self.ignore_env {
            return Ok(config);
        }

        if let Some(increment) = env_number::<u32>("GNUMP_GROWTH_INCREMENT")? {
            config
                .marshal
                .get_or_insert_with(Default::default)
                .growth_increment = Some(increment);
        }

        if let Some(max_pages) = env_number::<u32>("GNUMP_MAX_PAGES")? {
            config.engine.get_or_insert_with(Default::default).max_pages = Some(max_pages);
        }

        if let Some(precision) = env_number::<u32>("GNUMP_DEFAULT_PRECISION")? {
            config
                .float
                .get_or_insert_with(Default::default)
                .default_precision = Some(precision);
        }

        if let Ok(rounding) = env::var("GNUMP_DEFAULT_ROUNDING") {
            config
                .float
                .get_or_insert_with(Default::default)
                .default_rounding = Some(rounding.to_lowercase());
        }

        config.validate()?;
        Ok(config)
    }
}

fn env_number<T: FromStr>(name: &str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                reason: format!("'{}' is not a valid number", raw),
            }),
        Err(_) => Ok(None),
    }
}
