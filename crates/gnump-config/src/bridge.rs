//! Bridge Configuration (gnump.toml)
//!
//! Tunables of the binding runtime: marshalling growth, the in-process
//! engine's linear memory limits, and numeric defaults.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default heuristic increment added to the marshalling region when it is (re)allocated
pub const DEFAULT_GROWTH_INCREMENT: u32 = 128;
/// Default number of 64 KiB pages the linear memory starts with
pub const DEFAULT_INITIAL_PAGES: u32 = 1;
/// Default upper bound on linear memory pages
pub const DEFAULT_MAX_PAGES: u32 = 256;
/// Hard upper bound on linear memory pages (2 GiB)
pub const PAGE_LIMIT: u32 = 32_768;
/// Default precision in bits (matches an IEEE double)
pub const DEFAULT_PRECISION: u32 = 53;
/// Default rounding mode name
pub const DEFAULT_ROUNDING: &str = "nearest";

/// Rounding mode names accepted in configuration, in engine code order
pub const ROUNDING_NAMES: [&str; 6] = [
    "nearest",
    "toward_zero",
    "toward_infinity",
    "toward_minus_infinity",
    "away_zero",
    "faithful",
];

/// Bridge configuration from gnump.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Marshalling allocator settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marshal: Option<MarshalConfig>,

    /// Linear memory settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineConfig>,

    /// Numeric defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub float: Option<FloatConfig>,
}

/// Marshalling allocator settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct MarshalConfig {
    /// Bytes added whenever the region is (re)allocated (default: 128)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub growth_increment: Option<u32>,
}

/// Linear memory settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Pages allocated up front (default: 1)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_pages: Option<u32>,

    /// Maximum pages the memory may grow to (default: 256)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
}

/// Numeric defaults
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FloatConfig {
    /// Precision in bits for floats created without one (default: 53)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_precision: Option<u32>,

    /// Rounding mode name (default: "nearest")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_rounding: Option<String>,
}

impl BridgeConfig {
    /// Load bridge configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the bridge configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(marshal) = &self.marshal {
            if marshal.growth_increment == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "marshal.growth_increment".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if let Some(engine) = &self.engine {
            if engine.initial_pages == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "engine.initial_pages".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if let Some(max) = engine.max_pages {
                if max == 0 || max > PAGE_LIMIT {
                    return Err(ConfigError::InvalidValue {
                        field: "engine.max_pages".to_string(),
                        reason: format!("must be between 1 and {}", PAGE_LIMIT),
                    });
                }
            }
        }

        if self.initial_pages() > self.max_pages() {
            return Err(ConfigError::ValidationError(format!(
                "engine.initial_pages ({}) exceeds engine.max_pages ({})",
                self.initial_pages(),
                self.max_pages()
            )));
        }

        if let Some(float) = &self.float {
            if float.default_precision == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "float.default_precision".to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if let Some(rounding) = &float.default_rounding {
                if !ROUNDING_NAMES.contains(&rounding.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: "float.default_rounding".to_string(),
                        reason: format!(
                            "unknown rounding mode '{}' (expected one of: {})",
                            rounding,
                            ROUNDING_NAMES.join(", ")
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Effective marshalling growth increment
    pub fn growth_increment(&self) -> u32 {
        self.marshal
            .as_ref()
            .and_then(|m| m.growth_increment)
            .unwrap_or(DEFAULT_GROWTH_INCREMENT)
    }

    /// Effective initial page count
    pub fn initial_pages(&self) -> u32 {
        self.engine
            .as_ref()
            .and_then(|e| e.initial_pages)
            .unwrap_or(DEFAULT_INITIAL_PAGES)
    }

    /// Effective maximum page count
    pub fn max_pages(&self) -> u32 {
        self.engine
            .as_ref()
            .and_then(|e| e.max_pages)
            .unwrap_or(DEFAULT_MAX_PAGES)
    }

    /// Effective default precision
    pub fn default_precision(&self) -> u32 {
        self.float
            .as_ref()
            .and_then(|f| f.default_precision)
            .unwrap_or(DEFAULT_PRECISION)
    }

    /// Effective default rounding mode name
    pub fn default_rounding(&self) -> &str {
        self.float
            .as_ref()
            .and_then(|f| f.default_rounding.as_deref())
            .unwrap_or(DEFAULT_ROUNDING)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.growth_increment(), 128);
        assert_eq!(config.initial_pages(), 1);
        assert_eq!(config.max_pages(), 256);
        assert_eq!(config.default_precision(), 53);
        assert_eq!(config.default_rounding(), "nearest");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: BridgeConfig = toml::from_str(
            r#"
[marshal]
growth_increment = 512

[engine]
initial_pages = 2
max_pages = 64

[float]
default_precision = 256
default_rounding = "toward_zero"
"#,
        )
        .unwrap();

        assert_eq!(config.growth_increment(), 512);
        assert_eq!(config.initial_pages(), 2);
        assert_eq!(config.max_pages(), 64);
        assert_eq!(config.default_precision(), 256);
        assert_eq!(config.default_rounding(), "toward_zero");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<BridgeConfig, _> = toml::from_str("[marshal]\ngrowth = 3\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_growth_rejected() {
        let config = BridgeConfig {
            marshal: Some(MarshalConfig {
                growth_increment: Some(0),
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_initial_pages_above_max_rejected() {
        let config = BridgeConfig {
            engine: Some(EngineConfig {
                initial_pages: Some(10),
                max_pages: Some(4),
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unknown_rounding_rejected() {
        let config = BridgeConfig {
            float: Some(FloatConfig {
                default_precision: None,
                default_rounding: Some("sideways".to_string()),
            }),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sideways"));
    }
}
