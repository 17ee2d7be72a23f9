//! Run configuration.
//!
//! One immutable [`UpdateConfig`] is built at startup (defaults, optionally a
//! TOML file, then CLI overrides), validated once, and passed by reference
//! into every component of the run.

use crate::domain::Interval;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Maximum page size accepted by the klines endpoint.
pub const MAX_PAGE_LIMIT: u32 = 1000;

pub const DEFAULT_API_BASE: &str = "https://api.binance.com/api/v3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Everything a full update run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// REST base URL, without trailing slash.
    pub api_base: String,
    /// Directory holding one Parquet file per pair.
    pub data_dir: PathBuf,
    pub interval: Interval,
    /// Candles requested per page.
    pub page_limit: u32,
    /// Drop candles from the still-open current UTC day.
    pub trim_current_day: bool,
    /// Only process pairs whose catalog status is TRADING.
    pub skip_delisted: bool,
    /// Sleep before retrying after a transient transport failure.
    pub cooldown_secs: u64,
    pub request_timeout_secs: u64,
    /// Fixed seed for the processing order; random per run when absent.
    pub shuffle_seed: Option<u64>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            data_dir: PathBuf::from("data"),
            interval: Interval::OneMinute,
            page_limit: MAX_PAGE_LIMIT,
            trim_current_day: true,
            skip_delisted: false,
            cooldown_secs: 5 * 60,
            request_timeout_secs: 30,
            shuffle_seed: None,
        }
    }
}

impl UpdateConfig {
    /// Load a config from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a config from a TOML string. Missing keys take their defaults.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges. Call once after all overrides are applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(ConfigError::Invalid {
                field: "page_limit",
                reason: format!("must be in 1..={MAX_PAGE_LIMIT}, got {}", self.page_limit),
            });
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(ConfigError::Invalid {
                field: "api_base",
                reason: format!("must start with http:// or https://, got '{}'", self.api_base),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `api_base` with any trailing slashes removed.
    pub fn api_base_trimmed(&self) -> &str {
        self.api_base.trim().trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream_limits() {
        let cfg = UpdateConfig::default();
        assert_eq!(cfg.page_limit, 1000);
        assert_eq!(cfg.cooldown(), Duration::from_secs(300));
        assert_eq!(cfg.interval, Interval::OneMinute);
        assert!(cfg.trim_current_day);
        assert!(!cfg.skip_delisted);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = UpdateConfig::from_toml(
            r#"
interval = "1h"
skip_delisted = true
data_dir = "/srv/klines"
"#,
        )
        .unwrap();
        assert_eq!(cfg.interval, Interval::OneHour);
        assert!(cfg.skip_delisted);
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/klines"));
        assert_eq!(cfg.page_limit, 1000);
        assert_eq!(cfg.shuffle_seed, None);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = UpdateConfig {
            shuffle_seed: Some(7),
            ..UpdateConfig::default()
        };
        let parsed = UpdateConfig::from_toml(&cfg.to_toml().unwrap()).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn rejects_oversized_page() {
        let cfg = UpdateConfig {
            page_limit: 1500,
            ..UpdateConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "page_limit",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_interval() {
        assert!(UpdateConfig::from_toml(r#"interval = "1M""#).is_err());
    }

    #[test]
    fn trims_trailing_slash() {
        let cfg = UpdateConfig {
            api_base: "https://example.test/api/v3/".into(),
            ..UpdateConfig::default()
        };
        assert_eq!(cfg.api_base_trimmed(), "https://example.test/api/v3");
    }
}
