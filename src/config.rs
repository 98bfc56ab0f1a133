// src/config.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::fetch::{EndpointTemplate, RetryPolicy};
use crate::ranges::SheetSelector;
use crate::strategy::StrategyKind;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "zonescraper.toml";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("file_extension must be non-empty and contain no path separators")]
    Extension,
}

/// Run configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoint_template: EndpointTemplate,
    /// Where downloaded zone files are written.
    pub output_dir: PathBuf,
    pub file_extension: String,
    pub ranges: RangesConfig,
    pub http: HttpConfig,
    pub run: RunConfig,
}

/// Location and layout of the workbook defining the expected ranges.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RangesConfig {
    pub path: PathBuf,
    pub sheet: SheetSelector,
    pub column_from: String,
    pub column_to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// The zone file host is fetched without certificate verification.
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Retries on connection failures; HTTP error statuses are never retried.
    pub connect_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub strategy: StrategyKind,
    /// Upper bound on initial fetches in flight for the concurrent strategy.
    pub max_in_flight: usize,
    /// Upper bound on fetches for a single range entry.
    pub max_fetches_per_entry: u32,
    /// Overall run deadline; 0 disables it.
    pub deadline_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint_template: EndpointTemplate::default(),
            output_dir: PathBuf::from("zip_files"),
            file_extension: "xls".to_string(),
            ranges: RangesConfig::default(),
            http: HttpConfig::default(),
            run: RunConfig::default(),
        }
    }
}

impl Default for RangesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Carriers zone ranges.xlsx"),
            sheet: SheetSelector::Name("UPS zip ranges".to_string()),
            column_from: "zip from".to_string(),
            column_to: "zip to".to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: true,
            request_timeout_secs: 60,
            connect_timeout_secs: 15,
            connect_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Sequential,
            max_in_flight: 16,
            max_fetches_per_entry: 64,
            deadline_secs: 1_800,
        }
    }
}

impl HttpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.connect_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_secs > 0).then(|| Duration::from_secs(self.deadline_secs))
    }
}

impl Config {
    /// Load from `path`, or from `zonescraper.toml` in the working directory
    /// if present, or fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    debug!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
                    return Ok(Self::default());
                }
                default
            }
        };
        let data =
            fs::read_to_string(&path).with_context(|| format!("reading config {:?}", path))?;
        let cfg = Self::from_toml(&data).with_context(|| format!("parsing config {:?}", path))?;
        info!(path = %path.display(), "loaded config");
        Ok(cfg)
    }

    pub fn from_toml(data: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.max_in_flight == 0 {
            return Err(ConfigError::Zero("run.max_in_flight"));
        }
        if self.run.max_fetches_per_entry == 0 {
            return Err(ConfigError::Zero("run.max_fetches_per_entry"));
        }
        if self.http.request_timeout_secs == 0 {
            return Err(ConfigError::Zero("http.request_timeout_secs"));
        }
        if self.http.connect_timeout_secs == 0 {
            return Err(ConfigError::Zero("http.connect_timeout_secs"));
        }
        if self.file_extension.is_empty() || self.file_extension.contains(['/', '\\']) {
            return Err(ConfigError::Extension);
        }
        Ok(())
    }
}
