//! Configuration loading for the dashboard CLI.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dashboard::DEFAULT_FETCH_LIMIT;
use crate::error::ConfigError;
use crate::request::StalePolicy;
use crate::rules::RuleTable;

pub const API_URL_ENV: &str = "DROPOUT_API_URL";
pub const TIMEOUT_ENV: &str = "DROPOUT_API_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base URL of the dashboard backend.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Population cap sent to the dashboard endpoint. The backend truncates
    /// in its own risk order, so this must cover the whole cohort; the
    /// CLI `--limit` is applied locally after reassessment.
    #[serde(default = "default_dashboard_limit")]
    pub dashboard_limit: usize,

    #[serde(default)]
    pub stale_responses: StalePolicy,

    #[serde(default)]
    pub rules: RuleTable,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_dashboard_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout(),
            dashboard_limit: default_dashboard_limit(),
            stale_responses: StalePolicy::default(),
            rules: RuleTable::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(API_URL_ENV).filter(|url| !url.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(TIMEOUT_ENV) {
            self.timeout_secs = raw.trim().parse().with_context(|| {
                format!("{TIMEOUT_ENV} must be a whole number of seconds, got {raw:?}")
            })?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.trim().is_empty() {
            return Err(ConfigError::MissingApiUrl);
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.dashboard_limit == 0 {
            return Err(ConfigError::ZeroFetchLimit);
        }
        self.rules.validate()
    }
}
