//! Structured logging setup.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    pub json_format: bool,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn from_settings(settings: &LoggingSettings, verbose: bool, json: bool) -> Self {
        let level = if verbose {
            Level::DEBUG
        } else {
            settings.level.parse().unwrap_or(Level::INFO)
        };

        Self {
            level,
            json_format: json || settings.json,
            include_target: true,
        }
    }

    fn default_directives(&self) -> String {
        format!(
            "dropout_early_warning={level},notifications={level},warn",
            level = self.level
        )
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured level.
/// Calling this twice is harmless; the second call is ignored.
pub fn init(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(config.include_target);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(config.include_target);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
    };

    if let Err(error) = result {
        tracing::debug!(%error, "logging already initialised");
    }
}
