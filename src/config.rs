//! File-based configuration.
//!
//! One TOML file carries every section; missing sections and keys fall back
//! to their defaults.

use crate::analysis::ExposureTargets;
use crate::control::ControllerConfig;
use crate::stream::{ConfigError, StreamConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the Prometheus exporter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Port for the HTTP exporter; 0 disables it.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

/// Everything the CLI reads from `--config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub stream: StreamConfig,
    pub controller: ControllerConfig,
    pub targets: ExposureTargets,
    pub metrics: MetricsConfig,
}

impl FileConfig {
    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stream.validate()?;
        self.controller.validate()?;
        self.targets.validate()
    }
}
