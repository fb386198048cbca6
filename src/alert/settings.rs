//! Persistent alert settings document.

use super::AlertConfig;
use crate::reading::Metric;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Alert settings I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid alert settings in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// All alert configuration, saved and loaded as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Master switch. Nothing is evaluated while this is off.
    #[serde(default)]
    pub enabled: bool,
    /// Also notify when a metric returns within bounds
    #[serde(default)]
    pub recovery_notices: bool,
    #[serde(default)]
    pub thresholds: BTreeMap<Metric, AlertConfig>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            recovery_notices: false,
            thresholds: Metric::ALL
                .into_iter()
                .map(|metric| (metric, default_config(metric)))
                .collect(),
        }
    }
}

fn default_config(metric: Metric) -> AlertConfig {
    let (low, high) = match metric {
        Metric::Co2 => (None, Some(1000.0)),
        Metric::Temperature => (Some(10.0), Some(30.0)),
        Metric::Humidity => (Some(30.0), Some(70.0)),
    };
    AlertConfig {
        enabled: false,
        ..AlertConfig::new(low, high)
    }
}

impl AlertSettings {
    /// Add default configs for metrics the document does not mention.
    /// Returns whether anything was added.
    pub fn fill_missing(&mut self) -> bool {
        let mut added = false;
        for metric in Metric::ALL {
            self.thresholds.entry(metric).or_insert_with(|| {
                added = true;
                default_config(metric)
            });
        }
        added
    }
}

/// Location of the settings document on disk.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the settings, creating the file with defaults if it does not exist.
    pub fn load(&self) -> Result<AlertSettings, SettingsError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Writing default alert settings");
                let settings = AlertSettings::default();
                self.save(&settings)?;
                return Ok(settings);
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let mut settings: AlertSettings =
            serde_json::from_str(&contents).map_err(|source| SettingsError::Json {
                path: self.path.clone(),
                source,
            })?;
        if settings.fill_missing() {
            debug!(path = %self.path.display(), "Filled missing alert metrics with defaults");
        }
        Ok(settings)
    }

    /// Replace the document atomically: write a sibling temp file, then rename it over.
    pub fn save(&self, settings: &AlertSettings) -> Result<(), SettingsError> {
        let json =
            serde_json::to_string_pretty(settings).map_err(|source| SettingsError::Json {
                path: self.path.clone(),
                source,
            })?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
