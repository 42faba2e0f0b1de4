//! Engine configuration
//!
//! One YAML file with a section per component. Every field has a default,
//! so an empty file (or no file) yields the stock engine.
//!
//! ```yaml
//! gate:
//!   merge_threshold: 0.70
//!   update_threshold: 0.85
//! merge:
//!   resolution: prefer_existing
//!   polarity:
//!     opposing_pairs:
//!       - [increase, decrease]
//! index:
//!   dimensions: 384
//! ```

use crate::gate::GateConfig;
use crate::index::DEFAULT_DIMENSIONS;
use crate::merge::MergeConfig;
use crate::similarity::ScoringConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CONSOLIDATOR_CONFIG";

/// Invalid or unreadable configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("merge_threshold ({merge:.2}) must not exceed update_threshold ({update:.2})")]
    Thresholds { merge: f32, update: f32 },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Embedding index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Vector dimensionality; must match the embedder
    pub dimensions: usize,
    /// SQLite file; in-memory index when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            path: None,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub gate: GateConfig,
    pub scoring: ScoringConfig,
    pub merge: MergeConfig,
    pub index: IndexConfig,
    /// JSON-lines audit log; no audit trail when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl ConsolidationConfig {
    /// Parse and validate YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let config: ConsolidationConfig = if yaml.trim().is_empty() {
            ConsolidationConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.gate.validate()?;
        self.scoring.validate()?;
        self.merge.validate()?;
        if self.index.dimensions == 0 {
            return Err(ConfigurationError::Invalid(
                "index.dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigurationError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Where to look for a config file: explicit path, then the environment
/// variable, then the per-user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("consolidator").join("config.yaml"))
        .filter(|path| path.exists())
}
