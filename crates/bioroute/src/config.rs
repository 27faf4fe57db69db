//! Orchestrator configuration, loaded from TOML.
//!
//! Every field carries a serde default so a partial file works; a missing
//! file yields the built-in defaults with a debug note rather than an
//! error.

use crate::cache::{CacheConfig, DEFAULT_CAPACITY, DEFAULT_MAX_AGE_MS, DEFAULT_PERSIST_PROBABILITY};
use crate::cascade::CascadeConfig;
use crate::error::OrchestratorError;
use crate::feedback::FeedbackConfig;
use crate::predictor::PREWARM_CONFIDENCE_FLOOR;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cache: CacheSection,
    pub feedback: FeedbackSection,
    pub cascade: CascadeSection,
    pub selector: SelectorSection,
    pub prewarm: PrewarmSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub capacity: usize,
    pub max_age_ms: i64,
    pub persist_probability: f64,
    /// Snapshot file; None keeps the cache purely in memory
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age_ms: DEFAULT_MAX_AGE_MS,
            persist_probability: DEFAULT_PERSIST_PROBABILITY,
            snapshot_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSection {
    pub cap_per_backend: usize,
    pub retention_days: u64,
    pub persist_probability: f64,
    pub persist_path: Option<PathBuf>,
}

impl Default for FeedbackSection {
    fn default() -> Self {
        Self {
            cap_per_backend: 1000,
            retention_days: 7,
            persist_probability: 0.1,
            persist_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeSection {
    pub remote_timeout_secs: u64,
    pub database_timeout_secs: u64,
    pub local_timeout_secs: u64,
}

impl Default for CascadeSection {
    fn default() -> Self {
        Self {
            remote_timeout_secs: 45,
            database_timeout_secs: 30,
            local_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSection {
    pub max_backends: usize,
    pub history_window_secs: u64,
}

impl Default for SelectorSection {
    fn default() -> Self {
        Self {
            max_backends: 5,
            history_window_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrewarmSection {
    pub enabled: bool,
    pub confidence_floor: f64,
}

impl Default for PrewarmSection {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_floor: PREWARM_CONFIDENCE_FLOOR,
        }
    }
}

/// Default config location: `<config dir>/bioroute/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bioroute").join("config.toml"))
}

/// Default directory for cache snapshots and feedback logs.
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("bioroute"))
}

impl OrchestratorConfig {
    /// Read from a TOML file; a missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)
            .map_err(|e| OrchestratorError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            capacity: self.cache.capacity,
            max_age_ms: self.cache.max_age_ms,
            persist_probability: self.cache.persist_probability,
        }
    }

    pub fn feedback_config(&self) -> FeedbackConfig {
        FeedbackConfig {
            cap_per_backend: self.feedback.cap_per_backend,
            retention: Duration::from_secs(self.feedback.retention_days * 24 * 3600),
            persist_probability: self.feedback.persist_probability,
            persist_path: self.feedback.persist_path.clone(),
        }
    }

    pub fn cascade_config(&self) -> CascadeConfig {
        CascadeConfig {
            remote_timeout: Duration::from_secs(self.cascade.remote_timeout_secs),
            database_timeout: Duration::from_secs(self.cascade.database_timeout_secs),
            local_timeout: Duration::from_secs(self.cascade.local_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.cascade.remote_timeout_secs, 45);
        assert_eq!(config.selector.max_backends, 5);
        assert!(config.prewarm.enabled);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = OrchestratorConfig::load("/nonexistent/bioroute.toml").unwrap();
        assert_eq!(config.feedback.retention_days, 7);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cascade]\nremote_timeout_secs = 10\n").unwrap();

        let config = OrchestratorConfig::load(&path).unwrap();
        assert_eq!(config.cascade.remote_timeout_secs, 10);
        assert_eq!(config.cascade.database_timeout_secs, 30);
        assert_eq!(config.cache.capacity, 1000);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "cache = \"not a table\"").unwrap();
        assert!(OrchestratorConfig::load(&path).is_err());
    }

    #[test]
    fn test_default_paths_point_at_bioroute() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("bioroute/config.toml"));
        }
        if let Some(dir) = default_state_dir() {
            assert!(dir.ends_with("bioroute"));
        }
    }

    #[test]
    fn test_conversions() {
        let config = OrchestratorConfig::default();
        assert_eq!(
            config.cascade_config().remote_timeout,
            Duration::from_secs(45)
        );
        assert_eq!(
            config.feedback_config().retention,
            Duration::from_secs(7 * 24 * 3600)
        );
    }
}
