//! # Sync Configuration
//!
//! Engine configuration: retry/backoff constants, cycle timing, and remote
//! call bounds. Everything here is configuration rather than hardcoded -
//! backoff parameters in particular are deployment-tunable.
//!
//! ## Configuration File Format
//! ```toml
//! # sync.toml
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 500
//! max_delay_secs = 60
//! jitter_ratio = 0.2
//!
//! [cycle]
//! poll_interval_secs = 30
//! remote_timeout_secs = 30
//! pull_page_size = 100
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use fable_core::BackoffPolicy;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Retry Settings
// =============================================================================

/// Retry and backoff tuning for the operation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts before an operation is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure (milliseconds).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the backoff delay (seconds).
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Jitter amplitude as a fraction of the delay.
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_secs() -> u64 {
    60
}

fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetrySettings {
    /// Builds the pure backoff policy these settings describe.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_secs(self.max_delay_secs),
            self.jitter_ratio,
        )
    }
}

// =============================================================================
// Cycle Settings
// =============================================================================

/// Reconcile cycle timing and remote call bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSettings {
    /// Interval between periodic reconcile cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bounded timeout for each in-flight remote call (seconds).
    /// Timeouts count as transient failures.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Maximum remote changes requested per pull page.
    #[serde(default = "default_pull_page_size")]
    pub pull_page_size: usize,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_remote_timeout() -> u64 {
    30
}

fn default_pull_page_size() -> usize {
    100
}

impl Default for CycleSettings {
    fn default() -> Self {
        CycleSettings {
            poll_interval_secs: default_poll_interval(),
            remote_timeout_secs: default_remote_timeout(),
            pull_page_size: default_pull_page_size(),
        }
    }
}

// =============================================================================
// Sync Config
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cycle: CycleSettings,
}

impl SyncConfig {
    /// Loads config from `path`, or from the platform config directory,
    /// falling back to defaults when no file exists.
    pub fn load_or_default(path: Option<PathBuf>) -> Self {
        let path = path.or_else(default_config_path);

        let Some(path) = path else {
            debug!("No config path available, using defaults");
            return SyncConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str::<SyncConfig>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "Loaded sync config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Invalid sync config, using defaults");
                    SyncConfig::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "No sync config file, using defaults");
                SyncConfig::default()
            }
        }
    }

    /// Writes the config to `path` as TOML.
    pub fn save(&self, path: &PathBuf) -> SyncResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        std::fs::write(path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(path = %path.display(), "Saved sync config");
        Ok(())
    }

    /// Validates the configuration before the engine starts.
    pub fn validate(&self) -> SyncResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "retry.base_delay_ms must be positive".into(),
            ));
        }

        if !(0.0..0.33).contains(&self.retry.jitter_ratio) {
            return Err(SyncError::InvalidConfig(
                "retry.jitter_ratio must be in [0.0, 0.33)".into(),
            ));
        }

        if self.cycle.remote_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "cycle.remote_timeout_secs must be positive".into(),
            ));
        }

        if self.cycle.pull_page_size == 0 {
            return Err(SyncError::InvalidConfig(
                "cycle.pull_page_size must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Remote call timeout as a `Duration`.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle.remote_timeout_secs)
    }

    /// Periodic cycle interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.cycle.poll_interval_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "fable", "fable-studio")
        .map(|dirs| dirs.config_dir().join("sync.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let mut config = SyncConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_jitter() {
        let mut config = SyncConfig::default();
        config.retry.jitter_ratio = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, default_base_delay_ms());
        assert_eq!(config.cycle.poll_interval_secs, default_poll_interval());
    }

    #[test]
    fn test_backoff_policy_reflects_settings() {
        let settings = RetrySettings {
            base_delay_ms: 250,
            max_delay_secs: 10,
            jitter_ratio: 0.0,
            max_attempts: 5,
        };
        let policy = settings.backoff_policy();
        assert_eq!(policy.delay_for(1, "op"), Duration::from_millis(250));
        assert_eq!(policy.delay_for(2, "op"), Duration::from_millis(500));
    }
}
