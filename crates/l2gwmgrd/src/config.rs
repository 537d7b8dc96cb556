//! Configuration file support for l2gwmgrd.
//!
//! Loads and validates l2gwmgrd configuration from TOML files.
//! Default location: /etc/sonic/l2gwmgrd.toml

use serde::{Deserialize, Serialize};
use sonic_l2gw_common::{JobCoordinatorConfig, RetryPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{L2gwError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/l2gwmgrd.toml";

/// Job coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSection {
    /// Attempts per job before it is dropped
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,

    /// Base retry delay in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Multiplier applied to the base delay
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: u32,
}

/// ELAN job configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElanSection {
    /// Delay before an unused logical switch is deleted, in seconds
    #[serde(default = "default_ls_delete_delay")]
    pub logical_switch_delete_delay_secs: u64,

    /// Run state jobs only on the cluster owner of their key
    #[serde(default = "default_owner_only_jobs")]
    pub owner_only_jobs: bool,
}

/// Validation report configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSection {
    /// Keys listed per report line
    #[serde(default = "default_display_limit")]
    pub display_limit: usize,

    /// Report destination; stdout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
}

/// Complete l2gwmgrd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2gwConfig {
    #[serde(default)]
    pub coordinator: CoordinatorSection,

    #[serde(default)]
    pub elan: ElanSection,

    #[serde(default)]
    pub validation: ValidationSection,
}

fn default_max_retries() -> u32 {
    JobCoordinatorConfig::DEFAULT_MAX_RETRIES
}

fn default_retry_base_delay() -> u64 {
    100
}

fn default_retry_multiplier() -> u32 {
    RetryPolicy::DEFAULT_MULTIPLIER
}

fn default_ls_delete_delay() -> u64 {
    20
}

fn default_owner_only_jobs() -> bool {
    true
}

fn default_display_limit() -> usize {
    10
}

impl Default for CoordinatorSection {
    fn default() -> Self {
        Self {
            default_max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_multiplier: default_retry_multiplier(),
        }
    }
}

impl Default for ElanSection {
    fn default() -> Self {
        Self {
            logical_switch_delete_delay_secs: default_ls_delete_delay(),
            owner_only_jobs: default_owner_only_jobs(),
        }
    }
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            display_limit: default_display_limit(),
            report_path: None,
        }
    }
}

impl L2gwConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                L2gwError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(L2gwError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| L2gwError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Coordinator settings derived from the `[coordinator]` section
    pub fn coordinator_config(&self) -> JobCoordinatorConfig {
        JobCoordinatorConfig::default()
            .with_max_retries(self.coordinator.default_max_retries)
            .with_retry_policy(RetryPolicy::new(
                Duration::from_millis(self.coordinator.retry_base_delay_ms),
                self.coordinator.retry_multiplier,
            ))
    }

    /// Get logical switch deletion delay as Duration
    pub fn logical_switch_delete_delay(&self) -> Duration {
        Duration::from_secs(self.elan.logical_switch_delete_delay_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.default_max_retries == 0 {
            return Err(L2gwError::Config(
                "default_max_retries must be > 0".to_string(),
            ));
        }

        if self.coordinator.retry_multiplier == 0 {
            return Err(L2gwError::Config(
                "retry_multiplier must be > 0".to_string(),
            ));
        }

        if self.validation.display_limit == 0 {
            return Err(L2gwError::Config(
                "display_limit must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
