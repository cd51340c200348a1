//! Configuration loading for mirror-engine.
//!
//! Configuration is loaded from a TOML file; every field has a default so
//! an empty file (or no file at all) yields a working engine.

use crate::error::EngineError;
use mirror_core::LeaseTiming;
use serde::Deserialize;
use std::path::Path;

/// Root configuration for the engine.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Lease protocol timing.
    #[serde(default)]
    pub lease: LeaseConfig,
    /// Write queue behavior.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Lease protocol timing.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseConfig {
    /// Claim duration written into the lock object (default: 30s).
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Grace period between claim write and confirming re-read (default: 2s).
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Lower bound of the contention jitter window (default: 500ms).
    #[serde(default = "default_min_contention_delay_ms")]
    pub min_contention_delay_ms: u64,
    /// Upper bound of the contention jitter window (default: 3s).
    #[serde(default = "default_max_contention_delay_ms")]
    pub max_contention_delay_ms: u64,
    /// Fixed delay before retrying a failed lock write (default: 3s).
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
}

impl LeaseConfig {
    /// The timing parameters as the pure lease machine wants them.
    pub fn timing(&self) -> LeaseTiming {
        LeaseTiming {
            duration_ms: self.duration_ms,
            grace_ms: self.grace_ms,
            min_contention_delay_ms: self.min_contention_delay_ms,
            max_contention_delay_ms: self.max_contention_delay_ms,
            write_retry_delay_ms: self.write_retry_delay_ms,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            grace_ms: default_grace_ms(),
            min_contention_delay_ms: default_min_contention_delay_ms(),
            max_contention_delay_ms: default_max_contention_delay_ms(),
            write_retry_delay_ms: default_write_retry_delay_ms(),
        }
    }
}

/// Write queue behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Minimum delay between manifest-persist epilogue runs (default: 1s).
    #[serde(default = "default_epilogue_delay_ms")]
    pub epilogue_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            epilogue_delay_ms: default_epilogue_delay_ms(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| EngineError::Config(format!("read {}: {}", path.as_ref().display(), e)))?;
        Self::parse(&text)
    }

    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }
}

// Default value functions
fn default_duration_ms() -> u64 {
    30_000
}

fn default_grace_ms() -> u64 {
    2_000
}

fn default_min_contention_delay_ms() -> u64 {
    500
}

fn default_max_contention_delay_ms() -> u64 {
    3_000
}

fn default_write_retry_delay_ms() -> u64 {
    3_000
}

fn default_epilogue_delay_ms() -> u64 {
    1_000
}
