//! Controller configuration.
//!
//! Built once at process start, validated, and then immutable. Invalid
//! configuration is fatal: the controller refuses to start rather than
//! run with undefined bounds.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const GIB: u64 = 1024 * 1024 * 1024;

/// All knobs of the controller. Immutable after [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Lower bound on the worker count, kept even under memory pressure.
    pub min_workers: u32,
    /// Hard upper bound on the worker count.
    pub max_workers: u32,
    /// Below this much available memory, one worker is shed per tick.
    pub memory_threshold_bytes: u64,
    /// Assumed per-worker footprint used in capacity math. Zero means
    /// "no memory-derived limit".
    pub worker_memory_limit_bytes: u64,
    /// Memory withheld from the worker-capacity calculation for the OS
    /// and co-resident services.
    pub system_reserve_bytes: u64,
    /// Cadence of the sample → decide → reconcile cycle.
    pub sample_interval: Duration,
    /// How long draining workers get before being force-killed.
    pub shutdown_grace_period: Duration,
    /// When false, the loop still samples and reports but only manual
    /// overrides change the worker count.
    pub autoscaling_enabled: bool,
    /// Program and arguments each worker process runs. Opaque to the
    /// controller.
    pub worker_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 6,
            memory_threshold_bytes: 8 * GIB,
            worker_memory_limit_bytes: 4 * GIB,
            system_reserve_bytes: 4 * GIB,
            sample_interval: Duration::from_secs(30),
            shutdown_grace_period: Duration::from_secs(30),
            autoscaling_enabled: true,
            worker_command: Vec::new(),
        }
    }
}

impl Config {
    /// Check startup invariants.
    ///
    /// Byte and time quantities are unsigned by construction; what is
    /// left to check is the worker bounds, a non-zero tick cadence, and
    /// that there is something to spawn.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_workers > self.max_workers {
            return Err(ConfigError::MinAboveMax {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.worker_command.is_empty() {
            return Err(ConfigError::EmptyWorkerCommand);
        }
        Ok(())
    }
}

/// Errors raised by [`Config::validate`]. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_workers ({min}) exceeds max_workers ({max})")]
    MinAboveMax { min: u32, max: u32 },

    #[error("sample_interval must be non-zero")]
    ZeroSampleInterval,

    #[error("worker_command must not be empty")]
    EmptyWorkerCommand,
}
