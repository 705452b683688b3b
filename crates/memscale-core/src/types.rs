//! Domain types for the memscale controller.
//!
//! These types represent memory samples, the worker roster, scaling
//! decisions, and the assembled status view. All types serialize to
//! JSON for the REST surface.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable logical identity of a worker, independent of its OS process.
pub type WorkerId = u64;

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ── Memory ────────────────────────────────────────────────────────

/// Point-in-time snapshot of host memory.
///
/// Produced fresh on every sampling tick and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    /// Unix timestamp (seconds) when the sample was captured.
    pub captured_at: u64,
}

impl MemorySample {
    /// Used memory as a percentage of total.
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.used_bytes as f64 / self.total_bytes as f64) * 100.0
        }
    }
}

// ── Workers ───────────────────────────────────────────────────────

/// Lifecycle state of a single worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, inside the startup liveness window.
    Starting,
    /// Confirmed alive and doing work.
    Running,
    /// Cooperative stop requested, exit not yet observed.
    Draining,
    /// Exited after a stop request.
    Stopped,
    /// Exited without a stop request.
    Crashed,
}

/// One entry in the worker roster.
///
/// Owned exclusively by the worker pool; other components only see
/// cloned snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    /// OS process id of the worker.
    pub pid: u32,
    /// Unix timestamp (seconds) when the process was spawned.
    pub started_at: u64,
    pub state: WorkerState,
    /// Resident memory of the worker process at the last status
    /// publish; advisory, zero until first measured.
    #[serde(default)]
    pub memory_bytes: u64,
    /// CPU usage of the worker process at the last status publish.
    #[serde(default)]
    pub cpu_percent: f32,
}

// ── Scaling ───────────────────────────────────────────────────────

/// Why a scaling decision chose its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleReason {
    /// Memory-derived capacity fell below the configured minimum.
    BelowMinimum,
    /// Memory-derived capacity exceeded the configured maximum.
    AboveMaximum,
    /// Available memory is below the safety threshold, or shrank.
    MemoryPressure,
    /// Available memory allows more workers.
    MemoryHeadroom,
    /// Target equals the current count.
    NoChange,
    /// Target was set by a manual scale request.
    ManualOverride,
}

/// The per-tick output of the scaling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub current: u32,
    pub target: u32,
    pub reason: ScaleReason,
}

// ── Controller lifecycle ──────────────────────────────────────────

/// Lifecycle state of the controller itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Constructed but monitoring not started.
    Idle,
    /// Normal operation — sample, decide, reconcile.
    Running,
    /// Shutdown requested; workers asked to finish in-flight work.
    Draining,
    /// Grace period expired or urgent signal; workers force-killed.
    Terminating,
    /// All workers confirmed exited.
    Stopped,
}

// ── Status ────────────────────────────────────────────────────────

/// Configuration echo included in status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLimits {
    pub min_workers: u32,
    pub max_workers: u32,
    pub autoscaling_enabled: bool,
    pub sample_interval_secs: u64,
}

/// Read-only snapshot of the controller state.
///
/// Assembled by the status board after every tick; always the
/// best-known view, even when the latest sample failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub lifecycle: Lifecycle,
    /// Latest successful memory sample, if any.
    pub memory: Option<MemorySample>,
    pub workers: Vec<WorkerRecord>,
    pub last_decision: Option<ScalingDecision>,
    /// Most recent spawn failure, surfaced for visibility.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_spawn_error: Option<String>,
    pub limits: PoolLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_percent_of_half_full_sample() {
        let sample = MemorySample {
            total_bytes: 64 * 1024 * 1024 * 1024,
            used_bytes: 32 * 1024 * 1024 * 1024,
            available_bytes: 32 * 1024 * 1024 * 1024,
            captured_at: 1000,
        };
        assert_eq!(sample.used_percent(), 50.0);
    }

    #[test]
    fn used_percent_handles_zero_total() {
        let sample = MemorySample {
            total_bytes: 0,
            used_bytes: 0,
            available_bytes: 0,
            captured_at: 1000,
        };
        assert_eq!(sample.used_percent(), 0.0);
    }

    #[test]
    fn worker_state_serializes_snake_case() {
        let json = serde_json::to_string(&WorkerState::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
    }

    #[test]
    fn scale_reason_round_trips() {
        let json = serde_json::to_string(&ScaleReason::MemoryPressure).unwrap();
        let back: ScaleReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ScaleReason::MemoryPressure);
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        // Should be after 2024-01-01.
        assert!(epoch_secs() > 1_704_067_200);
    }
}
