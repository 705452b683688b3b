//! memscale-sampler — host memory snapshots.
//!
//! [`SystemSampler`] re-reads current total/used/available memory from
//! the OS on every call; nothing is cached between calls. The
//! [`Sampler`] trait is the seam the control loop depends on, so tests
//! can substitute a scripted sampler.

use std::collections::HashMap;
use std::sync::Mutex;

use sysinfo::{
    MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System,
};
use thiserror::Error;
use tracing::trace;

use memscale_core::{MemorySample, epoch_secs};

/// Resource usage of a single process.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessStats {
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// CPU usage since the previous probe; zero on the first probe.
    pub cpu_percent: f32,
}

/// A source of fresh memory samples.
pub trait Sampler: Send + Sync {
    /// Capture the current memory state of the host.
    fn sample(&self) -> Result<MemorySample, SampleError>;

    /// Per-process usage for the given pids. Advisory: pids that
    /// cannot be probed are simply absent from the result.
    fn process_stats(&self, pids: &[u32]) -> HashMap<u32, ProcessStats> {
        let _ = pids;
        HashMap::new()
    }
}

/// Errors from reading host memory state.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The host memory API reported nothing usable.
    #[error("host memory statistics unavailable")]
    Unavailable,
}

/// [`Sampler`] backed by the OS via `sysinfo`.
pub struct SystemSampler {
    // sysinfo wants &mut for refresh; the mutex keeps `sample` callable
    // from a shared reference.
    system: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
        );
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for SystemSampler {
    fn sample(&self) -> Result<MemorySample, SampleError> {
        let mut system = self.system.lock().map_err(|_| SampleError::Unavailable)?;
        system.refresh_memory();

        let total_bytes = system.total_memory();
        if total_bytes == 0 {
            return Err(SampleError::Unavailable);
        }

        let sample = MemorySample {
            total_bytes,
            used_bytes: system.used_memory(),
            available_bytes: system.available_memory(),
            captured_at: epoch_secs(),
        };
        trace!(
            total = sample.total_bytes,
            available = sample.available_bytes,
            "memory sampled"
        );
        Ok(sample)
    }

    fn process_stats(&self, pids: &[u32]) -> HashMap<u32, ProcessStats> {
        let Ok(mut system) = self.system.lock() else {
            return HashMap::new();
        };

        let sysinfo_pids: Vec<Pid> = pids.iter().map(|&p| Pid::from_u32(p)).collect();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&sysinfo_pids),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );

        pids.iter()
            .filter_map(|&pid| {
                system.process(Pid::from_u32(pid)).map(|process| {
                    (
                        pid,
                        ProcessStats {
                            memory_bytes: process.memory(),
                            cpu_percent: process.cpu_usage(),
                        },
                    )
                })
            })
            .collect()
    }
}
