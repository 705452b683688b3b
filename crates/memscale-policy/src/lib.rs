//! memscale-policy — the scaling decision function.
//!
//! Pure and deterministic: a memory sample, the current worker count,
//! and the configured bounds go in; a target count and a reason come
//! out. No state, no I/O, no hysteresis — every tick decides
//! independently.
//!
//! # Algorithm
//!
//! ```text
//! usable    = available - system_reserve          (floored at 0)
//! by_memory = usable / worker_memory_limit        (truncating)
//! target    = clamp(by_memory, min, max)
//!
//! if available < memory_threshold:
//!     target = max(min, target - 1)               (one-step-down penalty)
//! ```
//!
//! Truncating division favors caution — the worker count is never
//! rounded up. A zero `worker_memory_limit_bytes` means "no
//! memory-derived limit" and yields `max_workers` before clamping.

use memscale_core::{Config, MemorySample, ScaleReason, ScalingDecision};

/// Compute the target worker count for one tick.
pub fn decide(sample: &MemorySample, current: u32, config: &Config) -> ScalingDecision {
    let usable = sample
        .available_bytes
        .saturating_sub(config.system_reserve_bytes);

    let by_memory = if config.worker_memory_limit_bytes == 0 {
        // Misconfigured limit: fall back to the hard upper bound
        // instead of dividing by zero.
        u64::from(config.max_workers)
    } else {
        usable / config.worker_memory_limit_bytes
    };

    let (mut target, clamp_reason) = if by_memory > u64::from(config.max_workers) {
        (config.max_workers, Some(ScaleReason::AboveMaximum))
    } else if by_memory < u64::from(config.min_workers) {
        (config.min_workers, Some(ScaleReason::BelowMinimum))
    } else {
        (by_memory as u32, None)
    };

    let under_threshold = sample.available_bytes < config.memory_threshold_bytes;
    if under_threshold {
        target = target.saturating_sub(1).max(config.min_workers);
    }

    // Reason precedence: the threshold penalty wins, then whichever
    // clamp fired, then comparison against the current count.
    let reason = if under_threshold {
        ScaleReason::MemoryPressure
    } else if let Some(clamped) = clamp_reason {
        clamped
    } else if target == current {
        ScaleReason::NoChange
    } else if target > current {
        ScaleReason::MemoryHeadroom
    } else {
        ScaleReason::MemoryPressure
    };

    ScalingDecision {
        current,
        target,
        reason,
    }
}
