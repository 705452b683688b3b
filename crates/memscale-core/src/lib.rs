//! memscale-core — shared domain types for the memscale controller.
//!
//! These types flow between the sampler, the scaling policy, the worker
//! pool, and the control loop. They carry no behavior beyond derived
//! accessors; all mutation happens in the owning component.

pub mod config;
pub mod types;

pub use config::{Config, ConfigError};
pub use types::{
    Lifecycle, MemorySample, PoolLimits, ScaleReason, ScalingDecision, StatusView, WorkerId,
    WorkerRecord, WorkerState, epoch_secs,
};
