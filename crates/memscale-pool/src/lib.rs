//! memscale-pool — ownership and lifecycle of worker processes.
//!
//! The [`WorkerPool`] is the single owner of the worker roster. The
//! control loop drives it through [`WorkerPool::reconcile`]; exit
//! confirmation arrives out-of-band from a per-worker watcher task and
//! is reported back to the loop as [`WorkerExit`] events.

pub mod pool;
mod process;

pub use pool::{ReconcileResult, SpawnError, WorkerExit, WorkerPool};
