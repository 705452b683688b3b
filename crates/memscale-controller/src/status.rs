//! Status board — the read side of the controller.
//!
//! The control loop publishes after every tick and every roster event;
//! readers (REST handlers, CLI) take cheap snapshots. Critical sections
//! are a single field copy, so reads never contend with a tick for
//! long. Staleness is bounded by the sample interval.

use std::sync::Arc;

use tokio::sync::RwLock;

use memscale_core::{
    Config, Lifecycle, MemorySample, PoolLimits, ScalingDecision, StatusView, WorkerRecord,
};

#[derive(Debug)]
struct Inner {
    lifecycle: Lifecycle,
    memory: Option<MemorySample>,
    workers: Vec<WorkerRecord>,
    last_decision: Option<ScalingDecision>,
    last_spawn_error: Option<String>,
}

/// Shared, concurrently readable snapshot of controller state.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<RwLock<Inner>>,
    limits: PoolLimits,
}

impl StatusBoard {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                lifecycle: Lifecycle::Idle,
                memory: None,
                workers: Vec::new(),
                last_decision: None,
                last_spawn_error: None,
            })),
            limits: PoolLimits {
                min_workers: config.min_workers,
                max_workers: config.max_workers,
                autoscaling_enabled: config.autoscaling_enabled,
                sample_interval_secs: config.sample_interval.as_secs(),
            },
        }
    }

    /// Full status snapshot — always the best-known view.
    pub async fn snapshot(&self) -> StatusView {
        let inner = self.inner.read().await;
        StatusView {
            lifecycle: inner.lifecycle,
            memory: inner.memory,
            workers: inner.workers.clone(),
            last_decision: inner.last_decision,
            last_spawn_error: inner.last_spawn_error.clone(),
            limits: self.limits,
        }
    }

    /// Latest successful memory sample, if any tick has succeeded yet.
    pub async fn memory(&self) -> Option<MemorySample> {
        self.inner.read().await.memory
    }

    /// Current roster snapshot.
    pub async fn workers(&self) -> Vec<WorkerRecord> {
        self.inner.read().await.workers.clone()
    }

    // ── Write side (control loop only) ─────────────────────────────

    pub(crate) async fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.inner.write().await.lifecycle = lifecycle;
    }

    pub(crate) async fn set_memory(&self, sample: MemorySample) {
        self.inner.write().await.memory = Some(sample);
    }

    pub(crate) async fn set_decision(&self, decision: ScalingDecision) {
        self.inner.write().await.last_decision = Some(decision);
    }

    pub(crate) async fn set_workers(&self, workers: Vec<WorkerRecord>) {
        self.inner.write().await.workers = workers;
    }

    pub(crate) async fn set_spawn_error(&self, error: Option<String>) {
        self.inner.write().await.last_spawn_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memscale_core::{ScaleReason, WorkerState};

    fn board() -> StatusBoard {
        StatusBoard::new(&Config::default())
    }

    #[tokio::test]
    async fn fresh_board_is_idle_and_empty() {
        let board = board();
        let view = board.snapshot().await;

        assert_eq!(view.lifecycle, Lifecycle::Idle);
        assert!(view.memory.is_none());
        assert!(view.workers.is_empty());
        assert!(view.last_decision.is_none());
        assert_eq!(view.limits.min_workers, 1);
        assert_eq!(view.limits.max_workers, 6);
    }

    #[tokio::test]
    async fn published_state_is_visible_in_snapshot() {
        let board = board();

        let sample = MemorySample {
            total_bytes: 64,
            used_bytes: 32,
            available_bytes: 32,
            captured_at: 1000,
        };
        board.set_memory(sample).await;
        board.set_lifecycle(Lifecycle::Running).await;
        board
            .set_decision(ScalingDecision {
                current: 1,
                target: 3,
                reason: ScaleReason::MemoryHeadroom,
            })
            .await;
        board
            .set_workers(vec![WorkerRecord {
                id: 1,
                pid: 42,
                started_at: 1000,
                state: WorkerState::Running,
                memory_bytes: 0,
                cpu_percent: 0.0,
            }])
            .await;

        let view = board.snapshot().await;
        assert_eq!(view.lifecycle, Lifecycle::Running);
        assert_eq!(view.memory, Some(sample));
        assert_eq!(view.workers.len(), 1);
        assert_eq!(view.last_decision.unwrap().target, 3);
    }

    #[tokio::test]
    async fn memory_accessor_matches_snapshot() {
        let board = board();
        assert!(board.memory().await.is_none());

        let sample = MemorySample {
            total_bytes: 1,
            used_bytes: 0,
            available_bytes: 1,
            captured_at: 1,
        };
        board.set_memory(sample).await;
        assert_eq!(board.memory().await, Some(sample));
    }
}
