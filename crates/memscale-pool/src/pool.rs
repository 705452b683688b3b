//! The worker pool — authoritative roster of live worker processes.
//!
//! All roster mutation from the control loop goes through `&self`
//! methods whose critical sections are brief; per-worker watcher tasks
//! update the same roster when an exit is observed. The pool never
//! blocks on a worker's exit — stop requests are issued and the
//! confirmation arrives later as a [`WorkerExit`] event.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use memscale_core::{Config, ScalingDecision, WorkerId, WorkerRecord, WorkerState, epoch_secs};

use crate::process;

/// How long a fresh worker must survive before it counts as Running.
/// Death inside this window is still a crash, observed from `Starting`.
const STARTUP_LIVENESS_WINDOW: Duration = Duration::from_secs(2);

/// Exit confirmation for a single worker, reported by its watcher task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub id: WorkerId,
    /// `Stopped` when a stop had been requested, `Crashed` otherwise.
    pub state: WorkerState,
}

/// A worker process could not be created.
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("worker command is empty")]
    EmptyCommand,

    #[error("failed to spawn worker process: {0}")]
    Io(#[from] std::io::Error),

    #[error("spawned worker reported no pid")]
    MissingPid,
}

/// Outcome of one reconcile pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Workers spawned this pass.
    pub spawned: u32,
    /// Workers sent a cooperative stop this pass.
    pub stopping: u32,
    /// Individual spawn failures (non-fatal; retried next tick).
    pub spawn_failures: u32,
    /// Message of the most recent spawn failure, for status visibility.
    pub last_spawn_error: Option<String>,
}

type Roster = Arc<RwLock<BTreeMap<WorkerId, WorkerRecord>>>;

/// Owns the worker roster and the mechanics of growing/shrinking it.
pub struct WorkerPool {
    config: Arc<Config>,
    roster: Roster,
    next_id: AtomicU64,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
}

impl WorkerPool {
    /// Create an empty pool. The returned receiver yields one
    /// [`WorkerExit`] per observed worker exit.
    pub fn new(config: Arc<Config>) -> (Self, mpsc::UnboundedReceiver<WorkerExit>) {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let pool = Self {
            config,
            roster: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            exit_tx,
        };
        (pool, exit_rx)
    }

    /// Number of roster entries (any state that has not exited yet).
    pub async fn worker_count(&self) -> u32 {
        self.roster.read().await.len() as u32
    }

    /// Read-only snapshot of the roster, ordered by worker id.
    pub async fn roster(&self) -> Vec<WorkerRecord> {
        self.roster.read().await.values().cloned().collect()
    }

    /// Drive the roster toward the decision's target count.
    ///
    /// Spawn failures are logged and skipped — the shortfall is
    /// corrected on the next tick rather than retried in a loop here.
    pub async fn reconcile(&self, decision: &ScalingDecision) -> ReconcileResult {
        let current = self.worker_count().await;
        let mut result = ReconcileResult::default();

        if decision.target > current {
            for _ in 0..(decision.target - current) {
                match self.spawn_one().await {
                    Ok(_) => result.spawned += 1,
                    Err(e) => {
                        warn!(error = %e, "worker spawn failed, will retry next tick");
                        result.spawn_failures += 1;
                        result.last_spawn_error = Some(e.to_string());
                    }
                }
            }
        } else if decision.target < current {
            result.stopping = self.stop_workers(current - decision.target).await;
        }

        result
    }

    /// Spawn a single worker and register its watcher task.
    pub async fn spawn_one(&self) -> Result<WorkerId, SpawnError> {
        let (program, args) = self
            .config
            .worker_command
            .split_first()
            .ok_or(SpawnError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()?;
        let pid = child.id().ok_or(SpawnError::MissingPid)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = WorkerRecord {
            id,
            pid,
            started_at: epoch_secs(),
            state: WorkerState::Starting,
            memory_bytes: 0,
            cpu_percent: 0.0,
        };

        {
            let mut roster = self.roster.write().await;
            roster.insert(id, record);
        }

        let roster = self.roster.clone();
        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            watch_worker(id, child, roster, exit_tx).await;
        });

        info!(worker_id = id, pid, "worker spawned");
        Ok(id)
    }

    /// Ask `count` workers to stop, most-recently-started first.
    ///
    /// Returns the number of workers actually transitioned to Draining.
    /// Only issues the stop request — exit is observed by the watcher.
    pub async fn stop_workers(&self, count: u32) -> u32 {
        let mut roster = self.roster.write().await;

        // LIFO eviction: ids are monotonic, so the highest active ids
        // are the most recently started.
        let victims: Vec<WorkerId> = roster
            .values()
            .filter(|r| matches!(r.state, WorkerState::Starting | WorkerState::Running))
            .map(|r| r.id)
            .rev()
            .take(count as usize)
            .collect();

        let mut stopping = 0;
        for id in victims {
            if let Some(record) = roster.get_mut(&id) {
                record.state = WorkerState::Draining;
                if let Err(e) = process::send_term(record.pid) {
                    warn!(worker_id = id, pid = record.pid, error = %e, "stop signal failed");
                } else {
                    info!(worker_id = id, pid = record.pid, "worker draining");
                }
                stopping += 1;
            }
        }
        stopping
    }

    /// Send every worker a cooperative stop request.
    pub async fn drain_all(&self) -> u32 {
        let count = self.worker_count().await;
        self.stop_workers(count).await
    }

    /// Force-kill every worker still on the roster.
    ///
    /// Workers are marked Draining first so their exit resolves to
    /// `Stopped` rather than `Crashed`.
    pub async fn kill_all(&self) -> u32 {
        let mut roster = self.roster.write().await;
        let mut killed = 0;
        for record in roster.values_mut() {
            record.state = WorkerState::Draining;
            if let Err(e) = process::send_kill(record.pid) {
                warn!(worker_id = record.id, pid = record.pid, error = %e, "kill signal failed");
            } else {
                warn!(worker_id = record.id, pid = record.pid, "worker force-killed");
            }
            killed += 1;
        }
        killed
    }
}

/// Per-worker watcher: promotes Starting → Running after the startup
/// window, then waits for the process to exit and settles the record.
async fn watch_worker(
    id: WorkerId,
    mut child: Child,
    roster: Roster,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
) {
    tokio::select! {
        status = child.wait() => {
            settle_exit(id, status, &roster, &exit_tx).await;
            return;
        }
        _ = tokio::time::sleep(STARTUP_LIVENESS_WINDOW) => {
            let mut roster_guard = roster.write().await;
            if let Some(record) = roster_guard.get_mut(&id)
                && record.state == WorkerState::Starting
            {
                record.state = WorkerState::Running;
                debug!(worker_id = id, "worker running");
            }
        }
    }

    let status = child.wait().await;
    settle_exit(id, status, &roster, &exit_tx).await;
}

/// Remove the record and report the exit as Stopped or Crashed.
async fn settle_exit(
    id: WorkerId,
    status: std::io::Result<std::process::ExitStatus>,
    roster: &Roster,
    exit_tx: &mpsc::UnboundedSender<WorkerExit>,
) {
    let removed = {
        let mut roster = roster.write().await;
        roster.remove(&id)
    };

    let Some(record) = removed else {
        // Already reaped elsewhere; nothing to report.
        return;
    };

    let state = if record.state == WorkerState::Draining {
        WorkerState::Stopped
    } else {
        WorkerState::Crashed
    };

    match (&status, state) {
        (Ok(s), WorkerState::Stopped) => {
            info!(worker_id = id, pid = record.pid, status = %s, "worker stopped")
        }
        (Ok(s), _) => {
            error!(worker_id = id, pid = record.pid, status = %s, "worker exited unexpectedly")
        }
        (Err(e), _) => {
            warn!(worker_id = id, pid = record.pid, error = %e, "worker wait failed")
        }
    }

    // Receiver gone means the controller is shutting down; fine.
    let _ = exit_tx.send(WorkerExit { id, state });
}
