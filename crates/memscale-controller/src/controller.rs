//! The control loop and shutdown state machine.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use memscale_core::{Config, Lifecycle, MemorySample, ScaleReason, ScalingDecision, WorkerState};
use memscale_pool::{WorkerExit, WorkerPool};
use memscale_sampler::Sampler;

use crate::status::StatusBoard;

/// Consecutive failed samples before warnings escalate to errors.
/// Sampling failures are never fatal; the loop keeps trying.
const SAMPLE_FAILURE_ESCALATION: u32 = 5;

/// How urgently the controller should shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownUrgency {
    /// Let workers finish in-flight work within the grace period.
    Polite,
    /// Kill everything now.
    Urgent,
}

/// Acknowledgement of a manual scale request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleAck {
    /// Target after clamping to the configured bounds.
    pub target: u32,
    /// Whether the requested value had to be clamped.
    pub clamped: bool,
}

/// Outcome of a start-monitoring request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    /// False when monitoring was already active.
    pub started: bool,
    /// Workers brought up by the initial reconcile.
    pub spawned: u32,
    /// Spawn attempts that failed during the initial reconcile.
    pub spawn_failures: u32,
    /// Message of the most recent initial spawn failure.
    pub last_spawn_error: Option<String>,
}

/// The controller task is gone (already stopped).
#[derive(Debug, Error)]
#[error("controller unavailable")]
pub struct ControllerError;

enum Command {
    Scale {
        target: u32,
        reply: oneshot::Sender<ScaleAck>,
    },
    StartMonitoring {
        reply: oneshot::Sender<StartReport>,
    },
    StopMonitoring {
        reply: oneshot::Sender<bool>,
    },
    Signal(ShutdownUrgency),
}

/// Cheap, cloneable handle for external callers (REST layer, CLI).
#[derive(Clone)]
pub struct ControllerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status: StatusBoard,
}

impl ControllerHandle {
    /// Full status snapshot; never blocks on roster mutation beyond a
    /// brief read lock.
    pub async fn status(&self) -> memscale_core::StatusView {
        self.status.snapshot().await
    }

    /// Latest successful memory sample.
    pub async fn memory(&self) -> Option<MemorySample> {
        self.status.memory().await
    }

    /// Current roster snapshot.
    pub async fn workers(&self) -> Vec<memscale_core::WorkerRecord> {
        self.status.workers().await
    }

    /// Queue a one-shot manual override of the next tick's target.
    ///
    /// The value is clamped to `[min_workers, max_workers]`; clamping
    /// always yields a valid target, so the request is never rejected
    /// outright.
    pub async fn scale(&self, target: u32) -> Result<ScaleAck, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Scale { target, reply })
            .map_err(|_| ControllerError)?;
        rx.await.map_err(|_| ControllerError)
    }

    /// Transition Idle → Running and bring up the minimum worker count.
    ///
    /// The report carries the initial reconcile outcome so callers can
    /// treat a fully failed bring-up as a startup error.
    pub async fn start_monitoring(&self) -> Result<StartReport, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::StartMonitoring { reply })
            .map_err(|_| ControllerError)?;
        rx.await.map_err(|_| ControllerError)
    }

    /// Initiate a polite drain, as if a termination signal arrived.
    pub async fn stop_monitoring(&self) -> Result<bool, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::StopMonitoring { reply })
            .map_err(|_| ControllerError)?;
        rx.await.map_err(|_| ControllerError)
    }

    /// Deliver a shutdown signal. Fire-and-forget so it is safe to call
    /// from a signal handler task.
    pub fn signal(&self, urgency: ShutdownUrgency) {
        let _ = self.cmd_tx.send(Command::Signal(urgency));
    }
}

/// The controller owns the pool and drives the control loop.
pub struct Controller {
    config: Arc<Config>,
    sampler: Arc<dyn Sampler>,
    pool: WorkerPool,
    exit_rx: mpsc::UnboundedReceiver<WorkerExit>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status: StatusBoard,
    lifecycle: Lifecycle,
    /// Target of the most recent applied decision; crash replacement
    /// spawns back up to this without waiting for the next tick.
    last_target: u32,
    /// Manual override consumed by exactly one tick.
    pending_override: Option<u32>,
    /// When set, Draining escalates to Terminating at this instant.
    grace_deadline: Option<Instant>,
    consecutive_sample_failures: u32,
}

impl Controller {
    /// Build a controller and its external handle.
    ///
    /// The configuration must already be validated.
    pub fn new(config: Arc<Config>, sampler: Arc<dyn Sampler>) -> (Self, ControllerHandle) {
        let (pool, exit_rx) = WorkerPool::new(config.clone());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let status = StatusBoard::new(&config);

        let handle = ControllerHandle {
            cmd_tx,
            status: status.clone(),
        };
        let controller = Self {
            last_target: config.min_workers,
            config,
            sampler,
            pool,
            exit_rx,
            cmd_rx,
            status,
            lifecycle: Lifecycle::Idle,
            pending_override: None,
            grace_deadline: None,
            consecutive_sample_failures: 0,
        };
        (controller, handle)
    }

    /// Run the control loop until the lifecycle reaches Stopped.
    pub async fn run(mut self) {
        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            interval_secs = self.config.sample_interval.as_secs(),
            autoscaling = self.config.autoscaling_enabled,
            "control loop started"
        );

        let mut ticker = tokio::time::interval(self.config.sample_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let grace = self.grace_deadline;
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                Some(cmd) = self.cmd_rx.recv() => self.handle_command(cmd).await,
                Some(exit) = self.exit_rx.recv() => self.handle_exit(exit).await,
                _ = sleep_until_opt(grace) => self.force_terminate().await,
            }

            if self.lifecycle == Lifecycle::Stopped {
                break;
            }
        }

        info!("control loop stopped");
    }

    // ── Tick ───────────────────────────────────────────────────────

    /// One sample → decide → reconcile → publish pass.
    async fn tick(&mut self) {
        let sample = self.take_sample();
        if let Some(sample) = sample {
            self.status.set_memory(sample).await;
        }

        if let Some(decision) = self.next_decision(sample).await {
            if decision.target != decision.current {
                info!(
                    current = decision.current,
                    target = decision.target,
                    reason = ?decision.reason,
                    "scaling"
                );
            } else {
                debug!(target = decision.target, "no scaling needed");
            }

            let result = self.pool.reconcile(&decision).await;
            if result.spawn_failures > 0 {
                self.status.set_spawn_error(result.last_spawn_error).await;
            }
            self.last_target = decision.target;
            self.status.set_decision(decision).await;
        }

        self.publish_workers().await;
    }

    /// Read host memory; a failed sample means "no decision this tick".
    fn take_sample(&mut self) -> Option<MemorySample> {
        match self.sampler.sample() {
            Ok(sample) => {
                self.consecutive_sample_failures = 0;
                Some(sample)
            }
            Err(e) => {
                self.consecutive_sample_failures += 1;
                if self.consecutive_sample_failures >= SAMPLE_FAILURE_ESCALATION {
                    error!(
                        consecutive = self.consecutive_sample_failures,
                        error = %e,
                        "memory sampling keeps failing, holding last decision"
                    );
                } else {
                    warn!(error = %e, "memory sample failed, skipping decision this tick");
                }
                None
            }
        }
    }

    /// Compute the decision for this tick, if any.
    ///
    /// A pending manual override wins and is consumed; it is honored
    /// while Running and also while Draining, since an operator asking
    /// for capacity during a drain is explicit intent. Workers spawned
    /// that way are swept up by the grace-expiry force kill if the
    /// drain runs to completion. Memory-derived decisions only flow
    /// while Running.
    async fn next_decision(&mut self, sample: Option<MemorySample>) -> Option<ScalingDecision> {
        if !matches!(self.lifecycle, Lifecycle::Running | Lifecycle::Draining) {
            return None;
        }

        let current = self.pool.worker_count().await;

        if let Some(target) = self.pending_override.take() {
            return Some(ScalingDecision {
                current,
                target,
                reason: ScaleReason::ManualOverride,
            });
        }

        if self.lifecycle != Lifecycle::Running || !self.config.autoscaling_enabled {
            return None;
        }

        let sample = sample?;
        Some(memscale_policy::decide(&sample, current, &self.config))
    }

    // ── Events ─────────────────────────────────────────────────────

    /// A worker exit was confirmed out-of-band by its watcher.
    async fn handle_exit(&mut self, exit: WorkerExit) {
        self.publish_workers().await;

        match self.lifecycle {
            Lifecycle::Running if exit.state == WorkerState::Crashed => {
                let current = self.pool.worker_count().await;
                if current < self.last_target {
                    // Fast path: replace immediately instead of waiting
                    // for the next tick.
                    warn!(
                        worker_id = exit.id,
                        current,
                        target = self.last_target,
                        "replacing crashed worker"
                    );
                    match self.pool.spawn_one().await {
                        Ok(_) => self.publish_workers().await,
                        Err(e) => {
                            warn!(error = %e, "replacement spawn failed, next tick will correct");
                            self.status.set_spawn_error(Some(e.to_string())).await;
                        }
                    }
                }
            }
            Lifecycle::Draining | Lifecycle::Terminating => self.check_all_exited().await,
            _ => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Scale { target, reply } => {
                let clamped = target.clamp(self.config.min_workers, self.config.max_workers);
                self.pending_override = Some(clamped);
                info!(requested = target, target = clamped, "manual scale override queued");
                let _ = reply.send(ScaleAck {
                    target: clamped,
                    clamped: clamped != target,
                });
            }
            Command::StartMonitoring { reply } => {
                let report = if self.lifecycle == Lifecycle::Idle {
                    self.start_monitoring().await
                } else {
                    StartReport::default()
                };
                let _ = reply.send(report);
            }
            Command::StopMonitoring { reply } => {
                let acknowledged = self.lifecycle == Lifecycle::Running;
                self.begin_drain().await;
                let _ = reply.send(acknowledged);
            }
            Command::Signal(urgency) => self.handle_signal(urgency).await,
        }
    }

    async fn handle_signal(&mut self, urgency: ShutdownUrgency) {
        match (urgency, self.lifecycle) {
            (ShutdownUrgency::Polite, Lifecycle::Draining) => {
                info!("second shutdown signal, escalating to forced termination");
                self.force_terminate().await;
            }
            (ShutdownUrgency::Polite, _) => self.begin_drain().await,
            (ShutdownUrgency::Urgent, _) => self.force_terminate().await,
        }
    }

    // ── Lifecycle transitions ──────────────────────────────────────

    async fn start_monitoring(&mut self) -> StartReport {
        self.set_lifecycle(Lifecycle::Running).await;

        // Bring up the minimum immediately rather than waiting a tick.
        let decision = ScalingDecision {
            current: 0,
            target: self.config.min_workers,
            reason: ScaleReason::BelowMinimum,
        };
        let result = self.pool.reconcile(&decision).await;
        if result.spawn_failures > 0 {
            self.status
                .set_spawn_error(result.last_spawn_error.clone())
                .await;
        }
        self.last_target = self.config.min_workers;
        self.publish_workers().await;
        info!(spawned = result.spawned, "monitoring started");

        StartReport {
            started: true,
            spawned: result.spawned,
            spawn_failures: result.spawn_failures,
            last_spawn_error: result.last_spawn_error,
        }
    }

    async fn begin_drain(&mut self) {
        if matches!(
            self.lifecycle,
            Lifecycle::Draining | Lifecycle::Terminating | Lifecycle::Stopped
        ) {
            return;
        }

        self.set_lifecycle(Lifecycle::Draining).await;
        let draining = self.pool.drain_all().await;
        self.grace_deadline = Some(Instant::now() + self.config.shutdown_grace_period);
        info!(
            draining,
            grace_secs = self.config.shutdown_grace_period.as_secs(),
            "drain started"
        );
        self.publish_workers().await;
        self.check_all_exited().await;
    }

    async fn force_terminate(&mut self) {
        if matches!(self.lifecycle, Lifecycle::Terminating | Lifecycle::Stopped) {
            return;
        }

        self.set_lifecycle(Lifecycle::Terminating).await;
        self.grace_deadline = None;
        let killed = self.pool.kill_all().await;
        if killed > 0 {
            warn!(killed, "grace period over, force-terminating stragglers");
        }
        self.publish_workers().await;
        self.check_all_exited().await;
    }

    /// Publish the roster, enriched with per-process usage from the
    /// sampler. Probe misses just leave a record's usage at zero.
    async fn publish_workers(&mut self) {
        let mut workers = self.pool.roster().await;
        let pids: Vec<u32> = workers.iter().map(|w| w.pid).collect();
        let stats = self.sampler.process_stats(&pids);
        for worker in &mut workers {
            if let Some(usage) = stats.get(&worker.pid) {
                worker.memory_bytes = usage.memory_bytes;
                worker.cpu_percent = usage.cpu_percent;
            }
        }
        self.status.set_workers(workers).await;
    }

    async fn check_all_exited(&mut self) {
        if self.pool.worker_count().await == 0 {
            self.grace_deadline = None;
            self.set_lifecycle(Lifecycle::Stopped).await;
            info!("all workers exited");
        }
    }

    async fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        debug!(from = ?self.lifecycle, to = ?lifecycle, "lifecycle transition");
        self.lifecycle = lifecycle;
        self.status.set_lifecycle(lifecycle).await;
    }
}

/// Pending-forever when no deadline is armed.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
