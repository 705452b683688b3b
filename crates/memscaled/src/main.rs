//! memscaled — memory-driven worker pool daemon.
//!
//! Samples host memory on a fixed cadence, derives a worker target from
//! available headroom, and keeps a pool of long-running worker
//! processes reconciled to it. A small REST API exposes status and
//! manual control; SIGTERM/SIGINT drain politely, SIGQUIT kills.
//!
//! # Usage
//!
//! ```text
//! memscaled run --max-workers 6 -- my-worker --queue jobs
//! memscaled status --addr 127.0.0.1:8484
//! ```

mod client;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, warn};

use memscale_controller::{Controller, ControllerHandle, ShutdownUrgency};
use memscale_core::Config;
use memscale_sampler::SystemSampler;

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "memscaled", about = "Memory-driven worker pool daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon, supervising the worker command after `--`.
    Run {
        /// Minimum number of workers to keep alive.
        #[arg(long, env = "MEMSCALED_MIN_WORKERS", default_value_t = 1)]
        min_workers: u32,

        /// Maximum number of workers.
        #[arg(long, env = "MEMSCALED_MAX_WORKERS", default_value_t = 6)]
        max_workers: u32,

        /// Available-memory floor below which one worker is shed.
        #[arg(long, env = "MEMSCALED_MEMORY_THRESHOLD_BYTES", default_value_t = 8 * GIB)]
        memory_threshold_bytes: u64,

        /// Memory budget assumed per worker.
        #[arg(long, env = "MEMSCALED_WORKER_MEMORY_LIMIT_BYTES", default_value_t = 4 * GIB)]
        worker_memory_limit_bytes: u64,

        /// Memory held back for the rest of the system.
        #[arg(long, env = "MEMSCALED_SYSTEM_RESERVE_BYTES", default_value_t = 4 * GIB)]
        system_reserve_bytes: u64,

        /// Seconds between memory samples.
        #[arg(long, env = "MEMSCALED_SAMPLE_INTERVAL_SECS", default_value_t = 30)]
        sample_interval_secs: u64,

        /// Seconds drained workers get before being force-killed.
        #[arg(long, env = "MEMSCALED_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
        shutdown_grace_secs: u64,

        /// Memory-driven scaling (set false for manual-only control).
        #[arg(
            long,
            env = "MEMSCALED_AUTOSCALING",
            default_value_t = true,
            action = ArgAction::Set,
            value_name = "BOOL"
        )]
        autoscaling: bool,

        /// Port for the status API.
        #[arg(long, env = "MEMSCALED_PORT", default_value_t = 8484)]
        port: u16,

        /// Worker command and its arguments.
        #[arg(last = true, required = true)]
        worker_command: Vec<String>,
    },

    /// Query a running daemon and print its status.
    Status {
        /// Address of the daemon's status API.
        #[arg(long, default_value = "127.0.0.1:8484")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,memscaled=debug,memscale=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            min_workers,
            max_workers,
            memory_threshold_bytes,
            worker_memory_limit_bytes,
            system_reserve_bytes,
            sample_interval_secs,
            shutdown_grace_secs,
            autoscaling,
            port,
            worker_command,
        } => {
            let config = Config {
                min_workers,
                max_workers,
                memory_threshold_bytes,
                worker_memory_limit_bytes,
                system_reserve_bytes,
                sample_interval: Duration::from_secs(sample_interval_secs),
                shutdown_grace_period: Duration::from_secs(shutdown_grace_secs),
                autoscaling_enabled: autoscaling,
                worker_command,
            };
            config.validate().context("invalid configuration")?;
            run_daemon(config, port).await
        }
        Command::Status { addr } => {
            let body = client::fetch_status(&addr).await?;
            println!("{body}");
            Ok(())
        }
    }
}

async fn run_daemon(config: Config, port: u16) -> anyhow::Result<()> {
    info!(
        worker = %config.worker_command.join(" "),
        min = config.min_workers,
        max = config.max_workers,
        "memscaled starting"
    );

    let min_workers = config.min_workers;
    let sampler = Arc::new(SystemSampler::new());
    let (controller, handle) = Controller::new(Arc::new(config), sampler);

    // Controller completion gates API shutdown: the server keeps
    // answering status requests while workers drain.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let controller_task = tokio::spawn(async move {
        controller.run().await;
        let _ = done_tx.send(());
    });

    tokio::spawn(forward_signals(handle.clone()));

    let report = handle
        .start_monitoring()
        .await
        .context("controller unavailable at startup")?;
    if min_workers > 0 && report.spawned == 0 {
        handle.signal(ShutdownUrgency::Urgent);
        anyhow::bail!(
            "failed to start any worker: {}",
            report
                .last_spawn_error
                .as_deref()
                .unwrap_or("unknown spawn error")
        );
    }

    let router = memscale_api::build_router(handle);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "status API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = done_rx.await;
        })
        .await?;

    controller_task.await?;
    info!("memscaled stopped");
    Ok(())
}

/// Translate process signals into shutdown urgency.
///
/// First SIGTERM or SIGINT drains politely; a repeat escalates inside
/// the controller. SIGQUIT force-kills immediately.
async fn forward_signals(handle: ControllerHandle) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    loop {
        tokio::select! {
            _ = term.recv() => {
                info!("SIGTERM received, draining");
                handle.signal(ShutdownUrgency::Polite);
            }
            _ = int.recv() => {
                info!("SIGINT received, draining");
                handle.signal(ShutdownUrgency::Polite);
            }
            _ = quit.recv() => {
                warn!("SIGQUIT received, force-terminating");
                handle.signal(ShutdownUrgency::Urgent);
            }
        }
    }
}
