//! HTTP surface for the memscale daemon.
//!
//! Everything here is read-mostly: the handlers talk to the controller
//! through its [`ControllerHandle`] and never touch the pool directly.
//! Mutating endpoints (`scale`, `monitor/*`) queue commands; the
//! control loop applies them on its own schedule.

pub mod handlers;
mod prometheus;

use axum::Router;
use axum::routing::{get, post};

use memscale_controller::ControllerHandle;

/// Assemble the router. The handle is the only shared state.
pub fn build_router(handle: ControllerHandle) -> Router {
    Router::new()
        .route("/api/v1/status", get(handlers::status))
        .route("/api/v1/memory", get(handlers::memory))
        .route("/api/v1/workers", get(handlers::workers))
        .route("/api/v1/scale", post(handlers::scale))
        .route("/api/v1/monitor/start", post(handlers::monitor_start))
        .route("/api/v1/monitor/stop", post(handlers::monitor_stop))
        .route("/metrics", get(handlers::metrics))
        .with_state(handle)
}
