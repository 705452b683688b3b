//! Request handlers. Every endpoint wraps its payload in the same
//! `{success, data, error}` envelope.

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use serde::{Deserialize, Serialize};
use tracing::info;

use memscale_controller::ControllerHandle;
use memscale_core::{MemorySample, StatusView, WorkerRecord};

use crate::prometheus;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScaleRequest {
    pub target: u32,
}

#[derive(Debug, Serialize)]
pub struct ScaleResponse {
    pub target: u32,
    pub clamped: bool,
}

#[derive(Debug, Serialize)]
pub struct MonitorResponse {
    /// False when the request was a no-op for the current lifecycle.
    pub changed: bool,
}

pub async fn status(State(handle): State<ControllerHandle>) -> Json<ApiResponse<StatusView>> {
    Json(ApiResponse::ok(handle.status().await))
}

/// 503 until the first successful sample lands.
pub async fn memory(
    State(handle): State<ControllerHandle>,
) -> (StatusCode, Json<ApiResponse<MemorySample>>) {
    match handle.memory().await {
        Some(sample) => (StatusCode::OK, Json(ApiResponse::ok(sample))),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err("no memory sample captured yet")),
        ),
    }
}

pub async fn workers(
    State(handle): State<ControllerHandle>,
) -> Json<ApiResponse<Vec<WorkerRecord>>> {
    Json(ApiResponse::ok(handle.workers().await))
}

/// Queue a one-shot manual scale override.
pub async fn scale(
    State(handle): State<ControllerHandle>,
    Json(request): Json<ScaleRequest>,
) -> (StatusCode, Json<ApiResponse<ScaleResponse>>) {
    match handle.scale(request.target).await {
        Ok(ack) => {
            info!(requested = request.target, target = ack.target, "scale requested over http");
            (
                StatusCode::OK,
                Json(ApiResponse::ok(ScaleResponse {
                    target: ack.target,
                    clamped: ack.clamped,
                })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

pub async fn monitor_start(
    State(handle): State<ControllerHandle>,
) -> (StatusCode, Json<ApiResponse<MonitorResponse>>) {
    match handle.start_monitoring().await {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse::ok(MonitorResponse {
                changed: report.started,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

pub async fn monitor_stop(
    State(handle): State<ControllerHandle>,
) -> (StatusCode, Json<ApiResponse<MonitorResponse>>) {
    match handle.stop_monitoring().await {
        Ok(changed) => (
            StatusCode::OK,
            Json(ApiResponse::ok(MonitorResponse { changed })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::err(e.to_string())),
        ),
    }
}

/// Prometheus text exposition of the current status snapshot.
pub async fn metrics(
    State(handle): State<ControllerHandle>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    let view = handle.status().await;
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus::render(&view),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use memscale_controller::{Controller, ShutdownUrgency};
    use memscale_core::{Config, Lifecycle, epoch_secs};
    use memscale_sampler::{SampleError, Sampler};

    const GIB: u64 = 1024 * 1024 * 1024;

    struct FixedSampler {
        available_bytes: Option<u64>,
    }

    impl Sampler for FixedSampler {
        fn sample(&self) -> Result<MemorySample, SampleError> {
            let available = self.available_bytes.ok_or(SampleError::Unavailable)?;
            Ok(MemorySample {
                total_bytes: 64 * GIB,
                used_bytes: 64 * GIB - available,
                available_bytes: available,
                captured_at: epoch_secs(),
            })
        }
    }

    fn spawn_controller(
        available_gib: Option<u64>,
    ) -> (ControllerHandle, tokio::task::JoinHandle<()>) {
        let config = Arc::new(Config {
            min_workers: 1,
            max_workers: 4,
            sample_interval: Duration::from_millis(100),
            worker_command: vec!["sleep".to_string(), "300".to_string()],
            ..Config::default()
        });
        let sampler = Arc::new(FixedSampler {
            available_bytes: available_gib.map(|g| g * GIB),
        });
        let (controller, handle) = Controller::new(config, sampler);
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    async fn stop(handle: ControllerHandle, task: tokio::task::JoinHandle<()>) {
        handle.signal(ShutdownUrgency::Urgent);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn status_reports_idle_before_start() {
        let (handle, task) = spawn_controller(Some(32));

        let Json(response) = status(State(handle.clone())).await;
        assert!(response.success);
        let view = response.data.unwrap();
        assert_eq!(view.lifecycle, Lifecycle::Idle);
        assert!(view.workers.is_empty());
        assert_eq!(view.limits.max_workers, 4);

        stop(handle, task).await;
    }

    #[tokio::test]
    async fn memory_is_unavailable_until_sampled() {
        let (handle, task) = spawn_controller(None);

        let (code, Json(response)) = memory(State(handle.clone())).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!response.success);
        assert!(response.error.is_some());

        stop(handle, task).await;
    }

    #[tokio::test]
    async fn memory_reflects_the_latest_sample() {
        let (handle, task) = spawn_controller(Some(32));

        // First tick fires immediately; give it a moment.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (code, Json(response)) = memory(State(handle.clone())).await;
            if code == StatusCode::OK {
                assert_eq!(response.data.unwrap().available_bytes, 32 * GIB);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "no sample published");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        stop(handle, task).await;
    }

    #[tokio::test]
    async fn scale_reports_clamping() {
        let (handle, task) = spawn_controller(Some(32));

        let (code, Json(response)) =
            scale(State(handle.clone()), Json(ScaleRequest { target: 99 })).await;
        assert_eq!(code, StatusCode::OK);
        let ack = response.data.unwrap();
        assert_eq!(ack.target, 4);
        assert!(ack.clamped);

        stop(handle, task).await;
    }

    #[tokio::test]
    async fn monitor_start_is_idempotent() {
        let (handle, task) = spawn_controller(Some(32));

        let (_, Json(first)) = monitor_start(State(handle.clone())).await;
        assert!(first.data.unwrap().changed);
        let (_, Json(second)) = monitor_start(State(handle.clone())).await;
        assert!(!second.data.unwrap().changed);

        stop(handle, task).await;
    }

    #[tokio::test]
    async fn metrics_exposes_gauges_as_text() {
        let (handle, task) = spawn_controller(Some(32));

        let (headers, body) = metrics(State(handle.clone())).await;
        assert_eq!(headers[0].0, header::CONTENT_TYPE);
        assert!(body.contains("memscale_workers_current"));
        assert!(body.contains("memscale_workers_max 4"));
        assert!(body.contains("memscale_lifecycle_state"));

        stop(handle, task).await;
    }

    #[test]
    fn envelope_skips_empty_fields() {
        let ok = serde_json::to_value(ApiResponse::ok(1)).unwrap();
        assert_eq!(ok["success"], true);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ApiResponse::<u32>::err("boom")).unwrap();
        assert_eq!(err["success"], false);
        assert!(err.get("data").is_none());
    }
}
