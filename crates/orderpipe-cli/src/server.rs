//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use orderpipe_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use orderpipe_core::metrics::PipelineMetrics;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pipeline_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    pub components: std::collections::HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        match status {
            ComponentStatus::Healthy => ComponentStatusResponse {
                status: "healthy".to_string(),
                message: None,
            },
            ComponentStatus::Degraded(msg) => ComponentStatusResponse {
                status: "degraded".to_string(),
                message: Some(msg.clone()),
            },
            ComponentStatus::Unhealthy(msg) => ComponentStatusResponse {
                status: "unhealthy".to_string(),
                message: Some(msg.clone()),
            },
            ComponentStatus::Unknown => ComponentStatusResponse {
                status: "unknown".to_string(),
                message: None,
            },
        }
    }
}

/// Routes served on the health port.
pub fn health_routes(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Routes served on the metrics port.
pub fn metrics_routes(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn bind(port: u16, name: &str) -> Option<tokio::net::TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            info!(port, "{} server started", name);
            Some(listener)
        }
        Err(e) => {
            error!(error = %e, port, "Failed to bind {} server", name);
            None
        }
    }
}

/// Start the HTTP server for health and metrics.
///
/// When both ports are equal every route is served from one listener.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if health_port == metrics_port {
        let Some(listener) = bind(health_port, "Health and metrics").await else {
            return;
        };
        let routes = health_routes(Arc::clone(&state)).merge(metrics_routes(state));
        tokio::select! {
            result = axum::serve(listener, routes) => {
                if let Err(e) = result {
                    error!(error = %e, "HTTP server error");
                }
            }
            _ = shutdown_rx.recv() => {
                info!("HTTP server shutting down");
            }
        }
        return;
    }

    let Some(health_listener) = bind(health_port, "Health").await else {
        return;
    };
    let Some(metrics_listener) = bind(metrics_port, "Metrics").await else {
        return;
    };

    let health_server = async {
        axum::serve(health_listener, health_routes(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Health server error"))
    };

    let metrics_server = async {
        axum::serve(metrics_listener, metrics_routes(Arc::clone(&state)))
            .await
            .map_err(|e| error!(error = %e, "Metrics server error"))
    };

    tokio::select! {
        _ = health_server => {}
        _ = metrics_server => {}
        _ = shutdown_rx.recv() => {
            info!("HTTP servers shutting down");
        }
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall_status();
    let statuses = state.health.get_all_statuses();

    let components: std::collections::HashMap<String, ComponentStatusResponse> = statuses
        .iter()
        .map(|(k, v)| (k.clone(), ComponentStatusResponse::from(v)))
        .collect();

    let status_str = match overall {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    };

    let response = HealthResponse {
        status: status_str.to_string(),
        pipeline_running: state.health.is_pipeline_running(),
        uptime_seconds: state.health.uptime_seconds(),
        components,
    };

    let status_code = match overall {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Kubernetes liveness probe handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Liveness: Is the process alive?
    let is_alive = state.health.overall_status() != HealthStatus::Unhealthy;

    if is_alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Kubernetes readiness probe handler.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    // Readiness: Can we accept traffic?
    if state.health.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.export_prometheus_text(),
    )
}
