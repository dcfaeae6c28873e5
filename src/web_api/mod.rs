//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - Response formatting

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::Json;

use crate::models::{ApiResponse, HealthResponse, ServiceInfo};
use crate::state::AppState;

/// Liveness
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.started_at.elapsed().as_secs(),
    })
}

/// Service info
pub async fn service_info(State(state): State<AppState>) -> Json<ApiResponse<ServiceInfo>> {
    let running = state.monitor_stats.read().await.running;

    Json(ApiResponse::success(ServiceInfo {
        name: "FloorEye".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_configured: state.storage.is_some(),
        detector_configured: state.detector.is_some(),
        monitor_enabled: state.config.enable_monitor,
        monitor_running: running,
    }))
}
