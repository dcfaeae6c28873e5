//! API Routes

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::detection_service::{decode_base64_image, SOURCE_CAMERA, SOURCE_UPLOAD};
use crate::error::{Error, Result};
use crate::event_store::clamp_limit;
use crate::models::{ApiResponse, ImageKind};
use crate::notification_service::Alert;
use crate::registry::{
    CreateCameraRequest, CreateRecipientRequest, CreateWaRecipientRequest, SetActiveRequest,
    UpdateCameraRequest,
};
use crate::state::AppState;

/// Upload ceiling for detection endpoints
const MAX_IMAGE_BODY: usize = 20 * 1024 * 1024;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & Status
        .route("/", get(super::service_info))
        .route("/health", get(super::health_check))
        .route("/db-test", get(db_test))
        .route("/monitor/status", get(monitor_status))
        // Cameras
        .route("/cameras", get(list_cameras).post(create_camera))
        .route(
            "/cameras/:id",
            get(get_camera).patch(update_camera).delete(delete_camera),
        )
        // Email recipients
        .route("/email-recipients", get(list_recipients).post(create_recipient))
        .route("/email-recipients/test", post(send_test_email))
        .route(
            "/email-recipients/:id",
            patch(set_recipient_active).delete(delete_recipient),
        )
        // WhatsApp recipients
        .route("/wa-recipients", get(list_wa_recipients).post(create_wa_recipient))
        .route(
            "/wa-recipients/:id",
            patch(set_wa_recipient_active).delete(delete_wa_recipient),
        )
        // Manual detection
        .route("/detect/image", post(detect_image))
        .route("/detect/frame", post(detect_frame))
        // History
        .route("/history", get(list_history))
        .route("/history/stats", get(history_stats))
        .route("/history/:id", get(get_history_event))
        .route("/history/:id/image", get(history_image))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BODY))
        .with_state(state)
}

// ========================================
// Health & Status
// ========================================

async fn db_test(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let storage = state.storage()?;
    sqlx::query("SELECT 1").execute(&storage.pool).await?;
    Ok(Json(ApiResponse::success(json!({ "database": "connected" }))))
}

async fn monitor_status(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.monitor_stats.read().await.clone();
    Json(ApiResponse::success(json!({
        "enabled": state.config.enable_monitor,
        "running": stats.running,
        "poll_interval_sec": state.config.monitor.poll_interval.as_secs(),
        "notify_interval_sec": state.config.monitor.notify_interval.as_secs(),
        "policy": state.config.monitor.policy,
        "stats": stats,
    })))
}

// ========================================
// Cameras
// ========================================

async fn list_cameras(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.registry()?.service().list_cameras().await?;
    Ok(Json(ApiResponse::success(cameras)))
}

async fn get_camera(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let camera = state.registry()?.service().get_camera(id).await?;
    Ok(Json(ApiResponse::success(camera)))
}

async fn create_camera(
    State(state): State<AppState>,
    Json(req): Json<CreateCameraRequest>,
) -> Result<impl IntoResponse> {
    let camera = state.registry()?.service().create_camera(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(camera))))
}

async fn update_camera(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCameraRequest>,
) -> Result<impl IntoResponse> {
    let camera = state.registry()?.service().update_camera(id, req).await?;
    Ok(Json(ApiResponse::success(camera)))
}

async fn delete_camera(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.registry()?.service().delete_camera(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

// ========================================
// Email recipients
// ========================================

async fn list_recipients(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let recipients = state.registry()?.service().list_recipients().await?;
    Ok(Json(ApiResponse::success(recipients)))
}

async fn create_recipient(
    State(state): State<AppState>,
    Json(req): Json<CreateRecipientRequest>,
) -> Result<impl IntoResponse> {
    let recipient = state.registry()?.service().create_recipient(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(recipient))))
}

async fn set_recipient_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> Result<impl IntoResponse> {
    let recipient = state
        .registry()?
        .service()
        .set_recipient_active(id, req.active)
        .await?;
    Ok(Json(ApiResponse::success(recipient)))
}

async fn delete_recipient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.registry()?.service().delete_recipient(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

/// Test mail to every active email recipient
async fn send_test_email(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let emails = state.registry()?.service().list_active_emails().await?;
    if emails.is_empty() {
        return Err(Error::Validation("no active email recipients".to_string()));
    }

    let alert = Alert::test_message(Utc::now());
    if !state.notifier.notify_email(&alert, &emails).await {
        return Err(Error::Notification(format!(
            "test email could not be delivered (transports: {:?})",
            state.notifier.chain_names()
        )));
    }

    Ok(Json(ApiResponse::success(json!({
        "sent": true,
        "recipients": emails.len(),
    }))))
}

// ========================================
// WhatsApp recipients
// ========================================

async fn list_wa_recipients(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let recipients = state.registry()?.service().list_wa_recipients().await?;
    Ok(Json(ApiResponse::success(recipients)))
}

async fn create_wa_recipient(
    State(state): State<AppState>,
    Json(req): Json<CreateWaRecipientRequest>,
) -> Result<impl IntoResponse> {
    let recipient = state.registry()?.service().create_wa_recipient(req).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(recipient))))
}

async fn set_wa_recipient_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetActiveRequest>,
) -> Result<impl IntoResponse> {
    let recipient = state
        .registry()?
        .service()
        .set_wa_recipient_active(id, req.active)
        .await?;
    Ok(Json(ApiResponse::success(recipient)))
}

async fn delete_wa_recipient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    state.registry()?.service().delete_wa_recipient(id).await?;
    Ok(Json(ApiResponse::success(json!({ "id": id, "deleted": true }))))
}

// ========================================
// Manual detection
// ========================================

/// Multipart upload: `file` (required), `notes` (optional)
async fn detect_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let detection = state.detection()?;

    let mut image: Option<Vec<u8>> = None;
    let mut notes: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("invalid multipart body: {}", e)))?
    {
        match field.name() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| Error::Validation(format!("failed to read file: {}", e)))?;
                image = Some(bytes.to_vec());
            }
            Some("notes") => {
                notes = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::Validation(format!("failed to read notes: {}", e)))?,
                );
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| Error::Validation("missing multipart field 'file'".to_string()))?;
    let result = detection.process(SOURCE_UPLOAD, image, notes).await?;
    Ok(Json(ApiResponse::success(result)))
}

#[derive(Debug, Deserialize)]
struct FrameRequest {
    image_base64: String,
    #[serde(default)]
    notes: Option<String>,
}

/// Browser capture as base64 (data URL prefix allowed)
async fn detect_frame(
    State(state): State<AppState>,
    Json(req): Json<FrameRequest>,
) -> Result<impl IntoResponse> {
    let detection = state.detection()?;
    let image = decode_base64_image(&req.image_base64)?;
    let result = detection.process(SOURCE_CAMERA, image, req.notes).await?;
    Ok(Json(ApiResponse::success(result)))
}

// ========================================
// History
// ========================================

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    let limit = clamp_limit(query.limit);
    let offset = query.offset.unwrap_or(0);
    let events = state.events()?.list_events(limit, offset).await?;

    Ok(Json(ApiResponse::success(json!({
        "items": events,
        "limit": limit,
        "offset": offset,
    }))))
}

async fn history_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let stats = state.events()?.stats().await?;
    Ok(Json(ApiResponse::success(stats)))
}

async fn get_history_event(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let event = state.events()?.get_event(id).await?;
    Ok(Json(ApiResponse::success(event)))
}

async fn history_image(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse> {
    let data = state.events()?.get_image(id).await?;
    let mime = ImageKind::sniff(&data)
        .map(|k| k.mime_type)
        .unwrap_or("application/octet-stream");

    Ok(([(header::CONTENT_TYPE, mime)], data))
}
