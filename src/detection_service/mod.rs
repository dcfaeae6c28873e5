//! DetectionService - manual detection pipeline
//!
//! Image upload / browser capture -> detector -> event -> alert.
//! Every result is persisted, clean or dirty. Only a detector failure is
//! returned as an error; persistence and delivery problems are reported
//! in the result.

use crate::detector_client::Detection;
use crate::error::{Error, Result};
use crate::event_store::NewDetectionEvent;
use crate::interfaces::{AlertSink, Detector, EventSink, RecipientSource};
use crate::models::ImageKind;
use crate::notification_service::Alert;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Source tag for file uploads
pub const SOURCE_UPLOAD: &str = "upload";
/// Source tag for browser camera captures
pub const SOURCE_CAMERA: &str = "camera";

/// Delivery summary
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotificationReport {
    pub attempted: bool,
    pub success: bool,
    pub recipients: usize,
}

/// Pipeline result returned to the HTTP caller
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    /// `None` when the event could not be stored
    pub id: Option<u64>,
    pub source: String,
    pub is_dirty: bool,
    pub confidence: f64,
    pub detections: Vec<Detection>,
    pub created_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub notification: NotificationReport,
}

/// Decode a base64 frame, accepting a `data:<mime>;base64,` prefix
pub fn decode_base64_image(input: &str) -> Result<Vec<u8>> {
    let payload = match input.trim().strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, data)| data)
            .ok_or_else(|| Error::Validation("malformed data URL".to_string()))?,
        None => input.trim(),
    };

    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| Error::Validation(format!("invalid base64 image: {}", e)))
}

/// Reject empty payloads and unknown formats
pub fn validate_image(image: &[u8]) -> Result<ImageKind> {
    if image.is_empty() {
        return Err(Error::Validation("image is empty".to_string()));
    }
    ImageKind::sniff(image).ok_or_else(|| {
        Error::Validation("unsupported image format (expected JPEG, PNG, WebP, BMP or GIF)".to_string())
    })
}

/// DetectionService instance
pub struct DetectionService {
    detector: Arc<dyn Detector>,
    events: Arc<dyn EventSink>,
    recipients: Arc<dyn RecipientSource>,
    alerts: Arc<dyn AlertSink>,
}

impl DetectionService {
    pub fn new(
        detector: Arc<dyn Detector>,
        events: Arc<dyn EventSink>,
        recipients: Arc<dyn RecipientSource>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            detector,
            events,
            recipients,
            alerts,
        }
    }

    pub async fn process(
        &self,
        source: &str,
        image: Vec<u8>,
        notes: Option<String>,
    ) -> Result<DetectionResult> {
        validate_image(&image)?;
        let notes = notes.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        let verdict = self.detector.detect(&image).await?;
        let created_at = Utc::now();

        let event = NewDetectionEvent {
            source: source.to_string(),
            is_dirty: verdict.is_dirty,
            confidence: Some(verdict.confidence),
            image: Some(image),
            notes: notes.clone(),
        };

        let id = match self.events.save_event(&event).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(source = %source, error = %e, "Failed to save detection event");
                None
            }
        };

        let mut notification = NotificationReport::default();
        if verdict.is_dirty {
            match self.recipients.list_active_recipients().await {
                Ok(recipients) if !recipients.is_empty() => {
                    let alert = Alert::dirty_floor(
                        source,
                        None,
                        verdict.confidence,
                        created_at,
                        event.image,
                    );
                    notification.recipients = recipients.len();
                    if let Some(ok) = self.alerts.notify(&alert, &recipients).await {
                        notification.attempted = true;
                        notification.success = ok;
                    }
                }
                Ok(_) => {
                    tracing::debug!(source = %source, "No active recipients, alert not sent");
                }
                Err(e) => {
                    tracing::error!(source = %source, error = %e, "Failed to list active recipients");
                }
            }
        }

        tracing::info!(
            event_id = ?id,
            source = %source,
            is_dirty = verdict.is_dirty,
            confidence = verdict.confidence,
            notified = notification.success,
            "Manual detection processed"
        );

        Ok(DetectionResult {
            id,
            source: source.to_string(),
            is_dirty: verdict.is_dirty,
            confidence: verdict.confidence,
            detections: verdict.detections,
            created_at,
            notes,
            notification,
        })
    }
}
