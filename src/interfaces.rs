//! Collaborator interfaces
//!
//! The seams between the monitor / detection pipeline and the outside world.
//! Production implementations live next to their adapters
//! (registry, snapshot_service, detector_client, event_store,
//! notification_service); tests substitute in-memory fakes.

use crate::detector_client::DetectionVerdict;
use crate::error::Result;
use crate::event_store::NewDetectionEvent;
use crate::notification_service::Alert;
use crate::registry::{Camera, RecipientList};
use futures::future::BoxFuture;

/// Reads enabled cameras.
pub trait CameraSource: Send + Sync {
    fn list_active_cameras(&self) -> BoxFuture<'_, Result<Vec<Camera>>>;
}

/// Reads active notification targets.
pub trait RecipientSource: Send + Sync {
    fn list_active_recipients(&self) -> BoxFuture<'_, Result<RecipientList>>;
}

/// Grabs a single frame from a stream address and releases the source.
pub trait FrameSource: Send + Sync {
    fn capture_frame<'a>(&'a self, stream_url: &'a str) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Turns an encoded image into a dirty/clean verdict.
///
/// `Err` means "could not determine", never "clean".
pub trait Detector: Send + Sync {
    fn detect<'a>(&'a self, image: &'a [u8]) -> BoxFuture<'a, Result<DetectionVerdict>>;
}

/// Persists a detection event and returns its id.
pub trait EventSink: Send + Sync {
    fn save_event<'a>(&'a self, event: &'a NewDetectionEvent) -> BoxFuture<'a, Result<u64>>;
}

/// Delivers an alert. Never fails past its boundary.
///
/// `Some(false)` means not delivered; `None` means no channel could carry
/// the alert to these recipients, so nothing was attempted.
pub trait AlertSink: Send + Sync {
    fn notify<'a>(
        &'a self,
        alert: &'a Alert,
        recipients: &'a RecipientList,
    ) -> BoxFuture<'a, Option<bool>>;
}
