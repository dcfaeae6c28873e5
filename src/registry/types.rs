//! Registry data types
//!
//! Cameras and notification recipients as stored in MySQL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

fn default_true() -> bool {
    true
}

/// Camera entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Camera {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    /// RTSP / HTTP / file stream address
    pub stream_url: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Camera {
    /// Source tag used for events produced by the monitor
    pub fn source_tag(&self) -> String {
        format!("camera_{}", self.id)
    }
}

/// Create camera request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCameraRequest {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    pub stream_url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Partial camera update
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateCameraRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub stream_url: Option<String>,
    pub enabled: Option<bool>,
}

impl UpdateCameraRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.stream_url.is_none()
            && self.enabled.is_none()
    }
}

/// Email recipient
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Recipient {
    pub id: i64,
    pub email: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecipientRequest {
    pub email: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// WhatsApp recipient
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WaRecipient {
    pub id: i64,
    pub phone: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWaRecipientRequest {
    pub phone: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// PATCH body for recipients
#[derive(Debug, Clone, Deserialize)]
pub struct SetActiveRequest {
    pub active: bool,
}

/// Active notification targets, per channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecipientList {
    pub emails: Vec<String>,
    pub phones: Vec<String>,
}

impl RecipientList {
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty() && self.phones.is_empty()
    }

    pub fn len(&self) -> usize {
        self.emails.len() + self.phones.len()
    }

}
