//! Shared models and types for FloorEye
//!
//! This module contains types shared across multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};

/// Standard API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: u64,
}

/// `GET /` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub storage_configured: bool,
    pub detector_configured: bool,
    pub monitor_enabled: bool,
    pub monitor_running: bool,
}

/// Encoded image format recognised from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageKind {
    pub mime_type: &'static str,
    pub extension: &'static str,
}

impl ImageKind {
    pub const JPEG: ImageKind = ImageKind {
        mime_type: "image/jpeg",
        extension: "jpg",
    };

    /// Sniff JPEG / PNG / WebP / BMP / GIF; anything else is `None`
    pub fn sniff(data: &[u8]) -> Option<ImageKind> {
        use image::ImageFormat;

        let kind = match image::guess_format(data).ok()? {
            ImageFormat::Jpeg => Self::JPEG,
            ImageFormat::Png => ImageKind {
                mime_type: "image/png",
                extension: "png",
            },
            ImageFormat::WebP => ImageKind {
                mime_type: "image/webp",
                extension: "webp",
            },
            ImageFormat::Bmp => ImageKind {
                mime_type: "image/bmp",
                extension: "bmp",
            },
            ImageFormat::Gif => ImageKind {
                mime_type: "image/gif",
                extension: "gif",
            },
            _ => return None,
        };
        Some(kind)
    }
}
