//! EventStore - detection event persistence
//!
//! ## Responsibilities
//!
//! - Persist detection events to MySQL (floor_events table)
//! - Optionally mirror event images to a directory on disk
//! - History queries for the HTTP API
//!
//! Events are written once and never updated.

use crate::error::{Error, Result};
use crate::interfaces::EventSink;
use crate::models::ImageKind;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use sqlx::mysql::MySqlPool;
use sqlx::Row;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Default page size for history listings
pub const DEFAULT_PAGE_SIZE: u32 = 50;
/// Upper bound for history page size
pub const MAX_PAGE_SIZE: u32 = 500;

/// Event to be written
#[derive(Debug, Clone, Default)]
pub struct NewDetectionEvent {
    /// `camera_<id>`, `upload` or `camera`
    pub source: String,
    pub is_dirty: bool,
    pub confidence: Option<f64>,
    pub image: Option<Vec<u8>>,
    pub notes: Option<String>,
}

/// Stored event (image bytes excluded)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DetectionEvent {
    pub id: u64,
    pub source: String,
    pub is_dirty: bool,
    pub confidence: Option<f64>,
    pub image_path: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// History summary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventStats {
    pub total: i64,
    pub dirty: i64,
    pub clean: i64,
    pub last_dirty_at: Option<DateTime<Utc>>,
}

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// `<source>_<unix-millis>.<ext>`, with the source reduced to `[A-Za-z0-9_-]`
pub fn image_file_name(source: &str, at: DateTime<Utc>, extension: &str) -> String {
    let source: String = source
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let source = if source.is_empty() { "event".to_string() } else { source };
    format!("{}_{}.{}", source, at.timestamp_millis(), extension)
}

async fn write_image_file(
    dir: &Path,
    source: &str,
    at: DateTime<Utc>,
    data: &[u8],
) -> Result<PathBuf> {
    let kind = ImageKind::sniff(data).unwrap_or(ImageKind::JPEG);
    fs::create_dir_all(dir).await?;

    let path = dir.join(image_file_name(source, at, kind.extension));
    fs::write(&path, data).await?;
    Ok(path)
}

/// EventStore instance
pub struct EventStore {
    pool: MySqlPool,
    /// Mirror directory for event images
    image_dir: Option<PathBuf>,
}

impl EventStore {
    pub fn new(pool: MySqlPool, image_dir: Option<PathBuf>) -> Self {
        Self { pool, image_dir }
    }

    /// Insert one event and return its id
    ///
    /// The image is stored inline. When an image directory is configured the
    /// image is also written there; a failed file write only drops the path.
    pub async fn save_event(&self, event: &NewDetectionEvent) -> Result<u64> {
        let now = Utc::now();

        let image_path = match (&self.image_dir, &event.image) {
            (Some(dir), Some(data)) if !data.is_empty() => {
                match write_image_file(dir, &event.source, now, data).await {
                    Ok(path) => Some(path.to_string_lossy().into_owned()),
                    Err(e) => {
                        tracing::warn!(
                            source = %event.source,
                            dir = %dir.display(),
                            error = %e,
                            "Failed to write event image file, keeping inline copy only"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        let result = sqlx::query(
            r#"
            INSERT INTO floor_events
                (source, is_dirty, confidence, image_data, image_path, notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.source)
        .bind(event.is_dirty)
        .bind(event.confidence)
        .bind(event.image.as_deref())
        .bind(&image_path)
        .bind(&event.notes)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id();

        tracing::info!(
            event_id = id,
            source = %event.source,
            is_dirty = event.is_dirty,
            confidence = ?event.confidence,
            "Detection event saved"
        );

        Ok(id)
    }

    /// Newest first
    pub async fn list_events(&self, limit: u32, offset: u32) -> Result<Vec<DetectionEvent>> {
        let events = sqlx::query_as::<_, DetectionEvent>(
            r#"
            SELECT id, source, is_dirty, confidence, image_path, notes, created_at
            FROM floor_events
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    pub async fn get_event(&self, id: u64) -> Result<DetectionEvent> {
        sqlx::query_as::<_, DetectionEvent>(
            r#"
            SELECT id, source, is_dirty, confidence, image_path, notes, created_at
            FROM floor_events
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Event {} not found", id)))
    }

    /// Image bytes: inline copy, else the mirrored file
    pub async fn get_image(&self, id: u64) -> Result<Vec<u8>> {
        let row = sqlx::query("SELECT image_data, image_path FROM floor_events WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Event {} not found", id)))?;

        let inline: Option<Vec<u8>> = row.try_get("image_data")?;
        if let Some(data) = inline.filter(|d| !d.is_empty()) {
            return Ok(data);
        }

        let path: Option<String> = row.try_get("image_path")?;
        match path {
            Some(path) => fs::read(&path).await.map_err(|e| {
                tracing::warn!(event_id = id, path = %path, error = %e, "Event image file unreadable");
                Error::NotFound(format!("Image for event {} not available", id))
            }),
            None => Err(Error::NotFound(format!("Event {} has no image", id))),
        }
    }

    pub async fn stats(&self) -> Result<EventStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                CAST(COALESCE(SUM(CASE WHEN is_dirty THEN 1 ELSE 0 END), 0) AS SIGNED) AS dirty
            FROM floor_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let dirty: i64 = row.try_get("dirty")?;

        let last_dirty_at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT created_at FROM floor_events WHERE is_dirty = TRUE ORDER BY created_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(EventStats {
            total,
            dirty,
            clean: total - dirty,
            last_dirty_at,
        })
    }
}

impl EventSink for EventStore {
    fn save_event<'a>(&'a self, event: &'a NewDetectionEvent) -> BoxFuture<'a, Result<u64>> {
        EventStore::save_event(self, event).boxed()
    }
}
