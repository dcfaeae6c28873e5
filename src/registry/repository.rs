//! Registry Repository
//!
//! Database access layer for cameras and recipients

use super::types::*;
use crate::error::{Error, Result};
use sqlx::MySqlPool;

/// Unique-key violations become `Conflict`; everything else stays a database error
fn map_duplicate(err: sqlx::Error, message: impl FnOnce() -> String) -> Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::Conflict(message()),
        _ => Error::Sqlx(err),
    }
}

/// Registry repository for database operations
#[derive(Clone)]
pub struct RegistryRepository {
    pool: MySqlPool,
}

impl RegistryRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    // ========================================
    // Camera CRUD
    // ========================================

    const CAMERA_COLUMNS: &'static str =
        "id, name, location, stream_url, enabled, created_at, updated_at";

    pub async fn get_all_cameras(&self) -> Result<Vec<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras ORDER BY id DESC",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, Camera>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }

    /// Enabled cameras, in polling order
    pub async fn get_enabled_cameras(&self) -> Result<Vec<Camera>> {
        let query = format!(
            "SELECT {} FROM cameras WHERE enabled = TRUE ORDER BY id",
            Self::CAMERA_COLUMNS
        );
        let cameras = sqlx::query_as::<_, Camera>(&query)
            .fetch_all(&self.pool)
            .await?;

        Ok(cameras)
    }

    pub async fn get_camera(&self, id: i64) -> Result<Option<Camera>> {
        let query = format!("SELECT {} FROM cameras WHERE id = ?", Self::CAMERA_COLUMNS);
        let camera = sqlx::query_as::<_, Camera>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(camera)
    }

    pub async fn create_camera(&self, req: &CreateCameraRequest) -> Result<Camera> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO cameras (name, location, stream_url, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&req.name)
        .bind(&req.location)
        .bind(&req.stream_url)
        .bind(req.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id() as i64;
        self.get_camera(id)
            .await?
            .ok_or(Error::NotFound("Camera not found after insert".to_string()))
    }

    /// Partial update; only the fields present in `req` are written
    pub async fn update_camera(&self, id: i64, req: &UpdateCameraRequest) -> Result<Camera> {
        let now = chrono::Utc::now();

        let mut set_clauses = vec!["updated_at = ?"];
        if req.name.is_some() { set_clauses.push("name = ?"); }
        if req.location.is_some() { set_clauses.push("location = ?"); }
        if req.stream_url.is_some() { set_clauses.push("stream_url = ?"); }
        if req.enabled.is_some() { set_clauses.push("enabled = ?"); }

        let query = format!("UPDATE cameras SET {} WHERE id = ?", set_clauses.join(", "));

        // Bind in same order as set_clauses
        let mut q = sqlx::query(&query).bind(now);
        if let Some(ref v) = req.name { q = q.bind(v); }
        if let Some(ref v) = req.location { q = q.bind(v); }
        if let Some(ref v) = req.stream_url { q = q.bind(v); }
        if let Some(v) = req.enabled { q = q.bind(v); }
        q.bind(id).execute(&self.pool).await?;

        self.get_camera(id)
            .await?
            .ok_or(Error::NotFound(format!("Camera {} not found", id)))
    }

    /// Returns false when no row matched
    pub async fn delete_camera(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cameras WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================
    // Email recipients
    // ========================================

    pub async fn get_all_recipients(&self) -> Result<Vec<Recipient>> {
        let rows = sqlx::query_as::<_, Recipient>(
            "SELECT id, email, active, created_at FROM email_recipients ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_recipient(&self, id: i64) -> Result<Option<Recipient>> {
        let row = sqlx::query_as::<_, Recipient>(
            "SELECT id, email, active, created_at FROM email_recipients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_recipient_by_email(&self, email: &str) -> Result<Option<Recipient>> {
        let row = sqlx::query_as::<_, Recipient>(
            "SELECT id, email, active, created_at FROM email_recipients WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_active_emails(&self) -> Result<Vec<String>> {
        let emails: Vec<String> =
            sqlx::query_scalar("SELECT email FROM email_recipients WHERE active = TRUE ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(emails)
    }

    pub async fn create_recipient(&self, email: &str, active: bool) -> Result<Recipient> {
        let result = sqlx::query(
            "INSERT INTO email_recipients (email, active, created_at) VALUES (?, ?, ?)",
        )
        .bind(email)
        .bind(active)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_duplicate(e, || format!("Recipient {} already exists", email)))?;

        let id = result.last_insert_id() as i64;
        self.get_recipient(id)
            .await?
            .ok_or(Error::NotFound("Recipient not found after insert".to_string()))
    }

    pub async fn set_recipient_active(&self, id: i64, active: bool) -> Result<Option<Recipient>> {
        sqlx::query("UPDATE email_recipients SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_recipient(id).await
    }

    pub async fn delete_recipient(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM email_recipients WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================
    // WhatsApp recipients
    // ========================================

    pub async fn get_all_wa_recipients(&self) -> Result<Vec<WaRecipient>> {
        let rows = sqlx::query_as::<_, WaRecipient>(
            "SELECT id, phone, active, created_at FROM wa_recipients ORDER BY id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get_wa_recipient(&self, id: i64) -> Result<Option<WaRecipient>> {
        let row = sqlx::query_as::<_, WaRecipient>(
            "SELECT id, phone, active, created_at FROM wa_recipients WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_wa_recipient_by_phone(&self, phone: &str) -> Result<Option<WaRecipient>> {
        let row = sqlx::query_as::<_, WaRecipient>(
            "SELECT id, phone, active, created_at FROM wa_recipients WHERE phone = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_active_phones(&self) -> Result<Vec<String>> {
        let phones: Vec<String> =
            sqlx::query_scalar("SELECT phone FROM wa_recipients WHERE active = TRUE ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(phones)
    }

    pub async fn create_wa_recipient(&self, phone: &str, active: bool) -> Result<WaRecipient> {
        let result = sqlx::query(
            "INSERT INTO wa_recipients (phone, active, created_at) VALUES (?, ?, ?)",
        )
        .bind(phone)
        .bind(active)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_duplicate(e, || format!("WhatsApp recipient {} already exists", phone)))?;

        let id = result.last_insert_id() as i64;
        self.get_wa_recipient(id)
            .await?
            .ok_or(Error::NotFound("WhatsApp recipient not found after insert".to_string()))
    }

    pub async fn set_wa_recipient_active(
        &self,
        id: i64,
        active: bool,
    ) -> Result<Option<WaRecipient>> {
        sqlx::query("UPDATE wa_recipients SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_wa_recipient(id).await
    }

    pub async fn delete_wa_recipient(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM wa_recipients WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
