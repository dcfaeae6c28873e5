//! Registry Service
//!
//! Validation and business rules on top of the repository

use super::repository::RegistryRepository;
use super::types::*;
use crate::error::{Error, Result};
use std::str::FromStr;

const STREAM_SCHEMES: [&str; 5] = ["rtsp", "rtsps", "http", "https", "file"];

/// Trim and check a camera display name
pub fn validate_camera_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(Error::Validation(
            "name must be 1-100 characters".to_string(),
        ));
    }
    Ok(name.to_string())
}

/// Accepts `rtsp://`, `rtsps://`, `http(s)://`, `file://` URIs or a plain filesystem path
pub fn validate_stream_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::Validation("stream_url must not be empty".to_string()));
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let scheme = scheme.to_ascii_lowercase();
        if !STREAM_SCHEMES.contains(&scheme.as_str()) {
            return Err(Error::Validation(format!(
                "unsupported stream scheme '{}'",
                scheme
            )));
        }
        if rest.is_empty() {
            return Err(Error::Validation("stream_url has no address".to_string()));
        }
    }

    Ok(url.to_string())
}

/// Syntax check via `lettre::Address`; returns the trimmed address
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim();
    lettre::Address::from_str(email)
        .map_err(|e| Error::Validation(format!("invalid email '{}': {}", email, e)))?;
    Ok(email.to_string())
}

/// Strips separators, keeps an optional leading '+', requires 8-15 digits
pub fn normalize_phone(phone: &str) -> Result<String> {
    let trimmed = phone.trim();
    let (plus, body) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };

    let mut digits = String::with_capacity(body.len());
    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => {
                return Err(Error::Validation(format!(
                    "invalid phone number '{}'",
                    phone
                )))
            }
        }
    }

    if !(8..=15).contains(&digits.len()) {
        return Err(Error::Validation(format!(
            "phone number must have 8-15 digits, got {}",
            digits.len()
        )));
    }

    Ok(format!("{}{}", plus, digits))
}

/// Registry service for business logic
pub struct RegistryService {
    repo: RegistryRepository,
}

impl RegistryService {
    pub fn new(repo: RegistryRepository) -> Self {
        Self { repo }
    }

    // ========================================
    // Camera Operations
    // ========================================

    pub async fn list_cameras(&self) -> Result<Vec<Camera>> {
        self.repo.get_all_cameras().await
    }

    pub async fn list_active_cameras(&self) -> Result<Vec<Camera>> {
        self.repo.get_enabled_cameras().await
    }

    pub async fn get_camera(&self, id: i64) -> Result<Camera> {
        self.repo
            .get_camera(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Camera {} not found", id)))
    }

    pub async fn create_camera(&self, mut req: CreateCameraRequest) -> Result<Camera> {
        req.name = validate_camera_name(&req.name)?;
        req.stream_url = validate_stream_url(&req.stream_url)?;
        req.location = req
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());

        let camera = self.repo.create_camera(&req).await?;
        tracing::info!(camera_id = camera.id, name = %camera.name, "Camera created");
        Ok(camera)
    }

    pub async fn update_camera(&self, id: i64, mut req: UpdateCameraRequest) -> Result<Camera> {
        if req.is_empty() {
            return Err(Error::Validation("No fields to update".to_string()));
        }
        if let Some(ref name) = req.name {
            req.name = Some(validate_camera_name(name)?);
        }
        if let Some(ref url) = req.stream_url {
            req.stream_url = Some(validate_stream_url(url)?);
        }

        // Existence check
        self.get_camera(id).await?;

        self.repo.update_camera(id, &req).await
    }

    pub async fn delete_camera(&self, id: i64) -> Result<()> {
        if !self.repo.delete_camera(id).await? {
            return Err(Error::NotFound(format!("Camera {} not found", id)));
        }
        tracing::info!(camera_id = id, "Camera deleted");
        Ok(())
    }

    // ========================================
    // Recipient Operations
    // ========================================

    pub async fn list_recipients(&self) -> Result<Vec<Recipient>> {
        self.repo.get_all_recipients().await
    }

    pub async fn list_active_emails(&self) -> Result<Vec<String>> {
        self.repo.get_active_emails().await
    }

    pub async fn create_recipient(&self, req: CreateRecipientRequest) -> Result<Recipient> {
        let email = normalize_email(&req.email)?;

        if self.repo.find_recipient_by_email(&email).await?.is_some() {
            return Err(Error::Conflict(format!("Recipient {} already exists", email)));
        }

        self.repo.create_recipient(&email, req.active).await
    }

    pub async fn set_recipient_active(&self, id: i64, active: bool) -> Result<Recipient> {
        self.repo
            .set_recipient_active(id, active)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Recipient {} not found", id)))
    }

    pub async fn delete_recipient(&self, id: i64) -> Result<()> {
        if !self.repo.delete_recipient(id).await? {
            return Err(Error::NotFound(format!("Recipient {} not found", id)));
        }
        Ok(())
    }

    pub async fn list_wa_recipients(&self) -> Result<Vec<WaRecipient>> {
        self.repo.get_all_wa_recipients().await
    }

    pub async fn create_wa_recipient(&self, req: CreateWaRecipientRequest) -> Result<WaRecipient> {
        let phone = normalize_phone(&req.phone)?;

        if self.repo.find_wa_recipient_by_phone(&phone).await?.is_some() {
            return Err(Error::Conflict(format!(
                "WhatsApp recipient {} already exists",
                phone
            )));
        }

        self.repo.create_wa_recipient(&phone, req.active).await
    }

    pub async fn set_wa_recipient_active(&self, id: i64, active: bool) -> Result<WaRecipient> {
        self.repo
            .set_wa_recipient_active(id, active)
            .await?
            .ok_or_else(|| Error::NotFound(format!("WhatsApp recipient {} not found", id)))
    }

    pub async fn delete_wa_recipient(&self, id: i64) -> Result<()> {
        if !self.repo.delete_wa_recipient(id).await? {
            return Err(Error::NotFound(format!("WhatsApp recipient {} not found", id)));
        }
        Ok(())
    }

    /// Active targets on every channel
    pub async fn list_active_recipients(&self) -> Result<RecipientList> {
        let emails = self.repo.get_active_emails().await?;
        let phones = self.repo.get_active_phones().await?;
        Ok(RecipientList { emails, phones })
    }
}
