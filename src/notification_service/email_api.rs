//! Transactional email API delivery
//!
//! `POST <url>` with a bearer key and a JSON body
//! `{from, to, subject, text, attachments: [{filename, content_type, content}]}`,
//! attachment content base64 encoded.

use super::Alert;
use crate::error::{Error, Result};
use base64::Engine;
use serde::Serialize;

/// Email API configuration
#[derive(Debug, Clone)]
pub struct EmailApiConfig {
    pub url: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Serialize)]
struct ApiAttachment<'a> {
    filename: &'a str,
    content_type: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    from: &'a str,
    to: &'a [String],
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<ApiAttachment<'a>>,
}

fn request_body<'a>(config: &'a EmailApiConfig, to: &'a [String], alert: &'a Alert) -> ApiRequest<'a> {
    let attachments = alert
        .attachment
        .iter()
        .map(|a| ApiAttachment {
            filename: &a.filename,
            content_type: &a.mime_type,
            content: base64::engine::general_purpose::STANDARD.encode(&a.data),
        })
        .collect();

    ApiRequest {
        from: &config.from,
        to,
        subject: &alert.subject,
        text: &alert.body,
        attachments,
    }
}

/// Send one alert through the API
pub async fn send(
    client: &reqwest::Client,
    config: &EmailApiConfig,
    to: &[String],
    alert: &Alert,
) -> Result<()> {
    let resp = client
        .post(&config.url)
        .bearer_auth(&config.api_key)
        .json(&request_body(config, to, alert))
        .send()
        .await
        .map_err(|e| Error::Notification(format!("email API request failed: {}", e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Notification(format!(
            "email API error {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    Ok(())
}
