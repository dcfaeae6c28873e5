//! WhatsApp gateway delivery
//!
//! One form POST per phone number (`target`, `message`) with the gateway
//! token in the `Authorization` header. Text only.

use crate::error::{Error, Result};

/// WhatsApp gateway configuration
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub url: String,
    pub token: String,
}

/// Send `message` to every phone; returns the number of failed deliveries
pub async fn send_all(
    client: &reqwest::Client,
    config: &WhatsAppConfig,
    phones: &[String],
    message: &str,
) -> usize {
    let mut failed = 0;
    for phone in phones {
        if let Err(e) = send_one(client, config, phone, message).await {
            tracing::warn!(phone = %phone, error = %e, "WhatsApp delivery failed");
            failed += 1;
        }
    }
    failed
}

async fn send_one(
    client: &reqwest::Client,
    config: &WhatsAppConfig,
    phone: &str,
    message: &str,
) -> Result<()> {
    let params = [("target", phone), ("message", message)];

    let resp = client
        .post(&config.url)
        .header("Authorization", &config.token)
        .form(&params)
        .send()
        .await
        .map_err(|e| Error::Notification(format!("WhatsApp request failed: {}", e)))?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Notification(format!(
            "WhatsApp gateway error {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }

    Ok(())
}
