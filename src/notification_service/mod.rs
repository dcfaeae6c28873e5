//! NotificationService - operator alerts
//!
//! ## Responsibilities
//!
//! - Email delivery through an ordered fallback chain:
//!   SMTP STARTTLS -> SMTP implicit TLS -> transactional email API
//! - WhatsApp gateway delivery to phone recipients
//! - Alert composition (subject, body, in-memory image attachment)
//!
//! Delivery never fails past this boundary: callers get a bool.

mod email_api;
mod smtp;
mod whatsapp;

pub use email_api::EmailApiConfig;
pub use smtp::{SmtpConfig, SmtpMode};
pub use whatsapp::WhatsAppConfig;

use crate::error::{Error, Result};
use crate::interfaces::AlertSink;
use crate::models::ImageKind;
use crate::registry::RecipientList;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::time::Duration;

/// In-memory attachment
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    /// Image attachment named `<stem>.<ext>` after the sniffed format
    pub fn image(stem: &str, data: Vec<u8>) -> Self {
        let kind = ImageKind::sniff(&data).unwrap_or(ImageKind::JPEG);
        Self {
            filename: format!("{}.{}", stem, kind.extension),
            mime_type: kind.mime_type.to_string(),
            data,
        }
    }
}

/// Human-readable alert
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl Alert {
    /// Alert for a confirmed dirty floor
    pub fn dirty_floor(
        name: &str,
        location: Option<&str>,
        confidence: f64,
        detected_at: DateTime<Utc>,
        image: Option<Vec<u8>>,
    ) -> Self {
        let mut body = format!("Dirty floor detected.\n\nCamera: {}\n", name);
        if let Some(location) = location.filter(|l| !l.is_empty()) {
            body.push_str(&format!("Location: {}\n", location));
        }
        body.push_str(&format!(
            "Confidence: {:.1}%\nTime: {}\n\nPlease send cleaning staff to check the area.",
            confidence * 100.0,
            detected_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        Self {
            subject: format!("[FloorEye] Dirty floor detected ({})", name),
            body,
            attachment: image.map(|data| {
                Attachment::image(&format!("dirty_{}", detected_at.timestamp()), data)
            }),
        }
    }

    /// Delivery check sent from the recipients page
    pub fn test_message(sent_at: DateTime<Utc>) -> Self {
        Self {
            subject: "[FloorEye] Test notification".to_string(),
            body: format!(
                "This is a test notification from FloorEye.\nSent at {}.",
                sent_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            attachment: None,
        }
    }
}

/// Notifier configuration
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub smtp: Option<SmtpConfig>,
    pub email_api: Option<EmailApiConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    /// HTTP timeout for the email API and WhatsApp gateway
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            smtp: None,
            email_api: None,
            whatsapp: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// One email delivery mechanism
#[derive(Debug, Clone)]
pub enum EmailTransport {
    SmtpStartTls(SmtpConfig),
    SmtpTls(SmtpConfig),
    EmailApi(EmailApiConfig),
}

impl EmailTransport {
    pub fn name(&self) -> &'static str {
        match self {
            EmailTransport::SmtpStartTls(_) => "smtp_starttls",
            EmailTransport::SmtpTls(_) => "smtp_tls",
            EmailTransport::EmailApi(_) => "email_api",
        }
    }

    async fn send(&self, client: &reqwest::Client, to: &[String], alert: &Alert) -> Result<()> {
        match self {
            EmailTransport::SmtpStartTls(cfg) => smtp::send(cfg, SmtpMode::StartTls, to, alert).await,
            EmailTransport::SmtpTls(cfg) => smtp::send(cfg, SmtpMode::Tls, to, alert).await,
            EmailTransport::EmailApi(cfg) => email_api::send(client, cfg, to, alert).await,
        }
    }
}

/// Notifier instance
pub struct Notifier {
    client: reqwest::Client,
    chain: Vec<EmailTransport>,
    whatsapp: Option<WhatsAppConfig>,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let mut chain = Vec::new();
        if let Some(smtp) = config.smtp {
            chain.push(EmailTransport::SmtpStartTls(smtp.clone()));
            chain.push(EmailTransport::SmtpTls(smtp));
        }
        if let Some(api) = config.email_api {
            chain.push(EmailTransport::EmailApi(api));
        }

        Ok(Self {
            client,
            chain,
            whatsapp: config.whatsapp,
        })
    }

    /// Transport names in priority order
    pub fn chain_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(EmailTransport::name).collect()
    }

    pub fn whatsapp_configured(&self) -> bool {
        self.whatsapp.is_some()
    }

    /// Try each transport in order; true on the first success
    pub async fn notify_email(&self, alert: &Alert, to: &[String]) -> bool {
        if to.is_empty() {
            return false;
        }
        if self.chain.is_empty() {
            tracing::warn!(recipients = to.len(), "No email transport configured, alert dropped");
            return false;
        }

        for transport in &self.chain {
            match transport.send(&self.client, to, alert).await {
                Ok(()) => {
                    tracing::info!(
                        transport = transport.name(),
                        recipients = to.len(),
                        subject = %alert.subject,
                        "Email alert sent"
                    );
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        transport = transport.name(),
                        error = %e,
                        "Email transport failed, trying next"
                    );
                }
            }
        }

        tracing::error!(
            recipients = to.len(),
            transports = self.chain.len(),
            "All email transports failed"
        );
        false
    }

    /// Text-only WhatsApp fan-out; true when every phone was reached
    pub async fn notify_whatsapp(&self, alert: &Alert, phones: &[String]) -> bool {
        let Some(config) = &self.whatsapp else {
            tracing::warn!(recipients = phones.len(), "WhatsApp gateway not configured");
            return false;
        };

        let message = format!("{}\n\n{}", alert.subject, alert.body);
        let failed = whatsapp::send_all(&self.client, config, phones, &message).await;
        if failed == 0 {
            tracing::info!(recipients = phones.len(), "WhatsApp alert sent");
        }
        failed == 0
    }

    /// Deliver on every channel that has recipients
    ///
    /// `Some(true)` only when every attempted channel succeeded. WhatsApp
    /// recipients without a configured gateway are skipped; `None` when no
    /// channel was attempted at all.
    pub async fn notify(&self, alert: &Alert, recipients: &RecipientList) -> Option<bool> {
        let mut attempted = false;
        let mut all_ok = true;

        if !recipients.emails.is_empty() {
            attempted = true;
            all_ok &= self.notify_email(alert, &recipients.emails).await;
        }

        if !recipients.phones.is_empty() {
            if self.whatsapp.is_some() {
                attempted = true;
                all_ok &= self.notify_whatsapp(alert, &recipients.phones).await;
            } else {
                tracing::debug!(
                    phones = recipients.phones.len(),
                    "WhatsApp recipients skipped, gateway not configured"
                );
            }
        }

        attempted.then_some(all_ok)
    }
}

impl AlertSink for Notifier {
    fn notify<'a>(
        &'a self,
        alert: &'a Alert,
        recipients: &'a RecipientList,
    ) -> BoxFuture<'a, Option<bool>> {
        Notifier::notify(self, alert, recipients).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{HeaderMap, StatusCode},
        routing::post,
        Form, Json, Router,
    };
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn closed_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn dead_smtp() -> SmtpConfig {
        SmtpConfig {
            host: "127.0.0.1".to_string(),
            starttls_port: closed_port(),
            tls_port: closed_port(),
            username: Some("alerts@flooreye.local".to_string()),
            password: Some("secret".to_string()),
            from: "alerts@flooreye.local".to_string(),
            timeout: Duration::from_secs(2),
        }
    }

    fn sample_alert() -> Alert {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        Alert::dirty_floor("Lobby", Some("1F"), 0.82, at, Some(vec![0xFF, 0xD8, 0xFF]))
    }

    #[test]
    fn test_dirty_floor_alert() {
        let alert = sample_alert();
        assert_eq!(alert.subject, "[FloorEye] Dirty floor detected (Lobby)");
        assert!(alert.body.contains("Camera: Lobby"));
        assert!(alert.body.contains("Location: 1F"));
        assert!(alert.body.contains("Confidence: 82.0%"));
        assert!(alert.body.contains("2025-03-01 08:30:00 UTC"));

        let att = alert.attachment.unwrap();
        assert_eq!(att.mime_type, "image/jpeg");
        assert!(att.filename.ends_with(".jpg"));

        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 30, 0).unwrap();
        let no_location = Alert::dirty_floor("Hall", None, 0.5, at, None);
        assert!(!no_location.body.contains("Location"));
        assert!(no_location.attachment.is_none());
    }

    #[test]
    fn test_chain_order() {
        let notifier = Notifier::new(NotifierConfig {
            smtp: Some(dead_smtp()),
            email_api: Some(EmailApiConfig {
                url: "http://127.0.0.1:1/send".to_string(),
                api_key: "k".to_string(),
                from: "alerts@flooreye.local".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(notifier.chain_names(), vec!["smtp_starttls", "smtp_tls", "email_api"]);
    }

    #[tokio::test]
    async fn test_empty_chain_fails() {
        let notifier = Notifier::new(NotifierConfig::default()).unwrap();
        let recipients = RecipientList {
            emails: vec!["ops@example.com".to_string()],
            phones: vec![],
        };
        assert_eq!(notifier.notify(&sample_alert(), &recipients).await, Some(false));
    }

    #[tokio::test]
    async fn test_fallback_to_email_api() {
        let received: Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/send",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    sink.lock().unwrap().push((auth, body));
                    StatusCode::OK
                }
            }),
        );
        let base = spawn_server(app).await;

        let notifier = Notifier::new(NotifierConfig {
            smtp: Some(dead_smtp()),
            email_api: Some(EmailApiConfig {
                url: format!("{}/send", base),
                api_key: "test-key".to_string(),
                from: "alerts@flooreye.local".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();

        let recipients = RecipientList {
            emails: vec!["ops@example.com".to_string()],
            phones: vec![],
        };
        assert_eq!(notifier.notify(&sample_alert(), &recipients).await, Some(true));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer test-key"));
        assert_eq!(received[0].1["subject"], "[FloorEye] Dirty floor detected (Lobby)");
        assert_eq!(received[0].1["attachments"][0]["content_type"], "image/jpeg");
    }

    #[tokio::test]
    async fn test_all_transports_fail() {
        let app = Router::new().route(
            "/send",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let base = spawn_server(app).await;

        let notifier = Notifier::new(NotifierConfig {
            smtp: Some(dead_smtp()),
            email_api: Some(EmailApiConfig {
                url: format!("{}/send", base),
                api_key: "wrong".to_string(),
                from: "alerts@flooreye.local".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();

        assert!(
            !notifier
                .notify_email(&sample_alert(), &["ops@example.com".to_string()])
                .await
        );
    }

    #[tokio::test]
    async fn test_whatsapp_gateway() {
        let received: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let app = Router::new().route(
            "/wa",
            post(move |Form(form): Form<HashMap<String, String>>| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(form);
                    StatusCode::OK
                }
            }),
        );
        let base = spawn_server(app).await;

        let notifier = Notifier::new(NotifierConfig {
            whatsapp: Some(WhatsAppConfig {
                url: format!("{}/wa", base),
                token: "wa-token".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();

        let recipients = RecipientList {
            emails: vec![],
            phones: vec!["+6281234567890".to_string(), "0215550199".to_string()],
        };
        assert_eq!(notifier.notify(&sample_alert(), &recipients).await, Some(true));

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0]["target"], "+6281234567890");
        assert!(received[1]["message"].contains("Dirty floor detected (Lobby)"));
    }

    #[tokio::test]
    async fn test_whatsapp_without_gateway_not_attempted() {
        let notifier = Notifier::new(NotifierConfig::default()).unwrap();
        let recipients = RecipientList {
            emails: vec![],
            phones: vec!["+6281234567890".to_string()],
        };
        assert_eq!(notifier.notify(&sample_alert(), &recipients).await, None);
    }
}
