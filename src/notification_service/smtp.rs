//! SMTP delivery (STARTTLS submission and implicit TLS)

use super::Alert;
use crate::error::{Error, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

/// SMTP relay configuration
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    /// STARTTLS submission port
    pub starttls_port: u16,
    /// Implicit TLS port
    pub tls_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Envelope / header sender
    pub from: String,
    pub timeout: Duration,
}

/// TLS mode of one SMTP attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpMode {
    StartTls,
    Tls,
}

/// Build the MIME message: text body plus optional attachment
pub fn build_message(from: &str, to: &[String], alert: &Alert) -> Result<Message> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| Error::Notification(format!("invalid sender '{}': {}", from, e)))?;

    let mut builder = Message::builder().from(from).subject(alert.subject.clone());
    for addr in to {
        let mailbox: Mailbox = addr
            .parse()
            .map_err(|e| Error::Notification(format!("invalid recipient '{}': {}", addr, e)))?;
        builder = builder.to(mailbox);
    }

    let text = SinglePart::plain(alert.body.clone());
    let message = match &alert.attachment {
        Some(att) => {
            let content_type = ContentType::parse(&att.mime_type).map_err(|e| {
                Error::Notification(format!("invalid attachment type '{}': {}", att.mime_type, e))
            })?;
            let part = MailAttachment::new(att.filename.clone()).body(att.data.clone(), content_type);
            builder.multipart(MultiPart::mixed().singlepart(text).singlepart(part))
        }
        None => builder.singlepart(text),
    };

    message.map_err(|e| Error::Notification(format!("message build failed: {}", e)))
}

/// Send one alert over SMTP in the given mode
pub async fn send(config: &SmtpConfig, mode: SmtpMode, to: &[String], alert: &Alert) -> Result<()> {
    let message = build_message(&config.from, to, alert)?;

    let (builder, port) = match mode {
        SmtpMode::StartTls => (
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host),
            config.starttls_port,
        ),
        SmtpMode::Tls => (
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
            config.tls_port,
        ),
    };

    let mut builder = builder
        .map_err(|e| Error::Notification(format!("smtp setup failed: {}", e)))?
        .port(port)
        .timeout(Some(config.timeout));

    if let (Some(user), Some(pass)) = (&config.username, &config.password) {
        builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
    }

    let mailer = builder.build();
    mailer
        .send(message)
        .await
        .map_err(|e| Error::Notification(format!("smtp {}:{} failed: {}", config.host, port, e)))?;

    Ok(())
}
