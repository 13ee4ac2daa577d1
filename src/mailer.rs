//! Outbound email
//!
//! Two messages leave the system: the portal magic link sent to a client, and
//! the upload notice sent to the advisor. Delivery is always best-effort;
//! callers log failures and carry on.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

use crate::error::CrmError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<(), CrmError>;
}

/// Writes messages to the log instead of delivering them
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), CrmError> {
        info!(to = %message.to, subject = %message.subject, "Mail (log only)");
        Ok(())
    }
}

/// POSTs messages as JSON to an HTTP mail relay
pub struct WebhookMailer {
    client: reqwest::Client,
    relay_url: String,
}

impl WebhookMailer {
    pub fn new(relay_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            relay_url,
        }
    }
}

#[async_trait]
impl Mailer for WebhookMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), CrmError> {
        let response = self
            .client
            .post(&self.relay_url)
            .json(message)
            .send()
            .await
            .map_err(|e| CrmError::Mail(format!("relay request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CrmError::Mail(format!("relay returned {}", response.status())));
        }

        info!(to = %message.to, subject = %message.subject, "Mail sent via relay");
        Ok(())
    }
}

/// Keeps every message in memory; for tests
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), CrmError> {
        self.sent
            .lock()
            .map_err(|e| CrmError::Internal(format!("Lock poisoned: {}", e)))?
            .push(message.clone());
        Ok(())
    }
}

/// Portal link carrying the token as a query parameter
pub fn magic_link_url(portal_base_url: &str, token: &str) -> String {
    format!(
        "{}?token={}",
        portal_base_url.trim_end_matches('/'),
        url::form_urlencoded::byte_serialize(token.as_bytes()).collect::<String>()
    )
}

pub fn magic_link_message(
    from: &str,
    to: &str,
    client_name: &str,
    link: &str,
    ttl_days: u32,
) -> MailMessage {
    MailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: format!("Your tax strategy roadmap, {}", client_name),
        body: format!(
            "Hello {},\n\n\
             Your advisor has shared your tax strategy roadmap. Open it here:\n\n\
             {}\n\n\
             This link expires in {} days. You can also use it to upload documents.\n",
            client_name, link, ttl_days
        ),
    }
}

pub fn upload_notification_message(from: &str, to: &str, client_name: &str, file_name: &str) -> MailMessage {
    MailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: format!("{} uploaded a document", client_name),
        body: format!("{} uploaded \"{}\" through the client portal.\n", client_name, file_name),
    }
}
