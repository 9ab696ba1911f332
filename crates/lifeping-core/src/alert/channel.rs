//! Delivery channels for contact alerts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::AlertMessage;
use crate::error::{DispatchError, Result};
use crate::storage::{AlertChannelKind, AlertsConfig, Contact};

/// Something that can carry an alert to one contact.
///
/// Channels are stateless between calls; one failed delivery says nothing about
/// the next contact.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Unique identifier (e.g. "log", "webhook").
    fn name(&self) -> &str;

    async fn deliver(&self, alert: &AlertMessage, contact: &Contact) -> Result<(), DispatchError>;
}

/// Writes the alert to the log. Used when no relay is configured.
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &AlertMessage, contact: &Contact) -> Result<(), DispatchError> {
        tracing::warn!(
            contact_id = contact.id,
            contact = %contact.name,
            email = %contact.email,
            phone = %contact.phone_number,
            "ALERT: {}",
            alert.text
        );
        Ok(())
    }
}

/// Posts each alert as JSON to an email/SMS relay.
pub struct WebhookChannel {
    client: Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, alert: &AlertMessage, contact: &Contact) -> Result<(), DispatchError> {
        let body = json!({
            "to": {
                "name": contact.name,
                "relationship": contact.relationship,
                "email": contact.email,
                "phone": contact.phone_number,
            },
            "user": {
                "id": alert.user_id,
                "name": alert.user_name,
                "email": alert.user_email,
            },
            "deadline_at": alert.deadline_at,
            "overdue_minutes": alert.overdue_minutes,
            "message": alert.text,
        });

        let resp = self.client.post(&self.url).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = resp.text().await.unwrap_or_default();
            Err(DispatchError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}

/// Build the channel selected in preferences.
pub fn channel_from_config(config: &AlertsConfig) -> Result<Arc<dyn AlertChannel>, DispatchError> {
    match config.channel {
        AlertChannelKind::Log => Ok(Arc::new(LogChannel)),
        AlertChannelKind::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| DispatchError::NotConfigured("alerts.webhook_url".into()))?;
            let timeout = Duration::from_secs(config.request_timeout_secs);
            let channel = WebhookChannel::new(url, timeout)?;
            Ok(Arc::new(channel))
        }
    }
}
