//! Operator notification channel, abstracted behind a trait so the destination is
//! environment-supplied (a webhook URL) rather than a literal identifier in code.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub worker: String,
    pub message: String,
}

#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Posts each notification as a JSON body to a configured webhook URL.
pub struct WebhookNotifier {
    http: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl OperatorNotifier for WebhookNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.http
            .post(&self.webhook_url)
            .json(&notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Notifier that swallows every notification, used when no webhook is configured.
pub struct NullNotifier;

#[async_trait]
impl OperatorNotifier for NullNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        tracing::debug!(
            event = "relay.notify.dropped",
            worker = %notification.worker,
            message = %notification.message,
            "no operator notifier configured"
        );
        Ok(())
    }
}
