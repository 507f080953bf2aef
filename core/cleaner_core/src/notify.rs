use async_trait::async_trait;
use reqwest::Client;
use tracing::{error, info};

use crate::error::Result;
use crate::platform::{Notification, Notifier};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn show(&self, notification: &Notification) {
        info!("[{}] {}", notification.title, notification.message);
    }
}

/// POSTs `{title, message}` as JSON to a URL (a desktop notifier, chat hook, ...).
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    async fn post(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn show(&self, notification: &Notification) {
        LogNotifier.show(notification).await;
        if let Err(e) = self.post(notification).await {
            error!("notify post failed: {e}");
        }
    }
}
