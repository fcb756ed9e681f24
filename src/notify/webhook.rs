use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::config::NotifyConfig;
use crate::domain::{EpisodeId, WorkId};
use crate::notify::{error_message, found_message, LogNotifier, Notifier};

/// Posts notifications to a chat incoming-webhook as `{"content": ...}`.
///
/// Every notification is also written to the log.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout: Duration,
    log: LogNotifier,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            url,
            timeout,
            log: LogNotifier,
        }
    }

    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        config
            .webhook_url
            .as_ref()
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(url.clone(), config.webhook_timeout()))
    }

    async fn send(&self, content: &str) {
        let request = self
            .client
            .post(&self.url)
            .json(&json!({ "content": content }))
            .timeout(self.timeout);

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(url = %self.url, "webhook sent successfully");
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                tracing::warn!(url = %self.url, %status, body = %body, "webhook failed");
            }
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "webhook failed");
            }
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_error(&self, area: &str, message: &str) {
        self.log.notify_error(area, message).await;
        self.send(&error_message(area, message)).await;
    }

    async fn notify_found(&self, work: &WorkId, episode: &EpisodeId) {
        self.log.notify_found(work, episode).await;
        self.send(&found_message(work, episode)).await;
    }

    async fn post(&self, message: &str) {
        self.log.post(message).await;
        self.send(message).await;
    }
}
