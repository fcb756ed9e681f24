//! Outbound notifications.
//!
//! Scans and downloads report their terminal conditions and anomalies through
//! the [`Notifier`] trait. Delivery failures are logged and never propagated.

mod webhook;

use async_trait::async_trait;
use tracing::{error, info};

use crate::domain::{EpisodeId, WorkId};

pub use webhook::WebhookNotifier;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Report an anomaly in `area` (e.g. "Scan", "DownloadPage").
    async fn notify_error(&self, area: &str, message: &str);

    /// Report that a new episode was published.
    async fn notify_found(&self, work: &WorkId, episode: &EpisodeId);

    /// Post a freeform message.
    async fn post(&self, message: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_error(&self, area: &str, message: &str) {
        error!(area, "{}", message);
    }

    async fn notify_found(&self, work: &WorkId, episode: &EpisodeId) {
        info!(work = %work, episode = %episode, "Episode found");
    }

    async fn post(&self, message: &str) {
        info!("{}", message);
    }
}

pub(crate) fn found_message(work: &WorkId, episode: &EpisodeId) -> String {
    format!(
        "Episode of book found! Found BookID {} EpisodeID {} at {}",
        work,
        episode,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )
}

pub(crate) fn error_message(area: &str, message: &str) -> String {
    format!("Error in {}: {}", area, message)
}
