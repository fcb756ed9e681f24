pub mod http_probe;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::app::Result;
use crate::domain::{EpisodeId, EpisodeMetadata, WorkId};

pub use http_probe::HttpProbe;

/// Availability of a media URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStatus {
    /// HTTP 200
    Available,
    /// HTTP 404
    NotFound,
    /// HTTP 403, the auth token expired
    Forbidden,
    /// Anything else
    Other(u16),
}

impl From<StatusCode> for UrlStatus {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => UrlStatus::Available,
            StatusCode::NOT_FOUND => UrlStatus::NotFound,
            StatusCode::FORBIDDEN => UrlStatus::Forbidden,
            other => UrlStatus::Other(other.as_u16()),
        }
    }
}

/// Access to the remote content service.
#[async_trait]
pub trait ContentProbe: Send + Sync {
    /// Fetch metadata for one episode identifier.
    ///
    /// An unpublished episode is not an error: the returned metadata simply
    /// has no storage key. A 401/403 answer yields
    /// [`BookwatchError::Forbidden`](crate::app::BookwatchError::Forbidden).
    async fn episode_metadata(&self, work: &WorkId, episode: &EpisodeId) -> Result<EpisodeMetadata>;

    /// Check whether a URL is currently served.
    async fn url_status(&self, url: &str) -> Result<UrlStatus>;

    /// Download one page image.
    async fn fetch_page(&self, url: &str) -> Result<Vec<u8>>;
}
