//! Shared test doubles for the probe and notification ports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::app::{BookwatchError, Result};
use crate::domain::metadata::{BookData, ProbeResponse};
use crate::domain::{EpisodeId, EpisodeMetadata, WorkId};
use crate::notify::Notifier;
use crate::probe::{ContentProbe, UrlStatus};

pub(crate) const SEGMENT: &str = "a1b2c3";

type MetadataFn = dyn Fn(&WorkId, &EpisodeId, usize) -> Result<EpisodeMetadata> + Send + Sync;
type StatusFn = dyn Fn(&str, usize) -> Result<UrlStatus> + Send + Sync;
type PageFn = dyn Fn(&str) -> Result<Vec<u8>> + Send + Sync;

/// Scripted [`ContentProbe`] that records every call.
///
/// Each closure receives the zero-based index of the call being answered.
pub(crate) struct StubProbe {
    metadata: Box<MetadataFn>,
    status: Box<StatusFn>,
    page: Box<PageFn>,
    metadata_calls: Mutex<Vec<EpisodeId>>,
    status_calls: Mutex<Vec<String>>,
    page_calls: Mutex<Vec<String>>,
    status_count: AtomicUsize,
}

impl StubProbe {
    /// Nothing is ever published and every page fails.
    pub fn new() -> Self {
        Self {
            metadata: Box::new(|work, episode, _| Ok(unpublished(work, episode))),
            status: Box::new(|_, _| Ok(UrlStatus::NotFound)),
            page: Box::new(|url| {
                Err(BookwatchError::UnexpectedStatus {
                    status: 404,
                    url: url.to_string(),
                })
            }),
            metadata_calls: Mutex::new(Vec::new()),
            status_calls: Mutex::new(Vec::new()),
            page_calls: Mutex::new(Vec::new()),
            status_count: AtomicUsize::new(0),
        }
    }

    pub fn with_metadata<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkId, &EpisodeId, usize) -> Result<EpisodeMetadata> + Send + Sync + 'static,
    {
        self.metadata = Box::new(f);
        self
    }

    pub fn with_status<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize) -> Result<UrlStatus> + Send + Sync + 'static,
    {
        self.status = Box::new(f);
        self
    }

    pub fn with_pages<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<u8>> + Send + Sync + 'static,
    {
        self.page = Box::new(f);
        self
    }

    /// Episodes are published up to and including `last` sequence number.
    pub fn published_through(last: u32) -> Self {
        Self::new().with_metadata(move |work, episode, _| {
            if episode.sequence() <= last {
                Ok(published(work, episode, "token=fresh"))
            } else {
                Ok(unpublished(work, episode))
            }
        })
    }

    pub fn metadata_calls(&self) -> Vec<EpisodeId> {
        self.metadata_calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<String> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn page_calls(&self) -> Vec<String> {
        self.page_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContentProbe for StubProbe {
    async fn episode_metadata(&self, work: &WorkId, episode: &EpisodeId) -> Result<EpisodeMetadata> {
        let index = {
            let mut calls = self.metadata_calls.lock().unwrap();
            calls.push(episode.clone());
            calls.len() - 1
        };
        (self.metadata)(work, episode, index)
    }

    async fn url_status(&self, url: &str) -> Result<UrlStatus> {
        self.status_calls.lock().unwrap().push(url.to_string());
        let index = self.status_count.fetch_add(1, Ordering::SeqCst);
        (self.status)(url, index)
    }

    async fn fetch_page(&self, url: &str) -> Result<Vec<u8>> {
        self.page_calls.lock().unwrap().push(url.to_string());
        (self.page)(url)
    }
}

/// Page number of a media URL built by `ImageUrls::page_url`.
pub(crate) fn page_number(url: &str) -> u32 {
    let file = url.rsplit("//").next().unwrap();
    file.split('.').next().unwrap().parse().unwrap()
}

pub(crate) fn published(work: &WorkId, episode: &EpisodeId, token: &str) -> EpisodeMetadata {
    EpisodeMetadata::from_response(
        work.clone(),
        episode.clone(),
        ProbeResponse {
            guardian_server: Some("guardian-7".into()),
            additional_query_string: Some(token.into()),
            book_data: Some(BookData {
                s3_key: Some(format!("books/{}/{}{}/x", work.padded(), episode, SEGMENT)),
                title: Some(format!("Series {}", episode.sequence())),
                author: Some("Author".into()),
                page_count: Some(24),
            }),
        },
    )
}

pub(crate) fn unpublished(work: &WorkId, episode: &EpisodeId) -> EpisodeMetadata {
    EpisodeMetadata::from_response(
        work.clone(),
        episode.clone(),
        ProbeResponse {
            guardian_server: Some("guardian-7".into()),
            additional_query_string: Some("token=fresh".into()),
            book_data: None,
        },
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Notice {
    Error { area: String, message: String },
    Found { work: String, episode: String },
    Message(String),
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn errors(&self, area: &str) -> usize {
        self.notices()
            .iter()
            .filter(|n| matches!(n, Notice::Error { area: a, .. } if a == area))
            .count()
    }

    pub fn messages(&self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                Notice::Message(m) => Some(m),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_error(&self, area: &str, message: &str) {
        self.notices.lock().unwrap().push(Notice::Error {
            area: area.into(),
            message: message.into(),
        });
    }

    async fn notify_found(&self, work: &WorkId, episode: &EpisodeId) {
        self.notices.lock().unwrap().push(Notice::Found {
            work: work.to_string(),
            episode: episode.to_string(),
        });
    }

    async fn post(&self, message: &str) {
        self.notices
            .lock()
            .unwrap()
            .push(Notice::Message(message.into()));
    }
}
