//! Concurrent page downloader.
//!
//! Pages are fetched in windows of at most `concurrency` requests. A window
//! is awaited as a whole before the next one is admitted, failed pages are
//! retried after a pause, and a [`CircuitBreaker`] decides when to give up.
//! Only failures of the lowest page still missing count toward the breaker;
//! while that page keeps failing it is retried on its own.

mod breaker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{BookwatchError, Result};
use crate::config::DownloaderConfig;
use crate::domain::{EpisodeId, ImageUrls, Resolution, WorkId};
use crate::notify::Notifier;
use crate::probe::ContentProbe;
use crate::scanner::suspend;

pub use breaker::CircuitBreaker;

pub const DEFAULT_CONCURRENCY: usize = 10;

/// One page to fetch.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub destination: PathBuf,
    pub page: u32,
    /// Failed attempts of this page so far
    pub consecutive_errors: u32,
}

/// A published episode to download.
#[derive(Debug, Clone)]
pub struct EpisodeDownload {
    pub work: WorkId,
    pub episode: EpisodeId,
    pub segment: String,
    pub auth_token: String,
    /// Ceiling on page numbers to try
    pub max_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStop {
    /// Every page up to the ceiling was written.
    Completed,
    /// Pages stopped being served after at least one success.
    EndOfContent,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub directory: PathBuf,
    pub pages_written: u32,
    pub stop: DownloadStop,
}

pub struct PageDownloader {
    probe: Arc<dyn ContentProbe>,
    notifier: Arc<dyn Notifier>,
    images: ImageUrls,
    download_dir: PathBuf,
    concurrency: usize,
    cold_threshold: u32,
    warm_threshold: u32,
    retry_backoff: Duration,
    cancel: CancellationToken,
}

impl PageDownloader {
    pub fn new(
        probe: Arc<dyn ContentProbe>,
        notifier: Arc<dyn Notifier>,
        images: ImageUrls,
        config: &DownloaderConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            notifier,
            images,
            download_dir: config.download_dir.clone(),
            concurrency: config.concurrency.max(1),
            cold_threshold: config.cold_error_threshold,
            warm_threshold: config.warm_error_threshold,
            retry_backoff: config.retry_backoff(),
            cancel,
        }
    }

    pub fn episode_dir(&self, episode: &EpisodeId) -> PathBuf {
        self.download_dir.join(episode.as_str())
    }

    /// Download every page of `target` into its episode directory.
    ///
    /// Running out of pages after a success is the normal end of an episode.
    /// Hitting the cold threshold without any success is
    /// [`BookwatchError::CircuitOpen`].
    pub async fn download(&self, target: &EpisodeDownload) -> Result<DownloadReport> {
        let directory = self.episode_dir(&target.episode);
        tokio::fs::create_dir_all(&directory).await?;

        info!(
            episode = %target.episode,
            max_pages = target.max_pages,
            dir = %directory.display(),
            "Downloading episode"
        );

        let mut breaker = CircuitBreaker::new(self.cold_threshold, self.warm_threshold);
        // Keyed by page so the lowest missing page is always retried first
        let mut retries: BTreeMap<u32, DownloadJob> = BTreeMap::new();
        let mut next_page = 1u32;
        let mut pages_written = 0u32;

        let stop = loop {
            if self.cancel.is_cancelled() {
                break DownloadStop::Cancelled;
            }

            let window_size = if breaker.consecutive_errors() > 0 {
                1
            } else {
                self.concurrency
            };
            let mut window = Vec::with_capacity(window_size);
            while window.len() < window_size {
                if let Some((_, job)) = retries.pop_first() {
                    window.push(job);
                } else if next_page <= target.max_pages {
                    window.push(self.job(target, &directory, next_page));
                    next_page += 1;
                } else {
                    break;
                }
            }

            if window.is_empty() {
                break DownloadStop::Completed;
            }

            let results = self.fetch_window(window).await;

            let mut failed = false;
            for (mut job, result) in results {
                if breaker.is_tripped() {
                    break;
                }
                match result {
                    Ok(bytes) => {
                        tokio::fs::write(&job.destination, &bytes).await?;
                        breaker.record_success();
                        pages_written += 1;
                        debug!(page = job.page, bytes = bytes.len(), "Page written");
                    }
                    Err(e) => {
                        // The first failure of a window is the lowest page still missing
                        if !failed {
                            breaker.record_failure();
                        }
                        failed = true;
                        job.consecutive_errors += 1;
                        warn!(
                            page = job.page,
                            attempt = job.consecutive_errors,
                            consecutive = breaker.consecutive_errors(),
                            "Page download failed: {}",
                            e
                        );
                        self.notifier
                            .notify_error(
                                "DownloadPage",
                                &format!("Page {} of {}: {}", job.page, target.episode, e),
                            )
                            .await;
                        retries.insert(job.page, job);
                    }
                }
            }

            if breaker.is_tripped() {
                if breaker.has_succeeded() {
                    break DownloadStop::EndOfContent;
                }
                let consecutive_errors = breaker.consecutive_errors();
                error!(
                    episode = %target.episode,
                    consecutive_errors,
                    "Giving up on episode download"
                );
                self.notifier
                    .notify_error(
                        "Download",
                        &format!(
                            "Episode {} aborted after {} consecutive failures",
                            target.episode, consecutive_errors
                        ),
                    )
                    .await;
                return Err(BookwatchError::CircuitOpen { consecutive_errors });
            }

            if failed && !suspend(&self.cancel, self.retry_backoff).await {
                break DownloadStop::Cancelled;
            }
        };

        info!(
            episode = %target.episode,
            pages = pages_written,
            ?stop,
            "Episode download finished"
        );
        if stop != DownloadStop::Cancelled {
            self.notifier
                .post(&format!(
                    "Downloaded {} pages of episode {}",
                    pages_written, target.episode
                ))
                .await;
        }

        Ok(DownloadReport {
            directory,
            pages_written,
            stop,
        })
    }

    fn job(&self, target: &EpisodeDownload, directory: &Path, page: u32) -> DownloadJob {
        DownloadJob {
            url: self.images.page_url(
                &target.work,
                &target.episode,
                &target.segment,
                Resolution::Full,
                page,
                &target.auth_token,
            ),
            destination: directory.join(format!("{:03}.jpg", page)),
            page,
            consecutive_errors: 0,
        }
    }

    /// Fetch a window concurrently; results come back in page order.
    async fn fetch_window(&self, mut window: Vec<DownloadJob>) -> Vec<(DownloadJob, Result<Vec<u8>>)> {
        window.sort_by_key(|job| job.page);

        let handles: Vec<_> = window
            .iter()
            .map(|job| {
                let probe = self.probe.clone();
                let url = job.url.clone();
                tokio::spawn(async move { probe.fetch_page(&url).await })
            })
            .collect();

        window
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(job, joined)| {
                let result = joined.unwrap_or_else(|e| {
                    Err(BookwatchError::Other(format!("Download task failed: {}", e)))
                });
                (job, result)
            })
            .collect()
    }
}
