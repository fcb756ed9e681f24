//! Long-running watch for new episodes.
//!
//! For each work: catch up the backlog, poll the preview image of the next
//! identifier, wait for the full resolution to be served, record the
//! episode and download it. Works are watched concurrently, each under its
//! own child cancellation token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::{AppContext, BookwatchError, Result};
use crate::config::format_interval;
use crate::domain::{Book, Episode, EpisodeId, EpisodeMetadata, Resolution, WorkId};
use crate::downloader::{DownloadReport, EpisodeDownload};
use crate::probe::UrlStatus;
use crate::scanner::{suspend, ProbeTarget, ScanCursor, ScanEnd, ScanPolicy};
use crate::store::Store;

/// One work to watch.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    pub work: WorkId,
    /// Watch for the episode after this one instead of catching up first
    pub after: Option<EpisodeId>,
    /// Server segment override
    pub segment: Option<String>,
}

impl WatchTarget {
    pub fn new(work: WorkId) -> Self {
        Self {
            work,
            after: None,
            segment: None,
        }
    }
}

#[derive(Debug)]
pub enum WatchOutcome {
    Downloaded {
        episode: EpisodeId,
        report: DownloadReport,
    },
    Exhausted,
    Cancelled,
}

/// Result of retrying something until it succeeds or the budget runs out.
enum Wait<T> {
    Ready(T),
    GaveUp,
    Cancelled,
}

pub struct Watcher {
    ctx: Arc<AppContext>,
    policy: ScanPolicy,
    follow: bool,
}

impl Watcher {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let policy = ScanPolicy::next_episode(&ctx.config.scanner);
        Self {
            ctx,
            policy,
            follow: false,
        }
    }

    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep watching for the following episode after each download.
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    /// Watch several works concurrently until each one finishes.
    pub async fn watch_all(
        self: Arc<Self>,
        targets: Vec<WatchTarget>,
    ) -> Vec<(WorkId, Result<WatchOutcome>)> {
        info!(
            works = targets.len(),
            interval = %format_interval(self.policy.interval),
            "Watcher started"
        );

        let mut handles = Vec::new();
        for target in targets {
            let watcher = self.clone();
            let cancel = self.ctx.cancel.child_token();
            let work = target.work.clone();

            let handle = tokio::spawn(async move { watcher.run(target, cancel).await });
            handles.push((work, handle));
        }

        let mut results = Vec::new();
        for (work, handle) in handles {
            match handle.await {
                Ok(result) => results.push((work, result)),
                Err(e) => {
                    error!("Task join error: {}", e);
                    results.push((work, Err(BookwatchError::Other(e.to_string()))));
                }
            }
        }

        results
    }

    /// Watch one work, following on to later episodes if configured.
    pub async fn run(&self, mut target: WatchTarget, cancel: CancellationToken) -> Result<WatchOutcome> {
        loop {
            let outcome = self.watch(&target, cancel.clone()).await?;
            match outcome {
                WatchOutcome::Downloaded { ref episode, .. } if self.follow => {
                    target.after = Some(episode.clone());
                }
                _ => return Ok(outcome),
            }
        }
    }

    /// Wait for the episode after the newest known one and download it.
    pub async fn watch(&self, target: &WatchTarget, cancel: CancellationToken) -> Result<WatchOutcome> {
        let ctx = &self.ctx;
        let work = &target.work;
        let book = ctx
            .store
            .get_book_by_lookup(work.as_str())?
            .ok_or_else(|| BookwatchError::BookNotFound(work.to_string()))?;

        let known = match &target.after {
            Some(after) => after.clone(),
            None => match ctx.locator(cancel.clone()).locate(work).await? {
                Some(newest) => newest.episode_id,
                None if cancel.is_cancelled() => return Ok(WatchOutcome::Cancelled),
                None => {
                    return Err(BookwatchError::Other(format!(
                        "Book {} has no published episode to watch from",
                        work
                    )))
                }
            },
        };
        if cancel.is_cancelled() {
            return Ok(WatchOutcome::Cancelled);
        }

        let previous = match self.known_metadata(work, &known, &cancel).await? {
            Wait::Ready(metadata) => metadata,
            Wait::GaveUp => {
                ctx.notifier
                    .post(&format!(
                        "Gave up reading episode {} of book {}",
                        known, work
                    ))
                    .await;
                return Ok(WatchOutcome::Exhausted);
            }
            Wait::Cancelled => return Ok(WatchOutcome::Cancelled),
        };
        let segment = Self::segment_for(target, &book, &previous)?;
        let title = previous.display_title().to_string();

        info!(work = %work, after = %known, segment = %segment, "Watching for next episode");

        let cursor = ScanCursor::following(work.clone(), known.clone())?
            .with_token(previous.auth_token.clone());
        let end = ctx
            .scanner(self.policy.clone(), cancel.clone())
            .with_target(ProbeTarget::PreviewImage {
                images: ctx.images(),
                segment: segment.clone(),
            })
            .run(cursor, |_| Ok(()))
            .await?;

        let episode = match end {
            ScanEnd::Found { episode, .. } => episode,
            ScanEnd::Exhausted { .. } => return Ok(WatchOutcome::Exhausted),
            ScanEnd::Cancelled { .. } => return Ok(WatchOutcome::Cancelled),
        };

        ctx.notifier
            .post(&format!("The episode following: {}", title))
            .await;

        let mut token = match ctx.probe.episode_metadata(work, &episode).await {
            Ok(metadata) if metadata.auth_token.is_some() => metadata.auth_token,
            _ => previous.auth_token.clone(),
        }
        .unwrap_or_default();

        match self
            .await_full_resolution(work, &known, &episode, &segment, &mut token, &cancel)
            .await
        {
            Wait::Ready(()) => {}
            Wait::GaveUp => {
                ctx.notifier
                    .post(&format!(
                        "Full resolution of episode {} was never published",
                        episode
                    ))
                    .await;
                return Ok(WatchOutcome::Exhausted);
            }
            Wait::Cancelled => return Ok(WatchOutcome::Cancelled),
        }

        Self::record(ctx.store.as_ref(), &book, &episode, &title)?;

        let download = EpisodeDownload {
            work: work.clone(),
            episode: episode.clone(),
            segment,
            auth_token: token,
            max_pages: ctx.config.downloader.max_pages,
        };
        let report = ctx.downloader(cancel).download(&download).await?;

        Ok(WatchOutcome::Downloaded { episode, report })
    }

    /// Metadata of the known episode, the source of the starting token and
    /// segment. Transport errors are reported and retried.
    async fn known_metadata(
        &self,
        work: &WorkId,
        known: &EpisodeId,
        cancel: &CancellationToken,
    ) -> Result<Wait<EpisodeMetadata>> {
        for attempt in 1..=self.policy.max_attempts {
            let failure = match self.ctx.probe.episode_metadata(work, known).await {
                Ok(metadata) => return Ok(Wait::Ready(metadata)),
                Err(e @ BookwatchError::Identifier(_)) => return Err(e),
                Err(e) => format!("Reading episode {} failed: {}", known, e),
            };

            warn!(work = %work, attempt, "{}", failure);
            self.ctx.notifier.notify_error("Watch", &failure).await;
            if !suspend(cancel, self.policy.error_backoff).await {
                return Ok(Wait::Cancelled);
            }
        }

        Ok(Wait::GaveUp)
    }

    fn segment_for(target: &WatchTarget, book: &Book, previous: &EpisodeMetadata) -> Result<String> {
        if let Some(segment) = &target.segment {
            return Ok(segment.clone());
        }
        match previous.server_segment() {
            Ok(segment) => Ok(segment),
            Err(e) => book.server_segment.clone().ok_or_else(|| e.into()),
        }
    }

    /// Poll page 1 at full resolution until it is served.
    async fn await_full_resolution(
        &self,
        work: &WorkId,
        known: &EpisodeId,
        episode: &EpisodeId,
        segment: &str,
        token: &mut String,
        cancel: &CancellationToken,
    ) -> Wait<()> {
        let images = self.ctx.images();
        let retry = self.ctx.config.scanner.full_version_retry();

        for attempt in 1..=self.policy.max_attempts {
            let url = images.page_url(work, episode, segment, Resolution::Full, 1, token);
            match self.ctx.probe.url_status(&url).await {
                Ok(UrlStatus::Available) => {
                    info!(episode = %episode, attempt, "Full resolution available");
                    return Wait::Ready(());
                }
                Ok(UrlStatus::Forbidden) => {
                    match self.ctx.probe.episode_metadata(work, known).await {
                        Ok(EpisodeMetadata {
                            auth_token: Some(fresh),
                            ..
                        }) => *token = fresh,
                        Ok(_) => {
                            self.report(format!("No access token returned for {}", known))
                                .await
                        }
                        Err(e) => {
                            self.report(format!("Token refresh from {} failed: {}", known, e))
                                .await
                        }
                    }
                }
                Ok(status) => {
                    debug!(episode = %episode, attempt, ?status, "Full resolution not yet published")
                }
                Err(e) => {
                    self.report(format!(
                        "Full resolution check of {} failed: {}",
                        episode, e
                    ))
                    .await
                }
            }

            if !suspend(cancel, retry).await {
                return Wait::Cancelled;
            }
        }

        Wait::GaveUp
    }

    async fn report(&self, failure: String) {
        warn!("{}", failure);
        self.ctx.notifier.notify_error("Watch", &failure).await;
    }

    fn record<S: Store>(store: &S, book: &Book, episode: &EpisodeId, previous_title: &str) -> Result<()> {
        let mut entry = Episode::new(book.id, episode);
        entry.name = Some(format!("The episode following: {}", previous_title));
        entry.is_downloaded = true;

        if !store.add_episode(&entry)? {
            store.set_downloaded(episode.as_str(), true)?;
        }
        Ok(())
    }
}

/// Cancel `cancel` on SIGTERM or SIGINT (Ctrl-C elsewhere).
pub fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to set up signal handlers: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::downloader::DownloadStop;
    use crate::testing::{page_number, published, Notice, RecordingNotifier, StubProbe};

    fn work() -> WorkId {
        WorkId::parse("12345").unwrap()
    }

    fn episode(n: u32) -> EpisodeId {
        EpisodeId::first(&work()).with_sequence(n).unwrap()
    }

    fn context(
        probe: StubProbe,
        notifier: &Arc<RecordingNotifier>,
        dir: &std::path::Path,
    ) -> Arc<AppContext> {
        let mut config = Config::default();
        config.service.image_base_url = "https://img.example.com/".into();
        config.downloader.download_dir = dir.to_path_buf();
        let ctx = AppContext::in_memory(config, Arc::new(probe), notifier.clone()).unwrap();

        let mut book = Book::new("12345".into());
        book.name = Some("Series".into());
        let book_id = ctx.store.add_book(&book).unwrap();
        ctx.store
            .add_episode(&Episode::new(book_id, &episode(5)))
            .unwrap();
        Arc::new(ctx)
    }

    fn serving_episode_six() -> StubProbe {
        serve_episode_six(StubProbe::published_through(5))
    }

    fn serve_episode_six(probe: StubProbe) -> StubProbe {
        probe
            .with_status(|url, call| {
                Ok(if url.contains("_001//") || call >= 2 {
                    UrlStatus::Available
                } else {
                    UrlStatus::NotFound
                })
            })
            .with_pages(|url| {
                if page_number(url) <= 3 {
                    Ok(b"jpeg".to_vec())
                } else {
                    Err(BookwatchError::UnexpectedStatus {
                        status: 404,
                        url: url.to_string(),
                    })
                }
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_downloads_next_episode() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = context(serving_episode_six(), &notifier, tmp.path());

        let outcome = Watcher::new(ctx.clone())
            .watch(&WatchTarget::new(work()), CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            WatchOutcome::Downloaded { episode: found, report } => {
                assert_eq!(found, episode(6));
                assert_eq!(report.stop, DownloadStop::EndOfContent);
                assert_eq!(report.pages_written, 3);
                assert!(report.directory.join("003.jpg").exists());
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let stored = ctx.store.get_episode(episode(6).as_str()).unwrap().unwrap();
        assert!(stored.is_downloaded);
        assert_eq!(
            stored.name.as_deref(),
            Some("The episode following: Series 5")
        );

        let notices = notifier.notices();
        assert!(notices.contains(&Notice::Found {
            work: "12345".into(),
            episode: episode(6).to_string(),
        }));
        assert!(notifier
            .messages()
            .contains(&"The episode following: Series 5".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_retries_failed_read_of_known_episode() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let probe = serve_episode_six(StubProbe::new().with_metadata(|work, ep, call| {
            if call == 0 {
                Err(BookwatchError::UnexpectedStatus {
                    status: 502,
                    url: "https://api.example.com/episode".into(),
                })
            } else if ep.sequence() <= 5 {
                Ok(published(work, ep, "token=fresh"))
            } else {
                Ok(crate::testing::unpublished(work, ep))
            }
        }));
        let ctx = context(probe, &notifier, tmp.path());
        let target = WatchTarget {
            after: Some(episode(5)),
            ..WatchTarget::new(work())
        };

        let started = tokio::time::Instant::now();
        let outcome = Watcher::new(ctx)
            .watch(&target, CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, WatchOutcome::Downloaded { .. }));
        assert!(started.elapsed() >= std::time::Duration::from_secs(10));
        assert_eq!(notifier.errors("Watch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_token_refresh_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let probe = StubProbe::new()
            .with_metadata(|work, ep, call| {
                if call == 0 {
                    Ok(published(work, ep, "token=fresh"))
                } else {
                    Err(BookwatchError::Timeout("https://api.example.com/episode".into()))
                }
            })
            .with_status(|url, call| {
                Ok(if !url.contains("_001//") || call >= 2 {
                    UrlStatus::Available
                } else {
                    UrlStatus::Forbidden
                })
            })
            .with_pages(|url| {
                if page_number(url) == 1 {
                    Ok(b"jpeg".to_vec())
                } else {
                    Err(BookwatchError::UnexpectedStatus {
                        status: 404,
                        url: url.to_string(),
                    })
                }
            });
        let ctx = context(probe, &notifier, tmp.path());
        let target = WatchTarget {
            after: Some(episode(5)),
            ..WatchTarget::new(work())
        };

        let outcome = Watcher::new(ctx)
            .watch(&target, CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, WatchOutcome::Downloaded { .. }));
        assert_eq!(notifier.errors("Watch"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_cancelled_while_polling() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = context(StubProbe::published_through(5), &notifier, tmp.path());
        let cancel = CancellationToken::new();

        let watcher = Watcher::new(ctx.clone());
        let target = WatchTarget {
            after: Some(episode(5)),
            ..WatchTarget::new(work())
        };
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { watcher.watch(&target, task_cancel).await });

        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        cancel.cancel();

        assert!(matches!(
            handle.await.unwrap().unwrap(),
            WatchOutcome::Cancelled
        ));
        assert!(ctx.store.get_episode(episode(6).as_str()).unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_all_reports_each_work() {
        let tmp = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = context(serving_episode_six(), &notifier, tmp.path());

        let unknown = WorkId::parse("777").unwrap();
        let results = Arc::new(Watcher::new(ctx))
            .watch_all(vec![WatchTarget::new(work()), WatchTarget::new(unknown.clone())])
            .await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Ok(WatchOutcome::Downloaded { .. })));
        assert_eq!(results[1].0, unknown);
        assert!(matches!(results[1].1, Err(BookwatchError::BookNotFound(_))));
    }

    #[test]
    fn test_segment_override_and_fallback() {
        let mut book = Book::new("12345".into());
        book.server_segment = Some("zzzzzz".into());
        let unpublished = crate::testing::unpublished(&work(), &episode(5));

        let target = WatchTarget::new(work());
        assert_eq!(
            Watcher::segment_for(&target, &book, &unpublished).unwrap(),
            "zzzzzz"
        );

        let target = WatchTarget {
            segment: Some("override".into()),
            ..WatchTarget::new(work())
        };
        assert_eq!(
            Watcher::segment_for(&target, &book, &unpublished).unwrap(),
            "override"
        );

        book.server_segment = None;
        let target = WatchTarget::new(work());
        assert!(Watcher::segment_for(&target, &book, &unpublished).is_err());
    }
}
