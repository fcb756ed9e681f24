//! Polling state machine.
//!
//! A scan walks the identifiers of one work, one probe at a time, until a
//! [`ScanPolicy`] decides it is over. The decision logic lives in the pure
//! [`ScanPolicy::transition`]; [`Scanner`] performs the probes, sleeps,
//! token refreshes and notifications it asks for.

mod policy;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::{BookwatchError, Result};
use crate::domain::{EpisodeMetadata, ImageUrls, Resolution};
use crate::notify::Notifier;
use crate::probe::{ContentProbe, UrlStatus};

pub use policy::{
    Hit, MissRule, ProbeOutcome, ScanCursor, ScanEnd, ScanPolicy, ScanState, Step, StopRule,
    Transition,
};

/// What a scan probes for each identifier.
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    /// The metadata endpoint; published when a storage key is returned.
    Metadata,
    /// The first preview page of the episode, authorized by the cursor's token.
    PreviewImage { images: ImageUrls, segment: String },
}

pub struct Scanner {
    probe: Arc<dyn ContentProbe>,
    notifier: Arc<dyn Notifier>,
    policy: ScanPolicy,
    target: ProbeTarget,
    cancel: CancellationToken,
}

impl Scanner {
    pub fn new(
        probe: Arc<dyn ContentProbe>,
        notifier: Arc<dyn Notifier>,
        policy: ScanPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            probe,
            notifier,
            policy,
            target: ProbeTarget::Metadata,
            cancel,
        }
    }

    pub fn with_target(mut self, target: ProbeTarget) -> Self {
        self.target = target;
        self
    }

    /// Run the scan to its end.
    ///
    /// `on_discovered` is called with the metadata of every hit that does
    /// not end the scan, in identifier order.
    pub async fn run<F>(&self, mut cursor: ScanCursor, mut on_discovered: F) -> Result<ScanEnd>
    where
        F: FnMut(&EpisodeMetadata) -> Result<()> + Send,
    {
        info!(
            work = %cursor.work_id,
            episode = %cursor.current,
            max_attempts = self.policy.max_attempts,
            "Scan started"
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(cursor));
            }

            let outcome = self.probe_current(&cursor).await?;
            self.log_outcome(&cursor, &outcome);

            let transition = self.policy.transition(cursor, outcome)?;
            cursor = transition.cursor;

            if let Some(Hit {
                metadata: Some(ref metadata),
                ..
            }) = transition.discovered
            {
                on_discovered(metadata)?;
            }

            match transition.step {
                Step::Wait(delay) => {
                    if !suspend(&self.cancel, delay).await {
                        return Ok(self.cancelled(cursor));
                    }
                }
                Step::RefreshToken => {
                    if !self.refresh_token(&mut cursor).await? {
                        return Ok(self.cancelled(cursor));
                    }
                }
                Step::Backoff { delay, reason } => {
                    warn!(work = %cursor.work_id, episode = %cursor.current, "{}", reason);
                    self.notifier.notify_error("Scan", &reason).await;
                    if !suspend(&self.cancel, delay).await {
                        return Ok(self.cancelled(cursor));
                    }
                }
                Step::Finish(end) => {
                    self.report(&cursor, &end).await;
                    return Ok(end);
                }
            }
        }
    }

    async fn probe_current(&self, cursor: &ScanCursor) -> Result<ProbeOutcome> {
        match &self.target {
            ProbeTarget::Metadata => {
                match self
                    .probe
                    .episode_metadata(&cursor.work_id, &cursor.current)
                    .await
                {
                    Ok(metadata) if metadata.is_published() => {
                        Ok(ProbeOutcome::Available(Some(metadata)))
                    }
                    Ok(_) => Ok(ProbeOutcome::Missing),
                    Err(e) => classify(e),
                }
            }
            ProbeTarget::PreviewImage { images, segment } => {
                let Some(token) = cursor.auth_token.as_deref() else {
                    return Ok(ProbeOutcome::Forbidden);
                };
                let url = images.page_url(
                    &cursor.work_id,
                    &cursor.current,
                    segment,
                    Resolution::Preview,
                    1,
                    token,
                );
                match self.probe.url_status(&url).await {
                    Ok(UrlStatus::Available) => Ok(ProbeOutcome::Available(None)),
                    Ok(UrlStatus::NotFound) => Ok(ProbeOutcome::Missing),
                    Ok(UrlStatus::Forbidden) => Ok(ProbeOutcome::Forbidden),
                    Ok(UrlStatus::Other(status)) => Ok(ProbeOutcome::Unexpected(format!(
                        "Unexpected status {} from {}",
                        status, url
                    ))),
                    Err(e) => classify(e),
                }
            }
        }
    }

    /// Harvest a fresh token from the last known-good identifier.
    ///
    /// Returns false if cancelled while backing off after a failed refresh.
    async fn refresh_token(&self, cursor: &mut ScanCursor) -> Result<bool> {
        info!(
            work = %cursor.work_id,
            episode = %cursor.previous,
            "Access token rejected, refreshing"
        );

        let failure = match self
            .probe
            .episode_metadata(&cursor.work_id, &cursor.previous)
            .await
        {
            Ok(metadata) if metadata.auth_token.is_some() => {
                cursor.auth_token = metadata.auth_token;
                return Ok(true);
            }
            Ok(_) => format!("No access token returned for {}", cursor.previous),
            Err(e @ BookwatchError::Identifier(_)) => return Err(e),
            Err(e) => format!("Token refresh from {} failed: {}", cursor.previous, e),
        };

        warn!(work = %cursor.work_id, "{}", failure);
        self.notifier.notify_error("Scan", &failure).await;
        Ok(suspend(&self.cancel, self.policy.error_backoff).await)
    }

    fn log_outcome(&self, cursor: &ScanCursor, outcome: &ProbeOutcome) {
        let attempt = cursor.attempt + 1;
        match outcome {
            ProbeOutcome::Available(_) => {
                info!(work = %cursor.work_id, episode = %cursor.current, attempt, "Found")
            }
            ProbeOutcome::Missing if self.policy.log_misses => {
                info!(work = %cursor.work_id, episode = %cursor.current, attempt, "Not found")
            }
            ProbeOutcome::Missing => {
                debug!(work = %cursor.work_id, episode = %cursor.current, attempt, "Not found")
            }
            ProbeOutcome::Forbidden | ProbeOutcome::Unexpected(_) => {}
        }
    }

    async fn report(&self, cursor: &ScanCursor, end: &ScanEnd) {
        match end {
            ScanEnd::Found { episode, .. } if self.policy.stop == StopRule::FirstHit => {
                self.notifier.notify_found(&cursor.work_id, episode).await;
            }
            ScanEnd::Found {
                episode, attempts, ..
            } => {
                self.notifier
                    .post(&format!(
                        "Newest episode of book {} is {} ({} attempts)",
                        cursor.work_id, episode, attempts
                    ))
                    .await;
            }
            ScanEnd::Exhausted { attempts, .. } => {
                self.notifier
                    .post(&format!(
                        "Gave up on book {} after {} attempts, last tried {}",
                        cursor.work_id, attempts, cursor.current
                    ))
                    .await;
            }
            ScanEnd::Cancelled { .. } => {}
        }
    }

    fn cancelled(&self, cursor: ScanCursor) -> ScanEnd {
        info!(work = %cursor.work_id, attempts = cursor.attempt, "Scan cancelled");
        ScanEnd::Cancelled {
            attempts: cursor.attempt,
            last_hit: cursor.last_hit,
        }
    }
}

fn classify(err: BookwatchError) -> Result<ProbeOutcome> {
    match err {
        BookwatchError::Forbidden(_) => Ok(ProbeOutcome::Forbidden),
        BookwatchError::Identifier(_) => Err(err),
        other => Ok(ProbeOutcome::Unexpected(other.to_string())),
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
pub(crate) async fn suspend(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::domain::{EpisodeId, WorkId};
    use crate::testing::{published, Notice, RecordingNotifier, StubProbe, SEGMENT};

    fn work() -> WorkId {
        WorkId::parse("12345").unwrap()
    }

    fn scanner(
        probe: &Arc<StubProbe>,
        notifier: &Arc<RecordingNotifier>,
        policy: ScanPolicy,
    ) -> Scanner {
        Scanner::new(
            probe.clone(),
            notifier.clone(),
            policy,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_exactly_max_attempts() {
        let probe = Arc::new(StubProbe::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let policy = ScanPolicy::first_episode(&ScannerConfig::default()).with_max_attempts(7);

        let end = scanner(&probe, &notifier, policy)
            .run(
                ScanCursor::starting_at(work(), EpisodeId::first(&work())),
                |_| Ok(()),
            )
            .await
            .unwrap();

        assert_eq!(
            end,
            ScanEnd::Exhausted {
                attempts: 7,
                last_hit: None
            }
        );
        let calls = probe.metadata_calls();
        assert_eq!(calls.len(), 7);
        assert_eq!(calls[6].sequence(), 7);
        assert_eq!(notifier.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_mode_reports_last_hit() {
        let probe = Arc::new(StubProbe::published_through(4));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut discovered = Vec::new();

        let end = scanner(&probe, &notifier, ScanPolicy::backlog(&ScannerConfig::default()))
            .run(
                ScanCursor::starting_at(work(), EpisodeId::first(&work())),
                |metadata| {
                    discovered.push(metadata.episode_id.sequence());
                    Ok(())
                },
            )
            .await
            .unwrap();

        match end {
            ScanEnd::Found {
                episode,
                metadata,
                attempts,
            } => {
                assert_eq!(episode.sequence(), 4);
                assert_eq!(metadata.unwrap().title.as_deref(), Some("Series 4"));
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected end {:?}", other),
        }
        assert_eq!(discovered, vec![1, 2, 3, 4]);
        assert_eq!(probe.metadata_calls().len(), 5);
        assert!(notifier.messages()[0].contains("Newest episode"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_episode_waits_on_same_identifier() {
        let probe = Arc::new(StubProbe::new().with_status(|_, call| {
            Ok(if call < 3 {
                UrlStatus::NotFound
            } else {
                UrlStatus::Available
            })
        }));
        let notifier = Arc::new(RecordingNotifier::default());
        let known = EpisodeId::first(&work()).with_sequence(5).unwrap();
        let cursor = ScanCursor::following(work(), known)
            .unwrap()
            .with_token(Some("token=abc".into()));

        let end = scanner(&probe, &notifier, ScanPolicy::next_episode(&ScannerConfig::default()))
            .with_target(ProbeTarget::PreviewImage {
                images: ImageUrls::new("https://img.example.com/"),
                segment: SEGMENT.into(),
            })
            .run(cursor, |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(end.state(), ScanState::Found);
        assert_eq!(end.attempts(), 4);
        let urls = probe.status_calls();
        assert_eq!(urls.len(), 4);
        assert!(urls.iter().all(|u| u == &urls[0]));
        assert!(urls[0].contains("006006"));
        assert!(urls[0].ends_with("_000//1.jpg?token=abc"));
        assert!(matches!(notifier.notices()[0], Notice::Found { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forbidden_refreshes_from_previous_once() {
        let probe = Arc::new(
            StubProbe::new()
                .with_status(|_, call| {
                    Ok(if call == 0 {
                        UrlStatus::Forbidden
                    } else {
                        UrlStatus::Available
                    })
                })
                .with_metadata(|work, episode, _| Ok(published(work, episode, "token=fresh"))),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let known = EpisodeId::first(&work()).with_sequence(5).unwrap();
        let cursor = ScanCursor::following(work(), known.clone())
            .unwrap()
            .with_token(Some("token=stale".into()));

        let end = scanner(&probe, &notifier, ScanPolicy::next_episode(&ScannerConfig::default()))
            .with_target(ProbeTarget::PreviewImage {
                images: ImageUrls::new("https://img.example.com/"),
                segment: SEGMENT.into(),
            })
            .run(cursor, |_| Ok(()))
            .await
            .unwrap();

        assert_eq!(probe.metadata_calls(), vec![known]);
        let urls = probe.status_calls();
        assert_eq!(urls.len(), 2);
        assert!(urls[0].ends_with("token=stale"));
        assert!(urls[1].ends_with("token=fresh"));
        match end {
            ScanEnd::Found {
                episode, attempts, ..
            } => {
                assert_eq!(episode.sequence(), 6);
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected end {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_reported_and_retried() {
        let probe = Arc::new(StubProbe::new().with_metadata(|work, episode, call| {
            if call == 0 {
                Err(BookwatchError::UnexpectedStatus {
                    status: 502,
                    url: "https://api.example.com".into(),
                })
            } else {
                Ok(published(work, episode, "token=a"))
            }
        }));
        let notifier = Arc::new(RecordingNotifier::default());

        let started = tokio::time::Instant::now();
        let end = scanner(
            &probe,
            &notifier,
            ScanPolicy::first_episode(&ScannerConfig::default()),
        )
        .run(
            ScanCursor::starting_at(work(), EpisodeId::first(&work())),
            |_| Ok(()),
        )
        .await
        .unwrap();

        assert!(started.elapsed() >= Duration::from_secs(10));
        assert_eq!(notifier.errors("Scan"), 1);
        let calls = probe.metadata_calls();
        assert_eq!(calls[0], calls[1]);
        assert_eq!(end.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_ends_scan_with_error() {
        let probe = Arc::new(StubProbe::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let last = EpisodeId::first(&work()).with_sequence(999).unwrap();

        let err = scanner(
            &probe,
            &notifier,
            ScanPolicy::first_episode(&ScannerConfig::default()),
        )
        .run(ScanCursor::starting_at(work(), last), |_| Ok(()))
        .await
        .unwrap_err();

        assert!(matches!(err, BookwatchError::Identifier(_)));
        assert_eq!(probe.metadata_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_interval() {
        let probe = Arc::new(StubProbe::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let cancel = CancellationToken::new();
        let policy = ScanPolicy::next_episode(&ScannerConfig::default());

        let scanner = Scanner::new(probe.clone(), notifier.clone(), policy, cancel.clone());
        let handle = tokio::spawn(async move {
            scanner
                .run(
                    ScanCursor::starting_at(work(), EpisodeId::first(&work())),
                    |_| Ok(()),
                )
                .await
        });

        tokio::time::sleep(Duration::from_secs(25 * 60)).await;
        cancel.cancel();
        let end = handle.await.unwrap().unwrap();

        assert_eq!(end.state(), ScanState::Cancelled);
        assert_eq!(end.attempts(), 3);
        assert!(notifier.notices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend() {
        let cancel = CancellationToken::new();
        assert!(suspend(&cancel, Duration::from_secs(60)).await);
        cancel.cancel();
        assert!(!suspend(&cancel, Duration::from_secs(60)).await);
        assert!(!suspend(&cancel, Duration::ZERO).await);
    }
}
