//! Backlog catch-up for a tracked work.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app::{BookwatchError, Result};
use crate::config::ScannerConfig;
use crate::domain::{Book, Episode, EpisodeId, EpisodeMetadata, WorkId};
use crate::notify::Notifier;
use crate::probe::ContentProbe;
use crate::scanner::{ScanCursor, ScanEnd, ScanPolicy, Scanner};
use crate::store::Store;

/// Walks forward from the last stored episode of a work, storing every
/// published episode it passes, and returns the newest one.
pub struct NewestEpisodeLocator<S: Store> {
    store: Arc<S>,
    probe: Arc<dyn ContentProbe>,
    notifier: Arc<dyn Notifier>,
    policy: ScanPolicy,
    cancel: CancellationToken,
}

impl<S: Store + Send + Sync> NewestEpisodeLocator<S> {
    pub fn new(
        store: Arc<S>,
        probe: Arc<dyn ContentProbe>,
        notifier: Arc<dyn Notifier>,
        config: &ScannerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            probe,
            notifier,
            policy: ScanPolicy::backlog(config),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Catch up the backlog of `work`.
    ///
    /// Returns `None` when the work has no published episode at all.
    pub async fn locate(&self, work: &WorkId) -> Result<Option<EpisodeMetadata>> {
        let book = self
            .store
            .get_book_by_lookup(work.as_str())?
            .ok_or_else(|| BookwatchError::BookNotFound(work.to_string()))?;

        let seed = match self.store.get_latest_episode(work.as_str())? {
            Some(latest) => EpisodeId::parse(&latest.lookup_value)?,
            None => EpisodeId::first(work),
        };
        info!(work = %work, book = book.display_name(), from = %seed, "Catching up backlog");

        let scanner = Scanner::new(
            self.probe.clone(),
            self.notifier.clone(),
            self.policy.clone(),
            self.cancel.clone(),
        );

        let mut inserted = 0u32;
        let end = scanner
            .run(ScanCursor::starting_at(work.clone(), seed), |metadata| {
                if self.record(&book, metadata)? {
                    inserted += 1;
                }
                Ok(())
            })
            .await?;

        info!(work = %work, inserted, state = ?end.state(), "Backlog caught up");

        Ok(match end {
            ScanEnd::Found { metadata, .. } => metadata,
            ScanEnd::Exhausted { last_hit, .. } => {
                if let Some(ref hit) = last_hit {
                    warn!(
                        work = %work,
                        episode = %hit.episode,
                        "Attempt budget ran out while episodes were still being found"
                    );
                }
                last_hit.and_then(|hit| hit.metadata)
            }
            ScanEnd::Cancelled { .. } => None,
        })
    }

    /// Store a discovered episode unless it is already known.
    fn record(&self, book: &Book, metadata: &EpisodeMetadata) -> Result<bool> {
        if self
            .store
            .get_episode(metadata.episode_id.as_str())?
            .is_some()
        {
            return Ok(false);
        }

        let mut episode = Episode::new(book.id, &metadata.episode_id);
        episode.name = metadata.title.clone();
        let inserted = self.store.add_episode(&episode)?;
        if inserted {
            info!(
                episode = %metadata.episode_id,
                title = metadata.display_title(),
                "Stored episode"
            );
        }
        Ok(inserted)
    }
}
