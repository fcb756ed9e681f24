use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::app::error::Result;
use crate::config::Config;
use crate::domain::ImageUrls;
use crate::downloader::PageDownloader;
use crate::locator::NewestEpisodeLocator;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::probe::{ContentProbe, HttpProbe};
use crate::scanner::{ScanPolicy, Scanner};
use crate::store::sqlite::SqliteStore;

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub probe: Arc<dyn ContentProbe>,
    pub notifier: Arc<dyn Notifier>,
    /// Process-wide cancellation; each watched work runs on a child token
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Arc::new(SqliteStore::new(&db_path)?);
        let probe: Arc<dyn ContentProbe> = Arc::new(HttpProbe::new(&config.service)?);
        let notifier = Self::notifier_for(&config);

        Ok(Self {
            config,
            store,
            probe,
            notifier,
            cancel: CancellationToken::new(),
        })
    }

    /// Context over an in-memory database with the given collaborators.
    pub fn in_memory(
        config: Config,
        probe: Arc<dyn ContentProbe>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            store: Arc::new(SqliteStore::in_memory()?),
            probe,
            notifier,
            cancel: CancellationToken::new(),
        })
    }

    fn notifier_for(config: &Config) -> Arc<dyn Notifier> {
        match WebhookNotifier::from_config(&config.notify) {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(LogNotifier),
        }
    }

    pub fn images(&self) -> ImageUrls {
        ImageUrls::new(self.config.service.image_base_url.clone())
    }

    pub fn scanner(&self, policy: ScanPolicy, cancel: CancellationToken) -> Scanner {
        Scanner::new(self.probe.clone(), self.notifier.clone(), policy, cancel)
    }

    pub fn downloader(&self, cancel: CancellationToken) -> PageDownloader {
        PageDownloader::new(
            self.probe.clone(),
            self.notifier.clone(),
            self.images(),
            &self.config.downloader,
            cancel,
        )
    }

    pub fn locator(&self, cancel: CancellationToken) -> NewestEpisodeLocator<SqliteStore> {
        NewestEpisodeLocator::new(
            self.store.clone(),
            self.probe.clone(),
            self.notifier.clone(),
            &self.config.scanner,
            cancel,
        )
    }
}
