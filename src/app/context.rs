use std::sync::Arc;

use reqwest::Client;

use crate::app::Result;
use crate::archiver::{Archiver, ArchiverHandle};
use crate::config::Config;
use crate::curator::Curator;
use crate::fetcher::{build_client, Fetcher, HttpFetcher};
use crate::language::LanguageDetector;
use crate::poller::Poller;
use crate::prefetch::Prefetcher;
use crate::store::{Pool, PooledStore};

/// Wires the components together from one [`Config`].
pub struct AppContext {
    pub config: Config,
    pub pool: Pool,
    pub client: Client,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub detector: Arc<LanguageDetector>,
}

impl AppContext {
    /// Creates the directory layout and opens the database.
    pub fn new(config: Config) -> Result<Self> {
        config.init()?;

        let pool = Pool::open(config.db_path(), config.pool_size)?;
        let client = build_client(&config.user_agent, config.http_timeout())?;
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(client.clone()));
        let detector = Arc::new(LanguageDetector::new(
            &config.languages,
            &config.default_language,
            config.quiet_titles.clone(),
        )?);

        Ok(Self {
            config,
            pool,
            client,
            fetcher,
            detector,
        })
    }

    pub async fn store(&self) -> Result<PooledStore> {
        self.pool.get().await
    }

    pub fn poller(&self) -> Poller {
        Poller::new(self.pool.clone(), self.fetcher.clone(), self.config.poll_interval())
    }

    pub fn prefetcher(&self) -> Prefetcher {
        Prefetcher::new(
            self.pool.clone(),
            self.client.clone(),
            self.config.cache_dir(),
            self.config.prefetch.settings(),
        )
    }

    pub fn archiver(&self) -> (Archiver, ArchiverHandle) {
        Archiver::new(
            self.client.clone(),
            self.config.archive_dir(),
            self.config.archive.workers,
            self.config.archive_idle(),
        )
    }

    pub async fn curator(&self) -> Result<Curator> {
        let db = self.store().await?;
        Curator::open(
            self.config.classifier_dir(),
            self.config.advisor_dir(),
            self.detector.clone(),
            &db,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_sets_up_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path())).unwrap();
        let ctx = AppContext::new(config).unwrap();

        assert!(dir.path().join("ticker.db").exists());
        assert!(dir.path().join("archive").is_dir());
        assert_eq!(ctx.store().await.unwrap().feed_get_all().unwrap().len(), 0);

        let curator = ctx.curator().await.unwrap();
        let item = crate::domain::Item::new(1, "https://example.com/", "Nothing learned yet");
        assert!(curator.rate(&item).is_none());
    }
}
