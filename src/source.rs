//! Fetching and parsing of a single subscribed feed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::app::{Result, TickerError};
use crate::domain::{Feed, Item};
use crate::fetcher::{FetchResult, Fetcher};
use crate::normalizer::{FeedMeta, Normalizer};

/// The last successfully parsed document together with the validators the
/// server sent for it.
#[derive(Debug, Clone)]
struct Cached {
    meta: FeedMeta,
    items: Vec<Item>,
    etag: Option<String>,
    last_modified: Option<String>,
}

pub struct FeedSource {
    feed: Feed,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    normalizer: Normalizer,
    cache: Option<Cached>,
}

impl FeedSource {
    pub fn new(feed: Feed, fetcher: Arc<dyn Fetcher + Send + Sync>) -> Self {
        Self {
            feed,
            fetcher,
            normalizer: Normalizer::new(),
            cache: None,
        }
    }

    pub fn feed(&self) -> &Feed {
        &self.feed
    }

    /// Replaces the feed record, keeping the cached document if the URL did
    /// not change.
    pub fn set_feed(&mut self, feed: Feed) {
        if feed.url != self.feed.url {
            self.cache = None;
        }
        self.feed = feed;
    }

    pub fn meta(&self) -> Option<&FeedMeta> {
        self.cache.as_ref().map(|c| &c.meta)
    }

    pub fn is_due(&self) -> bool {
        self.feed.is_due()
    }

    pub fn next(&self) -> DateTime<Utc> {
        self.feed.next()
    }

    /// Fetches the feed and returns its items.
    ///
    /// Once a document has been fetched, later calls send a conditional
    /// request; if the server reports no change the cached items are
    /// returned again.
    pub async fn fetch(&mut self) -> Result<Vec<Item>> {
        if !self.feed.active {
            return Err(TickerError::Inactive(self.feed.display_title().to_string()));
        }

        let (etag, last_modified) = match &self.cache {
            Some(c) => (c.etag.as_deref(), c.last_modified.as_deref()),
            None => (None, None),
        };

        let fetched = self
            .fetcher
            .fetch(&self.feed.url, etag, last_modified)
            .await?;
        match fetched {
            FetchResult::NotModified => {
                debug!("Feed {} unchanged", self.feed.display_title());
                Ok(self.cache.as_ref().map(|c| c.items.clone()).unwrap_or_default())
            }
            FetchResult::Content {
                body,
                etag,
                last_modified,
            } => {
                let (meta, items) = self.normalizer.normalize(self.feed.id, &body)?;
                debug!(
                    "Parsed {} items from {}",
                    items.len(),
                    self.feed.display_title()
                );
                self.cache = Some(Cached {
                    meta,
                    items: items.clone(),
                    etag,
                    last_modified,
                });
                Ok(items)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{build_client, HttpFetcher};
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Source Test</title><link>https://example.com/</link>
<item><title>First</title><link>https://example.com/1</link><description>one</description></item>
<item><title>Second</title><link>https://example.com/2</link><description>two</description></item>
</channel></rss>"#;

    fn fetcher() -> Arc<dyn Fetcher + Send + Sync> {
        Arc::new(HttpFetcher::new(
            build_client("ticker-test", Duration::from_secs(5)).unwrap(),
        ))
    }

    fn feed(url: String) -> Feed {
        let mut f = Feed::new("Source Test", url, Duration::from_secs(900));
        f.id = 3;
        f
    }

    #[tokio::test]
    async fn test_inactive_feed_is_refused() {
        let mut f = feed("http://127.0.0.1:9/feed.xml".to_string());
        f.active = false;
        let mut src = FeedSource::new(f, fetcher());
        assert!(matches!(src.fetch().await, Err(TickerError::Inactive(_))));
    }

    #[tokio::test]
    async fn test_fetch_and_conditional_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .and(header("If-None-Match", "\"abc\""))
            .respond_with(ResponseTemplate::new(304))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("ETag", "\"abc\"")
                    .insert_header("Content-Type", "application/rss+xml")
                    .set_body_string(RSS),
            )
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let mut src = FeedSource::new(feed(format!("{}/feed.xml", server.uri())), fetcher());
        let first = src.fetch().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].feed_id, 3);
        assert_eq!(first[1].description, "two");
        assert_eq!(src.meta().unwrap().title.as_deref(), Some("Source Test"));

        let second = src.fetch().await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn test_broken_feed_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let mut src = FeedSource::new(feed(format!("{}/feed.xml", server.uri())), fetcher());
        assert!(src.fetch().await.is_err());
    }
}
