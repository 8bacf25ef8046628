//! Background loop that refreshes due feeds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::app::Result;
use crate::domain::{Feed, Item};
use crate::fetcher::Fetcher;
use crate::source::FeedSource;
use crate::store::{Pool, SqliteStore};

pub const DEFAULT_TICK: Duration = Duration::from_secs(5);
pub const LOOP_FINISHED: &str = "loop finished";

pub struct Poller {
    pool: Pool,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    tick: Duration,
    active: Arc<AtomicBool>,
    sources: HashMap<i64, FeedSource>,
    messages: Option<mpsc::Sender<String>>,
}

impl Poller {
    pub fn new(pool: Pool, fetcher: Arc<dyn Fetcher + Send + Sync>, tick: Duration) -> Self {
        Self {
            pool,
            fetcher,
            tick,
            active: Arc::new(AtomicBool::new(false)),
            sources: HashMap::new(),
            messages: None,
        }
    }

    /// Progress messages are sent here. Messages are dropped when the
    /// channel is full.
    pub fn with_messages(mut self, tx: mpsc::Sender<String>) -> Self {
        self.messages = Some(tx);
        self
    }

    /// The flag the loop checks on every tick. Clearing it stops the loop.
    pub fn active_flag(&self) -> Arc<AtomicBool> {
        self.active.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn report(&self, msg: String) {
        if let Some(tx) = &self.messages {
            if tx.try_send(msg).is_err() {
                debug!("Dropped progress message");
            }
        }
    }

    /// Runs until a value arrives on `stop`, the stop channel is closed or
    /// the active flag is cleared. `observer` is told when the loop is done.
    pub async fn run(mut self, mut stop: mpsc::Receiver<()>, observer: Option<mpsc::Sender<String>>) {
        self.active.store(true, Ordering::SeqCst);
        info!("Poller started, checking feeds every {:?}", self.tick);

        let mut timer = interval(self.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    debug!("Poller received stop signal");
                    break;
                }
                _ = timer.tick() => {
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = self.refresh(Utc::now()).await {
                        error!("Error refreshing feeds: {}", e);
                    }
                }
            }
        }

        self.active.store(false, Ordering::SeqCst);
        info!("Poller {}", LOOP_FINISHED);
        if let Some(observer) = observer {
            let _ = observer.send(LOOP_FINISHED.to_string()).await;
        }
    }

    /// Refreshes every feed that is due at `now` and returns the number of
    /// new items. Errors of individual feeds are logged and do not stop the
    /// remaining feeds from being processed.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let due = {
            let db = self.pool.get().await?;
            db.feed_get_due(now)?
        };
        if due.is_empty() {
            return Ok(0);
        }
        debug!("{} feeds are due", due.len());

        let mut total = 0;
        for feed in due {
            let title = feed.display_title().to_string();
            match self.refresh_feed(feed, now).await {
                Ok(cnt) => {
                    total += cnt;
                    if cnt > 0 {
                        info!("{} new items from {}", cnt, title);
                        self.report(format!("{}: {} new items", title, cnt));
                    }
                }
                Err(e) => {
                    warn!("Error refreshing {}: {}", title, e);
                    self.report(format!("{}: {}", title, e));
                }
            }
        }
        Ok(total)
    }

    async fn refresh_feed(&mut self, feed: Feed, now: DateTime<Utc>) -> Result<usize> {
        let feed_id = feed.id;
        let source = self
            .sources
            .entry(feed_id)
            .or_insert_with(|| FeedSource::new(feed.clone(), self.fetcher.clone()));
        source.set_feed(feed);
        let items = source.fetch().await?;

        let mut db = self.pool.get().await?;
        db.begin()?;
        match store_items(&mut db, items, feed_id, now) {
            Ok(added) => {
                db.commit()?;
                Ok(added)
            }
            Err(e) => {
                if db.in_transaction() {
                    db.rollback()?;
                }
                Err(e)
            }
        }
    }
}

/// Adds the items that are not yet known, in source order, and marks the
/// feed as refreshed.
pub(crate) fn store_items(
    db: &mut SqliteStore,
    items: Vec<Item>,
    feed_id: i64,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut added = 0;
    for mut item in items {
        if db.item_has_duplicate(&item)? {
            continue;
        }
        db.item_add(&mut item)?;
        added += 1;
    }
    db.feed_set_timestamp(feed_id, now)?;
    Ok(added)
}
