use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use html_escape::decode_html_entities;
use tracing::debug;

use crate::app::{Result, TickerError};
use crate::domain::Item;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub homepage: Option<String>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, feed_id: i64, body: &[u8]) -> Result<(FeedMeta, Vec<Item>)> {
        self.normalize_at(feed_id, body, Utc::now())
    }

    /// Parses an RSS or Atom document into items for `feed_id`.
    ///
    /// Entries without a link are skipped. A publication time that is missing,
    /// zero or later than `now` is replaced by `now`.
    pub fn normalize_at(
        &self,
        feed_id: i64,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(FeedMeta, Vec<Item>)> {
        let feed = parser::parse(body).map_err(|e| TickerError::FeedParse(e.to_string()))?;

        let meta = FeedMeta {
            title: feed.title.map(|t| decode_html_entities(&t.content).to_string()),
            homepage: feed
                .links
                .iter()
                .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
                .map(|l| l.href.clone()),
        };

        let items = feed
            .entries
            .into_iter()
            .filter_map(|entry| entry_to_item(feed_id, entry, now))
            .collect();

        Ok((meta, items))
    }
}

fn entry_to_item(feed_id: i64, entry: Entry, now: DateTime<Utc>) -> Option<Item> {
    let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
        debug!("Skipping entry {:?} without a link", entry.id);
        return None;
    };

    let title = entry
        .title
        .map(|t| decode_html_entities(&t.content).trim().to_string())
        .unwrap_or_default();
    let mut item = Item::new(feed_id, link, title);

    let content = entry
        .content
        .and_then(|c| c.body)
        .filter(|b| !b.trim().is_empty());
    item.description = match content {
        Some(body) => body,
        None => entry.summary.map(|s| s.content).unwrap_or_default(),
    };

    item.timestamp = match entry.published.or(entry.updated) {
        Some(stamp) if stamp.timestamp() > 0 && stamp <= now => stamp,
        _ => now,
    };

    Some(item)
}
