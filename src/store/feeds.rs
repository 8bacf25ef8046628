use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::app::{Result, TickerError};
use crate::domain::Feed;
use crate::store::query::Query;
use crate::store::sqlite::{expect_change, from_unix, to_unix, SqliteStore};

fn feed_from_row(row: &Row<'_>) -> rusqlite::Result<Feed> {
    let interval: i64 = row.get(4)?;
    Ok(Feed {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        homepage: row.get(3)?,
        interval: Duration::from_secs(interval.max(0) as u64),
        last_update: from_unix(row.get(5)?),
        active: row.get(6)?,
    })
}

fn interval_secs(interval: Duration) -> Result<i64> {
    let secs = interval.as_secs();
    if secs == 0 {
        return Err(TickerError::InvalidValue(format!(
            "refresh interval must be positive, got {:?}",
            interval
        )));
    }
    i64::try_from(secs).map_err(|_| TickerError::InvalidValue(format!("refresh interval {:?} is too large", interval)))
}

impl SqliteStore {
    /// Subscribes to a feed and assigns its id.
    pub fn feed_add(&mut self, feed: &mut Feed) -> Result<()> {
        let interval = interval_secs(feed.interval)?;
        let id = self.write(|conn| {
            Query::FeedAdd.prepare(conn)?.execute(params![
                feed.name,
                feed.url,
                feed.homepage,
                interval,
                to_unix(&feed.last_update),
                feed.active,
            ])?;
            Ok(conn.last_insert_rowid())
        })?;
        feed.id = id;
        Ok(())
    }

    pub fn feed_get_all(&self) -> Result<Vec<Feed>> {
        self.read(|conn| {
            let mut stmt = Query::FeedGetAll.prepare(conn)?;
            let feeds = stmt
                .query_map([], feed_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(feeds)
        })
    }

    pub fn feed_get_map(&self) -> Result<HashMap<i64, Feed>> {
        Ok(self
            .feed_get_all()?
            .into_iter()
            .map(|f| (f.id, f))
            .collect())
    }

    /// Active feeds whose next refresh is at or before `now`.
    pub fn feed_get_due(&self, now: DateTime<Utc>) -> Result<Vec<Feed>> {
        self.read(|conn| {
            let mut stmt = Query::FeedGetDue.prepare(conn)?;
            let feeds = stmt
                .query_map([to_unix(&now)], feed_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(feeds)
        })
    }

    pub fn feed_get_by_id(&self, id: i64) -> Result<Option<Feed>> {
        self.read(|conn| {
            Ok(Query::FeedGetById
                .prepare(conn)?
                .query_row([id], feed_from_row)
                .optional()?)
        })
    }

    pub fn feed_set_active(&mut self, id: i64, active: bool) -> Result<()> {
        self.write(|conn| {
            let n = Query::FeedSetActive.prepare(conn)?.execute(params![id, active])?;
            expect_change(n, || format!("feed {}", id))
        })
    }

    pub fn feed_set_timestamp(&mut self, id: i64, stamp: DateTime<Utc>) -> Result<()> {
        self.write(|conn| {
            let n = Query::FeedSetTimestamp
                .prepare(conn)?
                .execute(params![id, to_unix(&stamp)])?;
            expect_change(n, || format!("feed {}", id))
        })
    }

    /// Removes a feed along with all of its items.
    pub fn feed_delete(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::FeedDelete.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("feed {}", id))
        })
    }

    /// Stores the user-editable fields (name, url, homepage, interval) of `feed`.
    pub fn feed_modify(&mut self, feed: &Feed) -> Result<()> {
        let interval = interval_secs(feed.interval)?;
        self.write(|conn| {
            let n = Query::FeedModify.prepare(conn)?.execute(params![
                feed.id,
                feed.name,
                feed.url,
                feed.homepage,
                interval,
            ])?;
            expect_change(n, || format!("feed {}", feed.id))
        })
    }
}
