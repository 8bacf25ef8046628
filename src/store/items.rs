use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};

use crate::app::{Result, TickerError};
use crate::domain::Item;
use crate::store::query::Query;
use crate::store::sqlite::{expect_change, from_unix, to_unix, SqliteStore};
use crate::store::tags::tags_for_item;

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        link: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        timestamp: from_unix(row.get(5)?),
        read: row.get(6)?,
        rating: row.get(7)?,
        prefetch: row.get(8)?,
        tags: Vec::new(),
    })
}

/// Runs an item query and loads the tags of every resulting item.
pub(crate) fn load_items<P: Params>(conn: &Connection, q: Query, args: P) -> Result<Vec<Item>> {
    let mut stmt = q.prepare(conn)?;
    let mut items = stmt
        .query_map(args, item_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for item in items.iter_mut() {
        item.tags = tags_for_item(conn, item.id)?;
    }
    Ok(items)
}

fn load_item<P: Params>(conn: &Connection, q: Query, args: P) -> Result<Option<Item>> {
    let item = q.prepare(conn)?.query_row(args, item_from_row).optional()?;
    match item {
        Some(mut item) => {
            item.tags = tags_for_item(conn, item.id)?;
            Ok(Some(item))
        }
        None => Ok(None),
    }
}

fn check_rating(rating: f64) -> Result<()> {
    if (0.0..=1.0).contains(&rating) {
        Ok(())
    } else {
        Err(TickerError::InvalidValue(format!(
            "rating must be between 0 and 1, got {}",
            rating
        )))
    }
}

impl SqliteStore {
    /// Inserts an item and assigns its id. The full-text index picks the
    /// item up through a trigger.
    pub fn item_add(&mut self, item: &mut Item) -> Result<()> {
        if let Some(r) = item.rating {
            check_rating(r)?;
        }
        let id = self.write(|conn| {
            Query::ItemAdd.prepare(conn)?.execute(params![
                item.feed_id,
                item.link,
                item.title,
                item.description,
                to_unix(&item.timestamp),
                item.read,
                item.rating,
                item.prefetch,
            ])?;
            Ok(conn.last_insert_rowid())
        })?;
        item.id = id;
        Ok(())
    }

    /// The `limit` newest items.
    pub fn item_get_recent(&self, limit: usize) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetRecent, [limit as i64]))
    }

    pub fn item_get_rated(&self) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetRated, []))
    }

    pub fn item_get_by_id(&self, id: i64) -> Result<Option<Item>> {
        self.read(|conn| load_item(conn, Query::ItemGetById, [id]))
    }

    pub fn item_get_by_url(&self, link: &str) -> Result<Option<Item>> {
        self.read(|conn| load_item(conn, Query::ItemGetByUrl, [link]))
    }

    pub fn item_get_by_feed(&self, feed_id: i64, limit: usize) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetByFeed, params![feed_id, limit as i64]))
    }

    pub fn item_get_all(&self, limit: usize, offset: usize) -> Result<Vec<Item>> {
        self.read(|conn| {
            load_items(
                conn,
                Query::ItemGetAll,
                params![limit as i64, offset as i64],
            )
        })
    }

    /// Full-text search; `query` uses FTS5 match syntax.
    pub fn item_get_fts(&self, query: &str) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetFts, [query]))
    }

    /// Full-text search restricted to items strictly between `begin` and
    /// `end` that carry every tag in `tag_ids`.
    pub fn item_get_search_extended(
        &self,
        query: &str,
        tag_ids: &[i64],
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Item>> {
        let begin = begin.map_or(i64::MIN, |b| to_unix(&b));
        let end = end.map_or(i64::MAX, |e| to_unix(&e));
        let items = self.read(|conn| {
            load_items(
                conn,
                Query::ItemGetSearchExtended,
                params![query, begin, end],
            )
        })?;
        Ok(items
            .into_iter()
            .filter(|item| tag_ids.iter().all(|t| item.has_tag(*t)))
            .collect())
    }

    pub fn item_get_by_tag(&self, tag_id: i64) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetByTag, [tag_id]))
    }

    /// Items linked to the tag or to any of its descendants.
    pub fn item_get_by_tag_recursive(&self, tag_id: i64) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetByTagRecursive, [tag_id]))
    }

    pub fn item_get_content(&self, id: i64) -> Result<Option<String>> {
        self.read(|conn| {
            Ok(Query::ItemGetContent
                .prepare(conn)?
                .query_row([id], |row| row.get(0))
                .optional()?)
        })
    }

    /// Oldest items that have not been prefetched yet.
    pub fn item_get_prefetch(&self, limit: usize) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetPrefetch, [limit as i64]))
    }

    pub fn item_get_total_count(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(Query::ItemGetTotalCount
                .prepare(conn)?
                .query_row([], |row| row.get(0))?)
        })
    }

    /// Items carrying at least one tag, with their tags loaded.
    pub fn item_get_tagged(&self) -> Result<Vec<Item>> {
        self.read(|conn| load_items(conn, Query::ItemGetTagged, []))
    }

    pub fn item_rating_set(&mut self, id: i64, rating: f64) -> Result<()> {
        check_rating(rating)?;
        self.write(|conn| {
            let n = Query::ItemRatingSet.prepare(conn)?.execute(params![id, rating])?;
            expect_change(n, || format!("item {}", id))
        })
    }

    pub fn item_rating_clear(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::ItemRatingClear.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("item {}", id))
        })
    }

    /// Replaces the item's description with its sanitized version and marks
    /// it as prefetched.
    pub fn item_prefetch_set(&mut self, id: i64, description: &str) -> Result<()> {
        self.write(|conn| {
            let n = Query::ItemPrefetchSet
                .prepare(conn)?
                .execute(params![id, description])?;
            expect_change(n, || format!("item {}", id))
        })
    }

    /// True if an item with the same link, or with the same title in the
    /// same feed, is already stored.
    pub fn item_has_duplicate(&self, item: &Item) -> Result<bool> {
        self.read(|conn| {
            let cnt: i64 = Query::ItemHasDuplicate.prepare(conn)?.query_row(
                params![item.link, item.feed_id, item.title],
                |row| row.get(0),
            )?;
            Ok(cnt > 0)
        })
    }

    pub fn item_mark_read(&mut self, id: i64) -> Result<()> {
        self.item_set_read(id, true)
    }

    pub fn item_mark_unread(&mut self, id: i64) -> Result<()> {
        self.item_set_read(id, false)
    }

    fn item_set_read(&mut self, id: i64, read: bool) -> Result<()> {
        self.write(|conn| {
            let n = Query::ItemMarkRead.prepare(conn)?.execute(params![id, read])?;
            expect_change(n, || format!("item {}", id))
        })
    }
}
