//! Symbolic identifiers for every statement the store runs.
//!
//! Statements are prepared lazily through the connection's statement cache,
//! keyed by the SQL text returned from [`Query::sql`].

use rusqlite::{CachedStatement, Connection};

macro_rules! feed_cols {
    () => {
        "id, name, url, homepage, refresh_interval, refresh_timestamp, active"
    };
}

macro_rules! item_cols {
    () => {
        "i.id, i.feed_id, i.link, i.title, i.description, i.timestamp, i.read, i.rating, i.prefetch"
    };
}

macro_rules! tag_cols {
    () => {
        "t.id, t.name, t.description, t.parent, t.level, t.full_name"
    };
}

macro_rules! later_cols {
    () => {
        "id, item_id, note, timestamp, deadline, read"
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    FeedAdd,
    FeedGetAll,
    FeedGetDue,
    FeedGetById,
    FeedSetActive,
    FeedSetTimestamp,
    FeedDelete,
    FeedModify,
    ItemAdd,
    ItemGetRecent,
    ItemGetRated,
    ItemGetById,
    ItemGetByUrl,
    ItemGetByFeed,
    ItemGetAll,
    ItemGetFts,
    ItemGetSearchExtended,
    ItemGetByTag,
    ItemGetByTagRecursive,
    ItemGetContent,
    ItemGetPrefetch,
    ItemGetTotalCount,
    ItemGetTagged,
    ItemRatingSet,
    ItemRatingClear,
    ItemPrefetchSet,
    ItemHasDuplicate,
    ItemMarkRead,
    TagCreate,
    TagDelete,
    TagGetAll,
    TagGetById,
    TagGetByName,
    TagGetChildren,
    TagGetChildrenImmediate,
    TagGetRoots,
    TagGetByItem,
    TagNameUpdate,
    TagDescriptionUpdate,
    TagParentSet,
    TagParentClear,
    TagLinkAdd,
    TagLinkDelete,
    ReadLaterAdd,
    ReadLaterGetByItem,
    ReadLaterGetAll,
    ReadLaterGetUnread,
    ReadLaterMarkRead,
    ReadLaterDelete,
    ReadLaterSetDeadline,
    ReadLaterSetNote,
    ClusterCreate,
    ClusterDelete,
    ClusterLinkAdd,
    ClusterLinkDelete,
    ClusterGetById,
    ClusterGetByItem,
    ClusterGetItems,
    ClusterGetAll,
    FtsClear,
    FtsPopulate,
}

impl Query {
    /// Upper bound for the per-connection statement cache.
    pub const COUNT: usize = 64;

    pub fn sql(self) -> &'static str {
        match self {
            Query::FeedAdd => {
                "INSERT INTO feed (name, url, homepage, refresh_interval, refresh_timestamp, active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            }
            Query::FeedGetAll => concat!("SELECT ", feed_cols!(), " FROM feed ORDER BY name, id"),
            Query::FeedGetDue => concat!(
                "SELECT ",
                feed_cols!(),
                " FROM feed WHERE active = 1 AND refresh_timestamp + refresh_interval <= ?1 ORDER BY id"
            ),
            Query::FeedGetById => concat!("SELECT ", feed_cols!(), " FROM feed WHERE id = ?1"),
            Query::FeedSetActive => "UPDATE feed SET active = ?2 WHERE id = ?1",
            Query::FeedSetTimestamp => "UPDATE feed SET refresh_timestamp = ?2 WHERE id = ?1",
            Query::FeedDelete => "DELETE FROM feed WHERE id = ?1",
            Query::FeedModify => {
                "UPDATE feed SET name = ?2, url = ?3, homepage = ?4, refresh_interval = ?5 WHERE id = ?1"
            }
            Query::ItemAdd => {
                "INSERT INTO item (feed_id, link, title, description, timestamp, read, rating, prefetch)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            }
            Query::ItemGetRecent => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i ORDER BY i.timestamp DESC, i.id DESC LIMIT ?1"
            ),
            Query::ItemGetRated => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i WHERE i.rating IS NOT NULL ORDER BY i.id"
            ),
            Query::ItemGetById => concat!("SELECT ", item_cols!(), " FROM item i WHERE i.id = ?1"),
            Query::ItemGetByUrl => concat!("SELECT ", item_cols!(), " FROM item i WHERE i.link = ?1"),
            Query::ItemGetByFeed => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i WHERE i.feed_id = ?1 ORDER BY i.timestamp DESC, i.id DESC LIMIT ?2"
            ),
            Query::ItemGetAll => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i ORDER BY i.timestamp DESC, i.id DESC LIMIT ?1 OFFSET ?2"
            ),
            Query::ItemGetFts => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item_index JOIN item i ON item_index.link = i.link
                 WHERE item_index MATCH ?1
                 ORDER BY i.timestamp DESC, i.id DESC"
            ),
            Query::ItemGetSearchExtended => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item_index JOIN item i ON item_index.link = i.link
                 WHERE item_index MATCH ?1 AND i.timestamp > ?2 AND i.timestamp < ?3
                 ORDER BY i.timestamp DESC, i.id DESC"
            ),
            Query::ItemGetByTag => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i JOIN tag_link l ON l.item_id = i.id
                 WHERE l.tag_id = ?1
                 ORDER BY i.timestamp DESC, i.id DESC"
            ),
            Query::ItemGetByTagRecursive => concat!(
                "WITH RECURSIVE subtree (id) AS (
                     SELECT ?1
                     UNION ALL
                     SELECT t.id FROM tag t JOIN subtree s ON t.parent = s.id
                 )
                 SELECT DISTINCT ",
                item_cols!(),
                " FROM item i JOIN tag_link l ON l.item_id = i.id
                 WHERE l.tag_id IN (SELECT id FROM subtree)
                 ORDER BY i.timestamp DESC, i.id DESC"
            ),
            Query::ItemGetContent => "SELECT description FROM item WHERE id = ?1",
            Query::ItemGetPrefetch => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i WHERE i.prefetch = 0 ORDER BY i.timestamp, i.id LIMIT ?1"
            ),
            Query::ItemGetTotalCount => "SELECT COUNT(id) FROM item",
            Query::ItemGetTagged => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i
                 WHERE EXISTS (SELECT 1 FROM tag_link l WHERE l.item_id = i.id)
                 ORDER BY i.id"
            ),
            Query::ItemRatingSet => "UPDATE item SET rating = ?2 WHERE id = ?1",
            Query::ItemRatingClear => "UPDATE item SET rating = NULL WHERE id = ?1",
            Query::ItemPrefetchSet => "UPDATE item SET description = ?2, prefetch = 1 WHERE id = ?1",
            Query::ItemHasDuplicate => {
                "SELECT COUNT(id) FROM item WHERE link = ?1 OR (feed_id = ?2 AND title = ?3)"
            }
            Query::ItemMarkRead => "UPDATE item SET read = ?2 WHERE id = ?1",
            Query::TagCreate => "INSERT INTO tag (name, description, parent) VALUES (?1, ?2, ?3)",
            Query::TagDelete => "DELETE FROM tag WHERE id = ?1",
            Query::TagGetAll => concat!("SELECT ", tag_cols!(), " FROM tag_sorted t ORDER BY t.full_name"),
            Query::TagGetById => concat!("SELECT ", tag_cols!(), " FROM tag_sorted t WHERE t.id = ?1"),
            Query::TagGetByName => concat!("SELECT ", tag_cols!(), " FROM tag_sorted t WHERE t.name = ?1"),
            Query::TagGetChildren => concat!(
                "WITH RECURSIVE descendants (id) AS (
                     SELECT id FROM tag WHERE parent = ?1
                     UNION ALL
                     SELECT c.id FROM tag c JOIN descendants d ON c.parent = d.id
                 )
                 SELECT ",
                tag_cols!(),
                " FROM tag_sorted t WHERE t.id IN (SELECT id FROM descendants) ORDER BY t.full_name"
            ),
            Query::TagGetChildrenImmediate => concat!(
                "SELECT ",
                tag_cols!(),
                " FROM tag_sorted t WHERE t.parent = ?1 ORDER BY t.name"
            ),
            Query::TagGetRoots => concat!(
                "SELECT ",
                tag_cols!(),
                " FROM tag_sorted t WHERE t.parent IS NULL ORDER BY t.name"
            ),
            Query::TagGetByItem => concat!(
                "SELECT ",
                tag_cols!(),
                " FROM tag_sorted t JOIN tag_link l ON l.tag_id = t.id
                 WHERE l.item_id = ?1
                 ORDER BY t.full_name"
            ),
            Query::TagNameUpdate => "UPDATE tag SET name = ?2 WHERE id = ?1",
            Query::TagDescriptionUpdate => "UPDATE tag SET description = ?2 WHERE id = ?1",
            Query::TagParentSet => "UPDATE tag SET parent = ?2 WHERE id = ?1",
            Query::TagParentClear => "UPDATE tag SET parent = NULL WHERE id = ?1",
            Query::TagLinkAdd => "INSERT INTO tag_link (tag_id, item_id) VALUES (?1, ?2)",
            Query::TagLinkDelete => "DELETE FROM tag_link WHERE tag_id = ?1 AND item_id = ?2",
            Query::ReadLaterAdd => {
                "INSERT INTO read_later (item_id, note, timestamp, deadline) VALUES (?1, ?2, ?3, ?4)"
            }
            Query::ReadLaterGetByItem => {
                concat!("SELECT ", later_cols!(), " FROM read_later WHERE item_id = ?1")
            }
            Query::ReadLaterGetAll => concat!(
                "SELECT ",
                later_cols!(),
                " FROM read_later ORDER BY COALESCE(deadline, timestamp), id"
            ),
            Query::ReadLaterGetUnread => concat!(
                "SELECT ",
                later_cols!(),
                " FROM read_later WHERE read = 0 ORDER BY COALESCE(deadline, timestamp), id"
            ),
            Query::ReadLaterMarkRead => "UPDATE read_later SET read = ?2 WHERE id = ?1",
            Query::ReadLaterDelete => "DELETE FROM read_later WHERE id = ?1",
            Query::ReadLaterSetDeadline => "UPDATE read_later SET deadline = ?2 WHERE id = ?1",
            Query::ReadLaterSetNote => "UPDATE read_later SET note = ?2 WHERE id = ?1",
            Query::ClusterCreate => {
                "INSERT INTO cluster (name, description, timestamp) VALUES (?1, ?2, ?3)"
            }
            Query::ClusterDelete => "DELETE FROM cluster WHERE id = ?1",
            Query::ClusterLinkAdd => "INSERT INTO cluster_link (cluster_id, item_id) VALUES (?1, ?2)",
            Query::ClusterLinkDelete => {
                "DELETE FROM cluster_link WHERE cluster_id = ?1 AND item_id = ?2"
            }
            Query::ClusterGetById => {
                "SELECT id, name, description, timestamp FROM cluster WHERE id = ?1"
            }
            Query::ClusterGetByItem => {
                "SELECT c.id, c.name, c.description, c.timestamp
                 FROM cluster c JOIN cluster_link l ON l.cluster_id = c.id
                 WHERE l.item_id = ?1
                 ORDER BY c.name"
            }
            Query::ClusterGetItems => concat!(
                "SELECT ",
                item_cols!(),
                " FROM item i JOIN cluster_link l ON l.item_id = i.id
                 WHERE l.cluster_id = ?1
                 ORDER BY i.timestamp DESC, i.id DESC"
            ),
            Query::ClusterGetAll => "SELECT id, name, description, timestamp FROM cluster ORDER BY name",
            Query::FtsClear => "DELETE FROM item_index",
            Query::FtsPopulate => {
                "INSERT INTO item_index (link, body) SELECT link, title || ' ' || description FROM item"
            }
        }
    }

    pub fn prepare(self, conn: &Connection) -> rusqlite::Result<CachedStatement<'_>> {
        conn.prepare_cached(self.sql())
    }
}
