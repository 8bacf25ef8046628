use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::app::Result;
use crate::domain::ReadLater;
use crate::store::query::Query;
use crate::store::sqlite::{expect_change, from_unix, to_unix, SqliteStore};

fn later_from_row(row: &Row<'_>) -> rusqlite::Result<ReadLater> {
    let deadline: Option<i64> = row.get(4)?;
    Ok(ReadLater {
        id: row.get(0)?,
        item_id: row.get(1)?,
        note: row.get(2)?,
        timestamp: from_unix(row.get(3)?),
        deadline: deadline.map(from_unix),
        read: row.get(5)?,
    })
}

impl SqliteStore {
    pub fn read_later_add(
        &mut self,
        item_id: i64,
        note: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<ReadLater> {
        let now = Utc::now();
        let id = self.write(|conn| {
            Query::ReadLaterAdd.prepare(conn)?.execute(params![
                item_id,
                note,
                to_unix(&now),
                deadline.as_ref().map(to_unix),
            ])?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(ReadLater {
            id,
            item_id,
            note: note.to_string(),
            timestamp: from_unix(to_unix(&now)),
            deadline: deadline.as_ref().map(|d| from_unix(to_unix(d))),
            read: false,
        })
    }

    pub fn read_later_get_by_item(&self, item_id: i64) -> Result<Option<ReadLater>> {
        self.read(|conn| {
            Ok(Query::ReadLaterGetByItem
                .prepare(conn)?
                .query_row([item_id], later_from_row)
                .optional()?)
        })
    }

    pub fn read_later_get_all(&self) -> Result<Vec<ReadLater>> {
        self.read(|conn| {
            let mut stmt = Query::ReadLaterGetAll.prepare(conn)?;
            let rows = stmt
                .query_map([], later_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn read_later_get_unread(&self) -> Result<Vec<ReadLater>> {
        self.read(|conn| {
            let mut stmt = Query::ReadLaterGetUnread.prepare(conn)?;
            let rows = stmt
                .query_map([], later_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn read_later_mark_read(&mut self, id: i64) -> Result<()> {
        self.read_later_set_read(id, true)
    }

    pub fn read_later_mark_unread(&mut self, id: i64) -> Result<()> {
        self.read_later_set_read(id, false)
    }

    fn read_later_set_read(&mut self, id: i64, read: bool) -> Result<()> {
        self.write(|conn| {
            let n = Query::ReadLaterMarkRead
                .prepare(conn)?
                .execute(params![id, read])?;
            expect_change(n, || format!("read-later entry {}", id))
        })
    }

    pub fn read_later_delete(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::ReadLaterDelete.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("read-later entry {}", id))
        })
    }

    pub fn read_later_set_deadline(&mut self, id: i64, deadline: Option<DateTime<Utc>>) -> Result<()> {
        self.write(|conn| {
            let n = Query::ReadLaterSetDeadline
                .prepare(conn)?
                .execute(params![id, deadline.as_ref().map(to_unix)])?;
            expect_change(n, || format!("read-later entry {}", id))
        })
    }

    pub fn read_later_set_note(&mut self, id: i64, note: &str) -> Result<()> {
        self.write(|conn| {
            let n = Query::ReadLaterSetNote
                .prepare(conn)?
                .execute(params![id, note])?;
            expect_change(n, || format!("read-later entry {}", id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::TickerError;
    use crate::domain::{Feed, Item};
    use chrono::Duration;

    fn setup() -> (SqliteStore, Feed, Vec<Item>) {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut feed = Feed::new("f", "https://f.example.com/", std::time::Duration::from_secs(60));
        store.feed_add(&mut feed).unwrap();
        let mut items = Vec::new();
        for n in 0..3 {
            let mut item = Item::new(feed.id, format!("https://f.example.com/{}", n), format!("item {}", n));
            store.item_add(&mut item).unwrap();
            items.push(item);
        }
        (store, feed, items)
    }

    #[test]
    fn test_read_later_lifecycle() {
        let (mut store, _, items) = setup();
        let deadline = Utc::now() + Duration::days(2);
        let later = store
            .read_later_add(items[0].id, "weekend", Some(deadline))
            .unwrap();
        assert!(later.id > 0);

        let fetched = store.read_later_get_by_item(items[0].id).unwrap().unwrap();
        assert_eq!(fetched, later);
        assert!(!fetched.is_due(Utc::now()));

        store.read_later_set_note(later.id, "tonight").unwrap();
        store
            .read_later_set_deadline(later.id, Some(Utc::now() - Duration::hours(1)))
            .unwrap();
        let fetched = store.read_later_get_by_item(items[0].id).unwrap().unwrap();
        assert_eq!(fetched.note, "tonight");
        assert!(fetched.is_due(Utc::now()));

        store.read_later_mark_read(later.id).unwrap();
        assert!(store.read_later_get_unread().unwrap().is_empty());
        store.read_later_mark_unread(later.id).unwrap();
        assert_eq!(store.read_later_get_unread().unwrap().len(), 1);

        store.read_later_delete(later.id).unwrap();
        assert!(store.read_later_get_by_item(items[0].id).unwrap().is_none());
        assert!(matches!(
            store.read_later_delete(later.id),
            Err(TickerError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_read_later_one_per_item() {
        let (mut store, _, items) = setup();
        store.read_later_add(items[1].id, "", None).unwrap();
        assert!(store.read_later_add(items[1].id, "again", None).is_err());
        assert_eq!(store.read_later_get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_read_later_cascades_from_feed() {
        let (mut store, feed, items) = setup();
        store.read_later_add(items[2].id, "", None).unwrap();
        store.feed_delete(feed.id).unwrap();
        assert!(store.read_later_get_all().unwrap().is_empty());
    }
}
