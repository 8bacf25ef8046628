use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::app::{Result, TickerError};
use crate::domain::Tag;
use crate::store::query::Query;
use crate::store::sqlite::{expect_change, SqliteStore};

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        parent: row.get(3)?,
        level: row.get(4)?,
        full_name: row.get(5)?,
    })
}

fn load_tags<P: rusqlite::Params>(conn: &Connection, q: Query, args: P) -> Result<Vec<Tag>> {
    let mut stmt = q.prepare(conn)?;
    let tags = stmt
        .query_map(args, tag_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(tags)
}

pub(crate) fn tags_for_item(conn: &Connection, item_id: i64) -> Result<Vec<Tag>> {
    load_tags(conn, Query::TagGetByItem, [item_id])
}

impl SqliteStore {
    /// Creates a tag and assigns its id.
    pub fn tag_create(&mut self, tag: &mut Tag) -> Result<()> {
        if tag.name.is_empty() {
            return Err(TickerError::InvalidValue("tag name must not be empty".into()));
        }
        let id = self.write(|conn| {
            Query::TagCreate
                .prepare(conn)?
                .execute(params![tag.name, tag.description, tag.parent])?;
            Ok(conn.last_insert_rowid())
        })?;
        tag.id = id;
        Ok(())
    }

    /// Deletes a tag. Fails while the tag still has children.
    pub fn tag_delete(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::TagDelete.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("tag {}", id))
        })
    }

    /// All tags in hierarchical order.
    pub fn tag_get_all(&self) -> Result<Vec<Tag>> {
        self.read(|conn| load_tags(conn, Query::TagGetAll, []))
    }

    pub fn tag_get_by_id(&self, id: i64) -> Result<Option<Tag>> {
        self.read(|conn| {
            Ok(Query::TagGetById
                .prepare(conn)?
                .query_row([id], tag_from_row)
                .optional()?)
        })
    }

    pub fn tag_get_by_name(&self, name: &str) -> Result<Option<Tag>> {
        self.read(|conn| {
            Ok(Query::TagGetByName
                .prepare(conn)?
                .query_row([name], tag_from_row)
                .optional()?)
        })
    }

    /// All descendants of a tag, at any depth.
    pub fn tag_get_children(&self, id: i64) -> Result<Vec<Tag>> {
        self.read(|conn| load_tags(conn, Query::TagGetChildren, [id]))
    }

    pub fn tag_get_children_immediate(&self, id: i64) -> Result<Vec<Tag>> {
        self.read(|conn| load_tags(conn, Query::TagGetChildrenImmediate, [id]))
    }

    pub fn tag_get_roots(&self) -> Result<Vec<Tag>> {
        self.read(|conn| load_tags(conn, Query::TagGetRoots, []))
    }

    pub fn tag_get_by_item(&self, item_id: i64) -> Result<Vec<Tag>> {
        self.read(|conn| tags_for_item(conn, item_id))
    }

    pub fn tag_name_update(&mut self, id: i64, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TickerError::EmptyUpdate);
        }
        self.write(|conn| {
            let n = Query::TagNameUpdate.prepare(conn)?.execute(params![id, name])?;
            expect_change(n, || format!("tag {}", id))
        })
    }

    pub fn tag_description_update(&mut self, id: i64, description: &str) -> Result<()> {
        self.write(|conn| {
            let n = Query::TagDescriptionUpdate
                .prepare(conn)?
                .execute(params![id, description])?;
            expect_change(n, || format!("tag {}", id))
        })
    }

    /// Moves a tag below `parent`. Refuses to create a cycle.
    pub fn tag_parent_set(&mut self, id: i64, parent: i64) -> Result<()> {
        if id == parent
            || self
                .tag_get_children(id)?
                .iter()
                .any(|child| child.id == parent)
        {
            return Err(TickerError::InvalidValue(format!(
                "tag {} cannot become a child of its descendant {}",
                id, parent
            )));
        }
        self.write(|conn| {
            let n = Query::TagParentSet.prepare(conn)?.execute(params![id, parent])?;
            expect_change(n, || format!("tag {}", id))
        })
    }

    pub fn tag_parent_clear(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::TagParentClear.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("tag {}", id))
        })
    }

    pub fn tag_link_add(&mut self, tag_id: i64, item_id: i64) -> Result<()> {
        self.write(|conn| {
            Query::TagLinkAdd
                .prepare(conn)?
                .execute(params![tag_id, item_id])?;
            Ok(())
        })
    }

    pub fn tag_link_delete(&mut self, tag_id: i64, item_id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::TagLinkDelete
                .prepare(conn)?
                .execute(params![tag_id, item_id])?;
            expect_change(n, || format!("link between tag {} and item {}", tag_id, item_id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Feed, Item};
    use std::time::Duration;

    fn tag(store: &mut SqliteStore, name: &str, parent: Option<i64>) -> Tag {
        let mut t = Tag::new(name);
        t.parent = parent;
        store.tag_create(&mut t).unwrap();
        t
    }

    #[test]
    fn test_tag_hierarchy() {
        let mut store = SqliteStore::in_memory().unwrap();
        let it = tag(&mut store, "IT", None);
        let prog = tag(&mut store, "Programming", Some(it.id));
        let rust = tag(&mut store, "Rust", Some(prog.id));

        let children = store.tag_get_children(it.id).unwrap();
        let names: Vec<&str> = children.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Programming", "Rust"]);

        let immediate = store.tag_get_children_immediate(it.id).unwrap();
        assert_eq!(immediate.len(), 1);
        assert_eq!(immediate[0].id, prog.id);

        let roots = store.tag_get_roots().unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, it.id);

        let fetched = store.tag_get_by_id(rust.id).unwrap().unwrap();
        assert_eq!(fetched.level, 2);
        assert_eq!(fetched.full_name, "IT/Programming/Rust");
        assert_eq!(fetched.parent, Some(prog.id));

        let all = store.tag_get_all().unwrap();
        let full: Vec<&str> = all.iter().map(|t| t.full_name.as_str()).collect();
        assert_eq!(full, vec!["IT", "IT/Programming", "IT/Programming/Rust"]);
    }

    #[test]
    fn test_tag_delete_restricted_by_children() {
        let mut store = SqliteStore::in_memory().unwrap();
        let it = tag(&mut store, "IT", None);
        let prog = tag(&mut store, "Programming", Some(it.id));

        assert!(matches!(store.tag_delete(it.id), Err(TickerError::Database(_))));
        store.tag_delete(prog.id).unwrap();
        store.tag_delete(it.id).unwrap();
        assert!(store.tag_get_all().unwrap().is_empty());
    }

    #[test]
    fn test_tag_parent_cycle_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        let a = tag(&mut store, "A", None);
        let b = tag(&mut store, "B", Some(a.id));
        let c = tag(&mut store, "C", Some(b.id));

        assert!(matches!(
            store.tag_parent_set(a.id, c.id),
            Err(TickerError::InvalidValue(_))
        ));
        assert!(matches!(
            store.tag_parent_set(a.id, a.id),
            Err(TickerError::InvalidValue(_))
        ));

        store.tag_parent_clear(c.id).unwrap();
        store.tag_parent_set(a.id, c.id).unwrap();
        let a = store.tag_get_by_name("A").unwrap().unwrap();
        assert_eq!(a.full_name, "C/A");
    }

    #[test]
    fn test_tag_updates() {
        let mut store = SqliteStore::in_memory().unwrap();
        let t = tag(&mut store, "Old", None);

        assert!(matches!(
            store.tag_name_update(t.id, ""),
            Err(TickerError::EmptyUpdate)
        ));
        store.tag_name_update(t.id, "New").unwrap();
        store.tag_description_update(t.id, "Shiny").unwrap();

        let t = store.tag_get_by_name("New").unwrap().unwrap();
        assert_eq!(t.description, "Shiny");
        assert!(store.tag_get_by_name("Old").unwrap().is_none());
        assert!(matches!(
            store.tag_name_update(999, "x"),
            Err(TickerError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_tag_links() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut feed = Feed::new("f", "https://f.example.com/", Duration::from_secs(60));
        store.feed_add(&mut feed).unwrap();
        let mut item = Item::new(feed.id, "https://f.example.com/1", "one");
        store.item_add(&mut item).unwrap();

        let t = tag(&mut store, "Linked", None);
        store.tag_link_add(t.id, item.id).unwrap();
        assert!(store.tag_link_add(t.id, item.id).is_err());

        let tags = store.tag_get_by_item(item.id).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, t.id);
        assert!(store.item_get_by_id(item.id).unwrap().unwrap().has_tag(t.id));

        store.tag_link_delete(t.id, item.id).unwrap();
        assert!(store.tag_get_by_item(item.id).unwrap().is_empty());
        assert!(matches!(
            store.tag_link_delete(t.id, item.id),
            Err(TickerError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_tag_name_unique() {
        let mut store = SqliteStore::in_memory().unwrap();
        tag(&mut store, "Dup", None);
        let mut again = Tag::new("Dup");
        assert!(store.tag_create(&mut again).is_err());
        assert_eq!(again.id, 0);
    }
}
