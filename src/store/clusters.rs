use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::app::Result;
use crate::domain::Cluster;
use crate::store::items::load_items;
use crate::store::query::Query;
use crate::store::sqlite::{expect_change, from_unix, to_unix, SqliteStore};

fn cluster_from_row(row: &Row<'_>) -> rusqlite::Result<Cluster> {
    Ok(Cluster {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        timestamp: from_unix(row.get(3)?),
        items: Vec::new(),
    })
}

fn load_clusters<P: rusqlite::Params>(conn: &Connection, q: Query, args: P) -> Result<Vec<Cluster>> {
    let mut stmt = q.prepare(conn)?;
    let clusters = stmt
        .query_map(args, cluster_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(clusters)
}

impl SqliteStore {
    pub fn cluster_create(&mut self, name: &str, description: &str) -> Result<Cluster> {
        let stamp = to_unix(&Utc::now());
        let id = self.write(|conn| {
            Query::ClusterCreate
                .prepare(conn)?
                .execute(params![name, description, stamp])?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(Cluster {
            id,
            name: name.to_string(),
            description: description.to_string(),
            timestamp: from_unix(stamp),
            items: Vec::new(),
        })
    }

    pub fn cluster_delete(&mut self, id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::ClusterDelete.prepare(conn)?.execute([id])?;
            expect_change(n, || format!("cluster {}", id))
        })
    }

    pub fn cluster_link_add(&mut self, cluster_id: i64, item_id: i64) -> Result<()> {
        self.write(|conn| {
            Query::ClusterLinkAdd
                .prepare(conn)?
                .execute(params![cluster_id, item_id])?;
            Ok(())
        })
    }

    pub fn cluster_link_delete(&mut self, cluster_id: i64, item_id: i64) -> Result<()> {
        self.write(|conn| {
            let n = Query::ClusterLinkDelete
                .prepare(conn)?
                .execute(params![cluster_id, item_id])?;
            expect_change(n, || {
                format!("link between cluster {} and item {}", cluster_id, item_id)
            })
        })
    }

    pub fn cluster_get_by_id(&self, id: i64) -> Result<Option<Cluster>> {
        self.read(|conn| {
            Ok(Query::ClusterGetById
                .prepare(conn)?
                .query_row([id], cluster_from_row)
                .optional()?)
        })
    }

    /// Clusters the item belongs to, without their member items.
    pub fn cluster_get_by_item(&self, item_id: i64) -> Result<Vec<Cluster>> {
        self.read(|conn| load_clusters(conn, Query::ClusterGetByItem, [item_id]))
    }

    pub fn cluster_get_items(&self, cluster_id: i64) -> Result<Vec<crate::domain::Item>> {
        self.read(|conn| load_items(conn, Query::ClusterGetItems, [cluster_id]))
    }

    /// All clusters with their member items loaded.
    pub fn cluster_get_all(&self) -> Result<Vec<Cluster>> {
        self.read(|conn| {
            let mut clusters = load_clusters(conn, Query::ClusterGetAll, [])?;
            for c in clusters.iter_mut() {
                c.items = load_items(conn, Query::ClusterGetItems, [c.id])?;
            }
            Ok(clusters)
        })
    }
}
