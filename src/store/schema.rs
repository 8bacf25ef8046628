//! Schema of a freshly created database.
//!
//! Each statement becomes one step of the migration set that
//! [`SqliteStore`](crate::store::SqliteStore) applies when it opens a
//! database, so the whole schema is created in a single transaction.

use rusqlite_migration::{Migrations, M};

pub const INIT_QUERIES: &[&str] = &[
    "CREATE TABLE feed (
        id                INTEGER PRIMARY KEY,
        name              TEXT NOT NULL,
        url               TEXT UNIQUE NOT NULL,
        homepage          TEXT NOT NULL DEFAULT '',
        refresh_interval  INTEGER NOT NULL,
        refresh_timestamp INTEGER NOT NULL DEFAULT 0,
        active            INTEGER NOT NULL DEFAULT 1,
        CONSTRAINT interval_positive CHECK (refresh_interval > 0)
    )",
    "CREATE TABLE item (
        id          INTEGER PRIMARY KEY,
        feed_id     INTEGER NOT NULL,
        link        TEXT UNIQUE NOT NULL,
        title       TEXT NOT NULL,
        description TEXT NOT NULL,
        timestamp   INTEGER NOT NULL,
        read        INTEGER NOT NULL DEFAULT 0,
        rating      REAL,
        prefetch    INTEGER NOT NULL DEFAULT 0,
        CHECK (rating IS NULL OR (rating BETWEEN 0.0 AND 1.0)),
        CONSTRAINT feed_link_uniq UNIQUE (feed_id, link),
        FOREIGN KEY (feed_id) REFERENCES feed (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT
    )",
    "CREATE INDEX item_feed_idx ON item (feed_id)",
    "CREATE INDEX item_timestamp_idx ON item (timestamp)",
    "CREATE INDEX item_prefetch_idx ON item (prefetch)",
    "CREATE TABLE tag (
        id          INTEGER PRIMARY KEY,
        name        TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        parent      INTEGER,
        CHECK (parent IS NULL OR parent <> id),
        FOREIGN KEY (parent) REFERENCES tag (id)
            ON DELETE RESTRICT
            ON UPDATE RESTRICT
    )",
    "CREATE INDEX tag_parent_idx ON tag (parent)",
    "CREATE VIEW tag_sorted AS
     WITH RECURSIVE tree (id, name, description, parent, level, full_name) AS (
         SELECT id, name, description, parent, 0, name
         FROM tag
         WHERE parent IS NULL
         UNION ALL
         SELECT t.id, t.name, t.description, t.parent, tree.level + 1,
                tree.full_name || '/' || t.name
         FROM tag t
         JOIN tree ON t.parent = tree.id
     )
     SELECT id, name, description, parent, level, full_name FROM tree",
    "CREATE TABLE tag_link (
        id      INTEGER PRIMARY KEY,
        tag_id  INTEGER NOT NULL,
        item_id INTEGER NOT NULL,
        UNIQUE (tag_id, item_id),
        FOREIGN KEY (tag_id) REFERENCES tag (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT,
        FOREIGN KEY (item_id) REFERENCES item (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT
    )",
    "CREATE INDEX tag_link_tag_idx ON tag_link (tag_id)",
    "CREATE INDEX tag_link_item_idx ON tag_link (item_id)",
    "CREATE TABLE read_later (
        id        INTEGER PRIMARY KEY,
        item_id   INTEGER UNIQUE NOT NULL,
        note      TEXT NOT NULL DEFAULT '',
        timestamp INTEGER NOT NULL,
        deadline  INTEGER,
        read      INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (item_id) REFERENCES item (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT
    )",
    "CREATE TABLE cluster (
        id          INTEGER PRIMARY KEY,
        name        TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        timestamp   INTEGER NOT NULL
    )",
    "CREATE TABLE cluster_link (
        id         INTEGER PRIMARY KEY,
        cluster_id INTEGER NOT NULL,
        item_id    INTEGER NOT NULL,
        UNIQUE (cluster_id, item_id),
        FOREIGN KEY (cluster_id) REFERENCES cluster (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT,
        FOREIGN KEY (item_id) REFERENCES item (id)
            ON DELETE CASCADE
            ON UPDATE RESTRICT
    )",
    "CREATE INDEX cluster_link_item_idx ON cluster_link (item_id)",
    "CREATE VIRTUAL TABLE item_index USING fts5 (
        link UNINDEXED,
        body,
        tokenize = 'porter unicode61'
    )",
    "CREATE TRIGGER item_index_add AFTER INSERT ON item
     BEGIN
         INSERT INTO item_index (link, body)
         VALUES (new.link, new.title || ' ' || new.description);
     END",
    "CREATE TRIGGER item_index_del AFTER DELETE ON item
     BEGIN
         DELETE FROM item_index WHERE link = old.link;
     END",
    "CREATE TRIGGER cluster_link_add_stamp AFTER INSERT ON cluster_link
     BEGIN
         UPDATE cluster
         SET timestamp = CAST(strftime('%s', 'now') AS INTEGER)
         WHERE id = new.cluster_id;
     END",
    "CREATE TRIGGER cluster_link_del_stamp AFTER DELETE ON cluster_link
     BEGIN
         UPDATE cluster
         SET timestamp = CAST(strftime('%s', 'now') AS INTEGER)
         WHERE id = old.cluster_id;
     END",
];

pub fn migrations() -> Migrations<'static> {
    Migrations::new(INIT_QUERIES.iter().map(|q| M::up(q)).collect())
}
