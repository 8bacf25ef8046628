use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::app::{Result, TickerError};
use crate::store::query::Query;
use crate::store::schema;

const RETRY_DELAY: Duration = Duration::from_millis(25);

static RETRY_PAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)database is (?:locked|busy)").expect("retry pattern is valid")
});

/// Bookkeeping for the transaction that is currently open on a handle.
#[derive(Debug, Default)]
struct TxState {
    /// Open savepoints, oldest first, as (user name, generated identifier).
    savepoints: Vec<(String, String)>,
    /// Every name a caller has passed to `savepoint_create` in this transaction.
    user_names: HashSet<String>,
    counter: u32,
}

impl TxState {
    fn next_identifier(&mut self) -> String {
        loop {
            self.counter += 1;
            let ident = format!("Savepoint{:05}", self.counter);
            if !self.user_names.contains(&ident) {
                return ident;
            }
        }
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(user, _)| user == name)
            .ok_or_else(|| TickerError::InvalidSavepoint(name.to_string()))
    }
}

/// One handle to the database. A handle owns its connection and must not be
/// shared between concurrent callers; use [`Pool`](crate::store::Pool) for that.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
    tx: Option<TxState>,
}

impl SqliteStore {
    /// Opens the database at `path`, creating and initializing it if needed.
    ///
    /// If the file did not exist before and initialization fails, the file
    /// is removed again so no half-initialized database is left behind.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let created = !path.exists();

        let conn = Connection::open(path)?;
        let mut store = Self {
            conn,
            path: Some(path.to_path_buf()),
            tx: None,
        };

        if let Err(e) = store.initialize() {
            error!("Failed to initialize database at {}: {}", path.display(), e);
            drop(store);
            if created {
                if let Err(rm) = fs::remove_file(path) {
                    warn!("Cannot remove broken database {}: {}", path.display(), rm);
                }
            }
            return Err(e);
        }

        if created {
            info!("Created new database at {}", path.display());
        }
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self {
            conn,
            path: None,
            tx: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize(&mut self) -> Result<()> {
        self.conn
            .set_prepared_statement_cache_capacity(Query::COUNT);
        let mode: String =
            self.conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Journal mode is {}", mode);
        self.conn.pragma_update(None, "foreign_keys", true)?;
        self.conn.pragma_update(None, "recursive_triggers", false)?;
        self.conn.busy_timeout(Duration::from_millis(100))?;

        schema::migrations().to_latest(&mut self.conn)?;
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(TickerError::TxInProgress);
        }
        retry(|| Ok(self.conn.execute_batch("BEGIN IMMEDIATE")?))?;
        self.tx = Some(TxState::default());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.tx.is_none() {
            return Err(TickerError::NoTxInProgress);
        }
        match retry(|| Ok(self.conn.execute_batch("COMMIT")?)) {
            Ok(()) => {
                self.tx = None;
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    pub fn rollback(&mut self) -> Result<()> {
        if self.tx.is_none() {
            return Err(TickerError::NoTxInProgress);
        }
        self.tx = None;
        retry(|| Ok(self.conn.execute_batch("ROLLBACK")?))
    }

    /// Rolls back whatever is open and forgets the transaction state.
    fn abort(&mut self) {
        self.tx = None;
        if self.conn.is_autocommit() {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            error!("Cannot roll back transaction: {}", e);
        }
    }

    pub fn savepoint_create(&mut self, name: &str) -> Result<()> {
        let tx = self.tx.as_mut().ok_or(TickerError::NoTxInProgress)?;
        tx.user_names.insert(name.to_string());
        let ident = tx.next_identifier();
        retry(|| Ok(self.conn.execute_batch(&format!("SAVEPOINT {}", ident))?))?;
        if let Some(tx) = self.tx.as_mut() {
            tx.savepoints.push((name.to_string(), ident));
        }
        Ok(())
    }

    /// Releases the named savepoint and every savepoint created after it.
    pub fn savepoint_release(&mut self, name: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TickerError::NoTxInProgress)?;
        let pos = tx.position(name)?;
        let ident = tx.savepoints[pos].1.clone();
        retry(|| Ok(self.conn.execute_batch(&format!("RELEASE SAVEPOINT {}", ident))?))?;
        if let Some(tx) = self.tx.as_mut() {
            tx.savepoints.truncate(pos);
        }
        Ok(())
    }

    /// Undoes everything since the named savepoint was created and drops it
    /// together with every newer savepoint.
    pub fn savepoint_rollback(&mut self, name: &str) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(TickerError::NoTxInProgress)?;
        let pos = tx.position(name)?;
        let ident = tx.savepoints[pos].1.clone();
        let sql = format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", ident);
        retry(|| Ok(self.conn.execute_batch(&sql)?))?;
        if let Some(tx) = self.tx.as_mut() {
            tx.savepoints.truncate(pos);
        }
        Ok(())
    }

    /// Runs a read-only operation, retrying on transient lock contention.
    pub(crate) fn read<T>(&self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        retry(|| op(&self.conn))
    }

    /// Runs a mutation inside the active transaction, or inside an ad-hoc
    /// transaction if none is open.
    ///
    /// A failure inside an explicit transaction rolls that transaction back.
    pub(crate) fn write<T>(&mut self, mut op: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        let explicit = self.tx.is_some();
        if !explicit {
            retry(|| Ok(self.conn.execute_batch("BEGIN IMMEDIATE")?))?;
        }

        let res = retry(|| op(&self.conn));
        match res {
            Ok(value) => {
                if !explicit {
                    if let Err(e) = retry(|| Ok(self.conn.execute_batch("COMMIT")?)) {
                        self.abort();
                        return Err(e);
                    }
                }
                Ok(value)
            }
            Err(e) => {
                debug!("Rolling back after failed mutation: {}", e);
                self.abort();
                Err(e)
            }
        }
    }

    /// Checkpoints the WAL and compacts, reindexes and analyzes the database.
    pub fn perform_maintenance(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(TickerError::TxInProgress);
        }
        retry(|| {
            self.conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })?;
        for stmt in ["VACUUM", "REINDEX", "ANALYZE"] {
            retry(|| Ok(self.conn.execute_batch(stmt)?))?;
        }
        info!("Database maintenance finished");
        Ok(())
    }

    /// Clears the full-text index and repopulates it from all items.
    pub fn fts_rebuild(&mut self) -> Result<usize> {
        let cnt = self.write(|conn| {
            Query::FtsClear.prepare(conn)?.execute([])?;
            Ok(Query::FtsPopulate.prepare(conn)?.execute([])?)
        })?;
        info!("Rebuilt full-text index with {} items", cnt);
        Ok(cnt)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!("Store handle dropped with an open transaction, rolling back");
            self.abort();
        }
    }
}

fn is_transient(err: &TickerError) -> bool {
    match err {
        TickerError::Database(e) => RETRY_PAT.is_match(&e.to_string()),
        _ => false,
    }
}

fn retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match op() {
            Err(e) if is_transient(&e) => {
                debug!("Database is busy, retrying: {}", e);
                thread::sleep(RETRY_DELAY);
            }
            res => return res,
        }
    }
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

pub(crate) fn to_unix(stamp: &DateTime<Utc>) -> i64 {
    stamp.timestamp()
}

/// Maps "no row changed" to [`TickerError::ObjectNotFound`].
pub(crate) fn expect_change(changed: usize, what: impl FnOnce() -> String) -> Result<()> {
    if changed == 0 {
        Err(TickerError::ObjectNotFound(what()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Feed, Item};

    fn feed(store: &mut SqliteStore, name: &str) -> Feed {
        let mut f = Feed::new(
            name,
            format!("https://{}.example.com/feed.xml", name),
            Duration::from_secs(900),
        );
        store.feed_add(&mut f).unwrap();
        f
    }

    #[test]
    fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticker.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            assert_eq!(store.path(), Some(path.as_path()));
        }
        assert!(path.exists());

        // Reopening an initialized database must not fail.
        let mut store = SqliteStore::open(&path).unwrap();
        feed(&mut store, "reopen");
        assert_eq!(store.feed_get_all().unwrap().len(), 1);
    }

    #[test]
    fn test_open_removes_file_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("ticker.db");
        assert!(SqliteStore::open(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_transaction_state_errors() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(matches!(store.commit(), Err(TickerError::NoTxInProgress)));
        assert!(matches!(store.rollback(), Err(TickerError::NoTxInProgress)));

        store.begin().unwrap();
        assert!(store.in_transaction());
        assert!(matches!(store.begin(), Err(TickerError::TxInProgress)));
        store.commit().unwrap();
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_rollback_discards_changes() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        feed(&mut store, "a");
        feed(&mut store, "b");
        store.rollback().unwrap();
        assert!(store.feed_get_all().unwrap().is_empty());
    }

    #[test]
    fn test_commit_keeps_changes() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        feed(&mut store, "a");
        feed(&mut store, "b");
        store.commit().unwrap();
        assert_eq!(store.feed_get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_mutation_rolls_back_explicit_transaction() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        let f = feed(&mut store, "a");
        let mut dup = Feed::new("dup", f.url.clone(), Duration::from_secs(60));
        assert!(store.feed_add(&mut dup).is_err());
        assert!(!store.in_transaction());
        assert!(store.feed_get_all().unwrap().is_empty());
    }

    #[test]
    fn test_same_link_under_two_feeds_is_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        let a = feed(&mut store, "a");
        let b = feed(&mut store, "b");

        let mut item = Item::new(a.id, "https://example.com/shared", "Shared");
        store.item_add(&mut item).unwrap();

        let mut other = Item::new(b.id, "https://example.com/shared", "Shared again");
        let res = store.item_add(&mut other);
        assert!(matches!(res, Err(TickerError::Database(_))));
        assert_eq!(other.id, 0);
        assert_eq!(store.item_get_total_count().unwrap(), 1);
        assert!(store.item_get_by_feed(b.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_savepoint_requires_transaction() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.savepoint_create("sp"),
            Err(TickerError::NoTxInProgress)
        ));
        assert!(matches!(
            store.savepoint_release("sp"),
            Err(TickerError::NoTxInProgress)
        ));
        assert!(matches!(
            store.savepoint_rollback("sp"),
            Err(TickerError::NoTxInProgress)
        ));
    }

    #[test]
    fn test_savepoint_unknown_name() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        assert!(matches!(
            store.savepoint_release("nope"),
            Err(TickerError::InvalidSavepoint(_))
        ));
        store.rollback().unwrap();
    }

    #[test]
    fn test_savepoint_rollback_undoes_later_changes() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        feed(&mut store, "kept");
        store.savepoint_create("before-b; DROP TABLE feed").unwrap();
        feed(&mut store, "undone");
        store.savepoint_create("inner").unwrap();
        feed(&mut store, "undone-too");
        store.savepoint_rollback("before-b; DROP TABLE feed").unwrap();

        // Both savepoints are gone now.
        assert!(matches!(
            store.savepoint_release("inner"),
            Err(TickerError::InvalidSavepoint(_))
        ));
        store.commit().unwrap();

        let names: Vec<String> = store
            .feed_get_all()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[test]
    fn test_savepoint_release_drops_newer() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        store.savepoint_create("outer").unwrap();
        store.savepoint_create("inner").unwrap();
        store.savepoint_release("outer").unwrap();
        assert!(matches!(
            store.savepoint_rollback("inner"),
            Err(TickerError::InvalidSavepoint(_))
        ));
        store.commit().unwrap();
    }

    #[test]
    fn test_savepoint_identifiers_avoid_user_names() {
        let mut tx = TxState::default();
        tx.user_names.insert("Savepoint00001".to_string());
        tx.user_names.insert("Savepoint00002".to_string());
        assert_eq!(tx.next_identifier(), "Savepoint00003");

        let mut store = SqliteStore::in_memory().unwrap();
        store.begin().unwrap();
        store.savepoint_create("Savepoint00001").unwrap();
        store.savepoint_create("other").unwrap();
        let tx = store.tx.as_ref().unwrap();
        for (_, ident) in &tx.savepoints {
            assert!(!tx.user_names.contains(ident));
        }
        store.rollback().unwrap();

        // The namespace starts over with the next transaction.
        store.begin().unwrap();
        store.savepoint_create("x").unwrap();
        assert_eq!(store.tx.as_ref().unwrap().savepoints[0].1, "Savepoint00001");
        store.commit().unwrap();
    }

    #[test]
    fn test_retry_pattern() {
        let busy = TickerError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(5),
            Some("database is locked".to_string()),
        ));
        assert!(is_transient(&busy));
        assert!(!is_transient(&TickerError::EmptyUpdate));

        let mut attempts = 0;
        let res: Result<u32> = retry(|| {
            attempts += 1;
            if attempts < 3 {
                Err(TickerError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(5),
                    Some("Database is BUSY".to_string()),
                )))
            } else {
                Ok(attempts)
            }
        });
        assert_eq!(res.unwrap(), 3);
    }

    #[test]
    fn test_maintenance() {
        let mut store = SqliteStore::in_memory().unwrap();
        feed(&mut store, "a");
        store.perform_maintenance().unwrap();

        store.begin().unwrap();
        assert!(matches!(
            store.perform_maintenance(),
            Err(TickerError::TxInProgress)
        ));
        store.rollback().unwrap();
    }

    #[test]
    fn test_fts_rebuild() {
        let mut store = SqliteStore::in_memory().unwrap();
        let f = feed(&mut store, "news");
        let words = ["aardvark", "bumblebee", "chinchilla"];
        let mut ids = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let mut item = Item::new(f.id, format!("https://example.com/{}", i), format!("Item {}", i));
            item.description = format!("All about the {}", word);
            store.item_add(&mut item).unwrap();
            ids.push(item.id);
        }

        assert_eq!(store.fts_rebuild().unwrap(), 3);
        let hits = store.item_get_fts("bumblebee").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, ids[1]);
    }
}
