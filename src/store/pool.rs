use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::app::{Result, TickerError};
use crate::store::SqliteStore;

struct Inner {
    idle: Mutex<Vec<SqliteStore>>,
    semaphore: Arc<Semaphore>,
}

/// A fixed number of store handles shared by the tasks of the process.
///
/// `get` waits until a handle is free; the returned guard hands it back to
/// the pool when dropped.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Opens `size` handles to the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, size: usize) -> Result<Self> {
        let size = size.max(1);
        let handles = (0..size)
            .map(|_| SqliteStore::open(path.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        info!("Opened pool of {} handles to {}", size, path.as_ref().display());
        Ok(Self::from_handles(handles))
    }

    pub fn from_handles(handles: Vec<SqliteStore>) -> Self {
        let permits = handles.len();
        Self {
            inner: Arc::new(Inner {
                idle: Mutex::new(handles),
                semaphore: Arc::new(Semaphore::new(permits)),
            }),
        }
    }

    /// Takes a handle out of the pool, waiting for one to become free.
    pub async fn get(&self) -> Result<PooledStore> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TickerError::PoolClosed)?;
        let store = self
            .inner
            .idle
            .lock()
            .map_err(|e| TickerError::Other(format!("Pool lock poisoned: {}", e)))?
            .pop()
            .ok_or(TickerError::PoolClosed)?;
        Ok(PooledStore {
            store: Some(store),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Closes every idle handle. Handles still checked out are closed when
    /// they are returned; further calls to `get` fail with `PoolClosed`.
    pub fn close(&self) {
        self.inner.semaphore.close();
        if let Ok(mut idle) = self.inner.idle.lock() {
            debug!("Closing {} idle database handles", idle.len());
            idle.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Number of handles currently available.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

/// A checked-out store handle.
pub struct PooledStore {
    store: Option<SqliteStore>,
    pool: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledStore {
    type Target = SqliteStore;

    fn deref(&self) -> &SqliteStore {
        self.store.as_ref().expect("pooled store is present until drop")
    }
}

impl DerefMut for PooledStore {
    fn deref_mut(&mut self) -> &mut SqliteStore {
        self.store.as_mut().expect("pooled store is present until drop")
    }
}

impl Drop for PooledStore {
    fn drop(&mut self) {
        let Some(mut store) = self.store.take() else {
            return;
        };
        if self.pool.semaphore.is_closed() {
            return;
        }
        if store.in_transaction() {
            warn!("Store handle returned with an open transaction, rolling back");
            if let Err(e) = store.rollback() {
                warn!("Dropping store handle that cannot roll back: {}", e);
                return;
            }
        }
        if let Ok(mut idle) = self.pool.idle.lock() {
            idle.push(store);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Feed;
    use std::time::Duration;

    fn pool(size: usize) -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::open(dir.path().join("pool.db"), size).unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_get_and_return() {
        let (_dir, pool) = pool(2);
        assert_eq!(pool.available(), 2);
        {
            let mut a = pool.get().await.unwrap();
            let _b = pool.get().await.unwrap();
            assert_eq!(pool.available(), 0);

            let mut feed = Feed::new("pooled", "https://p.example.com/", Duration::from_secs(60));
            a.feed_add(&mut feed).unwrap();
        }
        assert_eq!(pool.available(), 2);

        let c = pool.get().await.unwrap();
        assert_eq!(c.feed_get_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_free_handle() {
        let (_dir, pool) = pool(1);
        let held = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_open_transaction_rolled_back_on_return() {
        let (_dir, pool) = pool(1);
        {
            let mut db = pool.get().await.unwrap();
            db.begin().unwrap();
            let mut feed = Feed::new("left open", "https://open.example.com/", Duration::from_secs(60));
            db.feed_add(&mut feed).unwrap();
        }

        let mut db = pool.get().await.unwrap();
        assert!(!db.in_transaction());
        assert!(db.feed_get_all().unwrap().is_empty());
        db.begin().unwrap();
        db.commit().unwrap();
    }

    #[tokio::test]
    async fn test_close_rejects_get() {
        let (_dir, pool) = pool(2);
        let held = pool.get().await.unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(pool.get().await, Err(TickerError::PoolClosed)));
        drop(held);
        assert!(matches!(pool.get().await, Err(TickerError::PoolClosed)));
    }
}
