//! Persistent state: feeds, items, tags, read-later reminders, clusters and
//! the full-text index, all in one SQLite database.

mod clusters;
mod feeds;
mod items;
mod later;
pub mod pool;
pub mod query;
pub mod schema;
pub mod sqlite;
mod tags;

pub use pool::{Pool, PooledStore};
pub use sqlite::SqliteStore;
