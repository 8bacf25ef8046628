pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ticker")]
#[command(about = "A personal RSS/Atom aggregator", long_about = None)]
pub struct Cli {
    /// Directory holding the database, logs, caches and models
    #[arg(short, long, global = true)]
    pub basedir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll feeds, prefetch images and archive pages until interrupted
    Run,
    /// Subscribe to a feed
    Add {
        /// URL of the feed
        url: String,
        /// Display name (default: the feed's title)
        #[arg(short, long)]
        name: Option<String>,
        /// Refresh interval in seconds
        #[arg(short, long, default_value_t = 900)]
        interval: u64,
    },
    /// List feeds or items
    List {
        /// Show the most recent items instead of feeds
        #[arg(long)]
        items: bool,
        /// Number of items to show
        #[arg(short, long, default_value_t = 25)]
        limit: usize,
    },
    /// Search items, e.g. `ticker search sqlite tag:Database datemin:2021-05-01`
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Save an offline copy of an item's page
    Archive {
        item_id: i64,
    },
    /// Retrain the rating classifier and the tag advisor
    Train,
    /// Checkpoint, vacuum and analyze the database
    Maintain,
    /// Rebuild the full-text index
    RebuildIndex,
}
