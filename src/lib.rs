//! # ticker
//!
//! A personal RSS/Atom aggregator.
//!
//! ## Architecture
//!
//! ```text
//! Poller → FeedSource (Fetcher → Normalizer) → Store → Prefetcher
//!                                                 ↘ Archiver (on demand)
//! ```
//!
//! New items are scored by the [`curator`], which holds a Bayesian rating
//! classifier and a tag advisor per language.
//!
//! ## Quick Start
//!
//! ```bash
//! # Subscribe to a feed
//! ticker add https://blog.rust-lang.org/feed.xml
//!
//! # Poll, prefetch and archive in the background
//! ticker run
//!
//! # Search
//! ticker search async tag:Rust datemin:2024-01-01
//! ```

/// Application context, error type and logging.
pub mod app;

/// Offline copies of item pages with their assets.
pub mod archiver;

/// Naive Bayes text model shared by the classifier and the advisor.
pub mod bayes;

/// Regex filter for tracker and advertising URLs.
pub mod blacklist;

/// Good/bad rating of items.
pub mod classifier;

/// Tag suggestions.
pub mod advisor;

/// Command-line interface using clap.
pub mod cli;

/// Configuration file and directory layout.
pub mod config;

/// The classifier and advisor behind one lock.
pub mod curator;

/// Core domain models: feeds, items, tags, read-later reminders, clusters.
pub mod domain;

/// HTTP fetching with conditional request support.
pub mod fetcher;

/// Language detection and plaintext extraction.
pub mod language;

/// RSS and Atom parsing into [`Item`](domain::Item)s.
pub mod normalizer;

/// Periodic refresh of due feeds.
pub mod poller;

/// Local caching of images embedded in item bodies.
pub mod prefetch;

/// Search query parsing and execution.
pub mod search;

/// One subscribed feed: fetch, parse and cache.
pub mod source;

/// SQLite persistence layer with connection pool.
pub mod store;
