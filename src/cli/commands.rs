use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::{AppContext, Result, TickerError};
use crate::curator::Curator;
use crate::domain::{Feed, Item};
use crate::poller::store_items;
use crate::search::SearchQuery;
use crate::source::FeedSource;

/// Subscribes to `url` and stores its current items.
pub async fn add_feed(ctx: &AppContext, url: &str, name: Option<String>, interval: u64) -> Result<()> {
    if interval == 0 {
        return Err(TickerError::InvalidValue("refresh interval must be positive".to_string()));
    }

    let mut feed = Feed::new(name.clone().unwrap_or_default(), url, Duration::from_secs(interval));
    ctx.store().await?.feed_add(&mut feed)?;

    let mut source = FeedSource::new(feed.clone(), ctx.fetcher.clone());
    let items = match source.fetch().await {
        Ok(items) => items,
        Err(e) => {
            ctx.store().await?.feed_delete(feed.id)?;
            return Err(e);
        }
    };

    if let Some(meta) = source.meta() {
        if name.is_none() {
            feed.name = meta.title.clone().unwrap_or_default();
        }
        feed.homepage = meta.homepage.clone().unwrap_or_default();
    }

    let mut db = ctx.store().await?;
    db.feed_modify(&feed)?;
    db.begin()?;
    let added = match store_items(&mut db, items, feed.id, Utc::now()) {
        Ok(added) => {
            db.commit()?;
            added
        }
        Err(e) => {
            if db.in_transaction() {
                db.rollback()?;
            }
            return Err(e);
        }
    };

    println!("Added feed: {} ({})", feed.display_title(), feed.url);
    println!("Fetched {} items", added);
    Ok(())
}

pub async fn list_feeds(ctx: &AppContext) -> Result<()> {
    let feeds = ctx.store().await?.feed_get_all()?;
    if feeds.is_empty() {
        println!("No feeds");
        return Ok(());
    }

    for feed in feeds {
        let state = if feed.active { "" } else { " [inactive]" };
        println!(
            "{:>4} {}{}\n     {} every {}s, next {}",
            feed.id,
            feed.display_title(),
            state,
            feed.url,
            feed.interval.as_secs(),
            feed.next().format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn list_items(ctx: &AppContext, limit: usize) -> Result<()> {
    let items = ctx.store().await?.item_get_recent(limit)?;
    if items.is_empty() {
        println!("No items");
        return Ok(());
    }

    let curator = ctx.curator().await?;
    for item in items {
        print_item(&item, Some(&curator));
    }
    Ok(())
}

fn print_item(item: &Item, curator: Option<&Curator>) {
    let read_marker = if item.read { " " } else { "*" };
    let rating = match (item.rating, curator) {
        (Some(r), _) => format!("{:.1}", r),
        (None, Some(c)) => c
            .rate(item)
            .map(|(v, p)| format!("{}? {:.0}%", v, p * 100.0))
            .unwrap_or_default(),
        (None, None) => String::new(),
    };
    println!(
        "{} {:>6} {} {:<12} {}",
        read_marker,
        item.id,
        item.timestamp.format("%Y-%m-%d"),
        rating,
        item.display_title()
    );
}

pub async fn search(ctx: &AppContext, words: &[String]) -> Result<()> {
    let raw = shlex::try_join(words.iter().map(String::as_str))
        .map_err(|e| TickerError::Query(e.to_string()))?;
    let query = SearchQuery::parse(&raw)?;
    let db = ctx.store().await?;
    let items = query.execute(&db)?;

    if items.is_empty() {
        println!("No matches");
        return Ok(());
    }
    for item in &items {
        print_item(item, None);
    }
    println!("{} matches", items.len());
    Ok(())
}

pub async fn archive_item(ctx: &AppContext, item_id: i64) -> Result<()> {
    let item = ctx
        .store()
        .await?
        .item_get_by_id(item_id)?
        .ok_or_else(|| TickerError::ObjectNotFound(format!("item {}", item_id)))?;

    let (archiver, _) = ctx.archiver();
    let index = archiver.page_worker().process_page(&item).await?;
    println!("Archived {} to {}", item.display_title(), index.display());
    Ok(())
}

pub async fn train(ctx: &AppContext) -> Result<()> {
    let curator = ctx.curator().await?;
    let db = ctx.store().await?;
    curator.retrain(&db)?;
    println!("Models retrained");
    Ok(())
}

pub async fn maintain(ctx: &AppContext) -> Result<()> {
    ctx.store().await?.perform_maintenance()?;
    println!("Maintenance complete");
    Ok(())
}

pub async fn rebuild_index(ctx: &AppContext) -> Result<()> {
    let cnt = ctx.store().await?.fts_rebuild()?;
    println!("Indexed {} items", cnt);
    Ok(())
}

/// Runs the background services until SIGINT or SIGTERM.
pub async fn run(ctx: &AppContext) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    spawn_signal_handler(running.clone());

    let (msg_tx, mut msg_rx) = mpsc::channel::<String>(64);
    tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            info!("{}", msg);
        }
    });

    let poller = ctx.poller().with_messages(msg_tx);
    let (stop_tx, stop_rx) = mpsc::channel(1);
    let (done_tx, mut done_rx) = mpsc::channel(1);
    let poller_task = tokio::spawn(poller.run(stop_rx, Some(done_tx)));

    let prefetcher = ctx.prefetcher();
    let prefetch_tasks = prefetcher.start();

    let (archiver, archive_queue) = ctx.archiver();
    let archive_tasks = archiver.start();
    queue_reading_list(ctx, &archive_queue).await;

    info!("ticker is running, base directory {}", ctx.config.base_dir.display());
    let mut timer = tokio::time::interval(Duration::from_secs(1));
    while running.load(Ordering::SeqCst) {
        timer.tick().await;
    }

    info!("Shutting down");
    let _ = stop_tx.send(()).await;
    let _ = done_rx.recv().await;
    prefetcher.stop();
    archiver.stop();
    drop(archive_queue);

    let _ = poller_task.await;
    join_all(prefetch_tasks.into_iter().chain(archive_tasks)).await;
    ctx.pool.close();
    Ok(())
}

/// Queues unread read-later items that have no offline copy yet.
async fn queue_reading_list(ctx: &AppContext, queue: &crate::archiver::ArchiverHandle) {
    let pending = match ctx.store().await {
        Ok(db) => db.read_later_get_unread().and_then(|list| {
            list.into_iter()
                .map(|r| db.item_get_by_id(r.item_id))
                .collect::<Result<Vec<_>>>()
        }),
        Err(e) => Err(e),
    };
    let items = match pending {
        Ok(items) => items.into_iter().flatten(),
        Err(e) => {
            warn!("Cannot load reading list: {}", e);
            return;
        }
    };

    for item in items {
        let index = ctx.config.archive_dir().join(item.id.to_string()).join("index.html");
        if index.exists() {
            continue;
        }
        let queue = queue.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.queue_item(item).await {
                warn!("{}", e);
            }
        });
    }
}

fn spawn_signal_handler(running: Arc<AtomicBool>) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => {},
                        _ = sigint.recv() => {},
                    }
                }
                _ => {
                    warn!("Cannot install signal handlers, waiting for Ctrl-C");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    #[cfg(windows)]
    {
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            running.store(false, Ordering::SeqCst);
        });
    }
}
