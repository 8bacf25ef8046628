//! Local caching of the images embedded in item bodies.
//!
//! A feeder task picks items that have not been prefetched yet and hands them
//! to a set of workers. Each worker downloads the images of an item into
//! `cache/`, points the `<img>` tags at the local copies and strips scripts
//! and iframes. A receiver task writes the sanitized bodies back to the store.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, HandlerResult, RewriteStrSettings};
use regex::Regex;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha512};
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::Result;
use crate::blacklist::Blacklist;
use crate::domain::Item;
use crate::store::Pool;

pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_IMAGE_SIZE: u64 = 512 * 1024;

const CACHE_PREFIX: &str = "/cache/";

static IMAGE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^image/([a-z]+)$").expect("image type pattern is valid"));

#[derive(Debug, Clone)]
pub struct PrefetchSettings {
    pub workers: usize,
    pub batch_size: usize,
    pub interval: Duration,
    pub max_image_size: u64,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: DEFAULT_BATCH_SIZE,
            interval: DEFAULT_INTERVAL,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

/// Result of one worker run. Failures go to the receiver too, so the item
/// leaves the in-flight set either way.
struct Processed {
    item_id: i64,
    body: Result<String>,
}

pub struct Prefetcher {
    pool: Pool,
    client: Client,
    cache_dir: PathBuf,
    settings: PrefetchSettings,
    running: Arc<AtomicBool>,
}

impl Prefetcher {
    pub fn new(pool: Pool, client: Client, cache_dir: impl Into<PathBuf>, settings: PrefetchSettings) -> Self {
        Self {
            pool,
            client,
            cache_dir: cache_dir.into(),
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn sanitizer(&self) -> Sanitizer {
        Sanitizer::new(
            self.client.clone(),
            self.cache_dir.clone(),
            self.settings.max_image_size,
        )
    }

    /// Spawns the feeder, the receiver and the workers.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        let workers = self.settings.workers.max(1);
        info!("Starting prefetcher with {} workers", workers);

        let (proc_tx, proc_rx) = mpsc::channel::<Item>(workers);
        let (res_tx, res_rx) = mpsc::channel::<Processed>(workers);
        let proc_rx = Arc::new(Mutex::new(proc_rx));
        let in_flight = Arc::new(std::sync::Mutex::new(HashSet::new()));

        let mut handles = Vec::with_capacity(workers + 2);
        handles.push(tokio::spawn(feeder(
            self.pool.clone(),
            proc_tx,
            in_flight.clone(),
            self.running.clone(),
            self.settings.clone(),
        )));
        handles.push(tokio::spawn(receiver(
            self.pool.clone(),
            res_rx,
            in_flight,
            self.running.clone(),
            self.settings.interval,
        )));
        for id in 0..workers {
            handles.push(tokio::spawn(worker(
                id,
                self.sanitizer(),
                proc_rx.clone(),
                res_tx.clone(),
                self.running.clone(),
                self.settings.interval,
            )));
        }
        handles
    }
}

type InFlight = Arc<std::sync::Mutex<HashSet<i64>>>;

async fn feeder(
    pool: Pool,
    tx: mpsc::Sender<Item>,
    in_flight: InFlight,
    running: Arc<AtomicBool>,
    settings: PrefetchSettings,
) {
    let mut ticker = interval(settings.interval);
    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let items = match pool.get().await {
            Ok(db) => db.item_get_prefetch(settings.batch_size),
            Err(e) => Err(e),
        };
        let items = match items {
            Ok(items) => items,
            Err(e) => {
                error!("Cannot get unprocessed items from database: {}", e);
                continue;
            }
        };

        for item in items {
            let fresh = match in_flight.lock() {
                Ok(mut set) => set.insert(item.id),
                Err(_) => false,
            };
            if !fresh {
                continue;
            }
            if tx.send(item).await.is_err() {
                debug!("Prefetch queue closed, feeder exits");
                return;
            }
        }
    }
    debug!("Prefetch feeder finished");
}

async fn receiver(
    pool: Pool,
    mut rx: mpsc::Receiver<Processed>,
    in_flight: InFlight,
    running: Arc<AtomicBool>,
    idle: Duration,
) {
    let mut ticker = interval(idle);
    while running.load(Ordering::SeqCst) {
        let processed = tokio::select! {
            _ = ticker.tick() => continue,
            p = rx.recv() => p,
        };
        let Some(p) = processed else {
            break;
        };

        match p.body {
            Ok(body) => {
                let res = match pool.get().await {
                    Ok(mut db) => db.item_prefetch_set(p.item_id, &body),
                    Err(e) => Err(e),
                };
                if let Err(e) = res {
                    error!("Cannot update prefetched item {}: {}", p.item_id, e);
                }
            }
            Err(e) => error!("Cannot prefetch item {}: {}", p.item_id, e),
        }
        if let Ok(mut set) = in_flight.lock() {
            set.remove(&p.item_id);
        }
    }
    debug!("Prefetch receiver finished");
}

async fn worker(
    id: usize,
    mut sanitizer: Sanitizer,
    queue: Arc<Mutex<mpsc::Receiver<Item>>>,
    results: mpsc::Sender<Processed>,
    running: Arc<AtomicBool>,
    idle: Duration,
) {
    let mut ticker = interval(idle);
    while running.load(Ordering::SeqCst) {
        let next = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = ticker.tick() => continue,
                item = rx.recv() => item,
            }
        };
        let Some(item) = next else {
            break;
        };

        let body = sanitizer.sanitize(&item).await;
        if let Err(e) = &body {
            debug!("Sanitizing {:?} failed: {}", item.title, e);
        }
        let processed = Processed {
            item_id: item.id,
            body,
        };
        if results.send(processed).await.is_err() {
            break;
        }
    }
    debug!("Prefetch worker {} finished", id);
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Keep,
    Remove,
    Replace(String),
}

/// Rewrites item bodies to use locally cached images.
pub struct Sanitizer {
    client: Client,
    cache_dir: PathBuf,
    max_image_size: u64,
    blacklist: Blacklist,
}

impl Sanitizer {
    pub fn new(client: Client, cache_dir: PathBuf, max_image_size: u64) -> Self {
        Self {
            client,
            cache_dir,
            max_image_size,
            blacklist: Blacklist::default(),
        }
    }

    /// Returns the sanitized description of `item`. Images that cannot be
    /// fetched keep their original source.
    pub async fn sanitize(&mut self, item: &Item) -> Result<String> {
        let base = Url::parse(&item.link).ok();
        let mut actions = HashMap::new();
        for src in image_sources(&item.description)? {
            if actions.contains_key(&src) {
                continue;
            }
            let action = self.process_image(base.as_ref(), &src).await;
            actions.insert(src, action);
        }
        rewrite_body(&item.description, &actions)
    }

    async fn process_image(&mut self, base: Option<&Url>, src: &str) -> Action {
        if src.is_empty() || src.starts_with(CACHE_PREFIX) {
            return Action::Keep;
        }
        let resolved = match base {
            Some(base) => base.join(src),
            None => Url::parse(src),
        };
        let url = match resolved {
            Ok(url) => url,
            Err(e) => {
                debug!("Cannot resolve image {:?}: {}", src, e);
                return Action::Keep;
            }
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Action::Keep;
        }
        if self.blacklist.matches(url.as_str()) {
            debug!("Blacklisted image: {}", url);
            return Action::Remove;
        }

        match self.fetch_image(&url).await {
            Ok(action) => action,
            Err(e) => {
                warn!("Cannot fetch image {}: {}", url, e);
                Action::Keep
            }
        }
    }

    async fn fetch_image(&self, url: &Url) -> Result<Action> {
        let head = self.client.head(url.clone()).send().await?;
        if head.status() == StatusCode::NOT_FOUND {
            return Ok(Action::Keep);
        }
        let declared = head
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_image_size) {
            debug!("Image {} is too large ({:?} bytes)", url, declared);
            return Ok(Action::Remove);
        }

        let resp = self.client.get(url.clone()).send().await?;
        if resp.status() != StatusCode::OK {
            debug!("GET {} returned {}", url, resp.status());
            return Ok(Action::Keep);
        }
        let mime = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let Some(suffix) = IMAGE_TYPE
            .captures(mime.trim())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        else {
            debug!("{} is not an image: {:?}", url, mime);
            return Ok(Action::Keep);
        };

        let body = resp.bytes().await?;
        if body.len() as u64 > self.max_image_size {
            debug!("Image {} is too large ({} bytes)", url, body.len());
            return Ok(Action::Remove);
        }

        let name = cache_name(url, &suffix);
        let path = self.cache_dir.join(&name);
        write_cached(&path, &body).await?;
        Ok(Action::Replace(format!("{}{}", CACHE_PREFIX, name)))
    }
}

/// Name of the cache file for `url`: the hex SHA-512 digest of the URL with
/// the image type as extension.
fn cache_name(url: &Url, suffix: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(url.as_str().as_bytes());
    format!("{}.{}", hex::encode(hasher.finalize()), suffix)
}

async fn write_cached(path: &Path, body: &[u8]) -> Result<()> {
    // Same URL, same content. Whoever wrote it first is as good as us.
    if fs::try_exists(path).await? {
        return Ok(());
    }
    fs::write(path, body).await?;
    Ok(())
}

fn record_src(found: &RefCell<Vec<String>>, el: &Element) {
    if let Some(src) = el.get_attribute("src") {
        found.borrow_mut().push(src.trim().to_string());
    }
}

fn image_sources(body: &str) -> Result<Vec<String>> {
    let found = RefCell::new(Vec::new());
    rewrite_str(
        body,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                record_src(&found, el);
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(found.into_inner())
}

fn apply(actions: &HashMap<String, Action>, el: &mut Element) -> HandlerResult {
    let Some(src) = el.get_attribute("src") else {
        return Ok(());
    };
    match actions.get(src.trim()) {
        Some(Action::Replace(local)) => el.set_attribute("src", local)?,
        Some(Action::Remove) => el.remove(),
        Some(Action::Keep) | None => {}
    }
    Ok(())
}

fn strip(el: &mut Element) -> HandlerResult {
    el.remove();
    Ok(())
}

fn rewrite_body(body: &str, actions: &HashMap<String, Action>) -> Result<String> {
    let rendered = rewrite_str(
        body,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", |el| apply(actions, el)),
                element!("script, iframe", strip),
            ],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rendered)
}
