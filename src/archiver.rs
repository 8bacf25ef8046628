//! Offline copies of item pages.
//!
//! Each archived page lives in `archive/<item_id>/`: the page itself as
//! `index.html` plus the images, scripts and stylesheets it references.
//! References in the page are rewritten to `/archive/<item_id>/<basename>`,
//! or to their absolute URL when the target is another page or an image that
//! could not be fetched.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, HandlerResult, RewriteStrSettings};
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{Result, TickerError};
use crate::blacklist::Blacklist;
use crate::domain::Item;

pub const DEFAULT_IDLE: Duration = Duration::from_millis(2500);

static MIME_PAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^/;\s]+)/([\w.+-]+)").expect("mime pattern is valid"));

const ASSET_SUBTYPES: &[&str] = &["javascript", "css", "json", "x-icon", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Kind {
    Image,
    Asset,
}

/// What happens to a reference found in the page.
#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    /// Leave the attribute as it is.
    Keep,
    /// Point the attribute at the local copy.
    Local(String),
    /// Point the attribute at the absolute URL on the original site.
    Remote(String),
    /// Blacklisted, drop the element.
    Blocked,
    /// Download failed.
    Failed,
}

/// Handle used to queue items for archiving.
#[derive(Clone)]
pub struct ArchiverHandle {
    tx: mpsc::Sender<Item>,
}

impl ArchiverHandle {
    pub async fn queue_item(&self, item: Item) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|e| TickerError::Other(format!("Archive queue is closed: {}", e)))
    }
}

pub struct Archiver {
    client: Client,
    archive_dir: PathBuf,
    workers: usize,
    idle: Duration,
    running: Arc<AtomicBool>,
    queue: Arc<Mutex<mpsc::Receiver<Item>>>,
}

impl Archiver {
    pub fn new(
        client: Client,
        archive_dir: impl Into<PathBuf>,
        workers: usize,
        idle: Duration,
    ) -> (Self, ArchiverHandle) {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(workers);
        let archiver = Self {
            client,
            archive_dir: archive_dir.into(),
            workers,
            idle,
            running: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(Mutex::new(rx)),
        };
        (archiver, ArchiverHandle { tx })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Workers finish the page they are working on and exit on their next
    /// idle tick.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.running.store(true, Ordering::SeqCst);
        info!("Starting {} archive workers", self.workers);
        (0..self.workers)
            .map(|id| {
                let worker = self.page_worker();
                let running = self.running.clone();
                let queue = self.queue.clone();
                let idle = self.idle;
                tokio::spawn(async move { worker.run(id, running, queue, idle).await })
            })
            .collect()
    }

    /// A worker with its own blacklist, for archiving pages directly.
    pub fn page_worker(&self) -> PageWorker {
        PageWorker::new(self.client.clone(), self.archive_dir.clone())
    }
}

pub struct PageWorker {
    client: Client,
    archive_dir: PathBuf,
    blacklist: Blacklist,
}

impl PageWorker {
    pub fn new(client: Client, archive_dir: PathBuf) -> Self {
        Self {
            client,
            archive_dir,
            blacklist: Blacklist::default(),
        }
    }

    async fn run(
        mut self,
        id: usize,
        running: Arc<AtomicBool>,
        queue: Arc<Mutex<mpsc::Receiver<Item>>>,
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
                debug!("Archive queue closed, worker {} exits", id);
                break;
            };
            if let Err(e) = self.process_page(&item).await {
                error!("Cannot archive item {} ({}): {}", item.id, item.link, e);
            }
        }
        debug!("Archive worker {} finished", id);
    }

    /// Archives one item page. On failure nothing is left in the archive.
    pub async fn process_page(&mut self, item: &Item) -> Result<PathBuf> {
        let page_dir = self.archive_dir.join(item.id.to_string());
        fs::create_dir_all(&page_dir).await?;

        match self.archive_into(item, &page_dir).await {
            Ok(index) => {
                info!("Archived item {} to {}", item.id, index.display());
                Ok(index)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_dir_all(&page_dir).await {
                    warn!("Cannot remove {}: {}", page_dir.display(), rm);
                }
                Err(e)
            }
        }
    }

    async fn archive_into(&mut self, item: &Item, page_dir: &Path) -> Result<PathBuf> {
        let base = Url::parse(&item.link)?;
        let resp = self.client.get(base.clone()).send().await?;
        check_status(&resp)?;
        let mime = content_type(&resp);
        if !mime.starts_with("text/html") {
            return Err(TickerError::ContentType {
                url: item.link.clone(),
                content_type: mime,
            });
        }

        let index = page_dir.join("index.html");
        save_body(resp, &index).await?;
        let raw = fs::read(&index).await?;
        let html = String::from_utf8_lossy(&raw).into_owned();

        let mut outcomes = Outcomes::new();
        for (kind, href) in collect_references(&html)? {
            if outcomes.contains_key(&(kind, href.clone())) {
                continue;
            }
            let outcome = self.resolve(item.id, &base, kind, &href, page_dir).await;
            outcomes.insert((kind, href), outcome);
        }

        let rendered = rewrite_page(&html, &outcomes)?;
        fs::write(&index, rendered).await?;
        Ok(index)
    }

    async fn resolve(&mut self, item_id: i64, base: &Url, kind: Kind, href: &str, dir: &Path) -> Outcome {
        if href.is_empty() || href.starts_with('#') {
            return Outcome::Keep;
        }
        let url = match base.join(href) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot resolve {:?} against {}: {}", href, base, e);
                return Outcome::Failed;
            }
        };
        if url.scheme() != "http" && url.scheme() != "https" {
            return Outcome::Keep;
        }
        if self.blacklist.matches(url.as_str()) {
            debug!("Blacklisted: {}", url);
            return Outcome::Blocked;
        }

        match self.download(&url, kind, dir).await {
            Ok(Some(name)) => Outcome::Local(format!("/archive/{}/{}", item_id, name)),
            Ok(None) => Outcome::Remote(url.to_string()),
            Err(e) => {
                warn!("Cannot fetch {}: {}", url, e);
                match kind {
                    Kind::Image => Outcome::Remote(url.to_string()),
                    Kind::Asset => Outcome::Failed,
                }
            }
        }
    }

    /// Saves `url` into `dir` and returns the local file name. `None` means
    /// the target is an HTML page that should stay linked remotely.
    async fn download(&self, url: &Url, kind: Kind, dir: &Path) -> Result<Option<String>> {
        let resp = self.client.get(url.clone()).send().await?;
        check_status(&resp)?;
        let mime = content_type(&resp);

        match kind {
            Kind::Image => {
                if !mime.starts_with("image/") {
                    return Err(TickerError::ContentType {
                        url: url.to_string(),
                        content_type: mime,
                    });
                }
            }
            Kind::Asset => {
                let subtype = MIME_PAT
                    .captures(&mime)
                    .and_then(|c| c.get(2))
                    .map(|m| m.as_str().to_ascii_lowercase());
                match subtype.as_deref() {
                    Some("html") => return Ok(None),
                    Some(s) if ASSET_SUBTYPES.contains(&s) => {}
                    _ => {
                        return Err(TickerError::ContentType {
                            url: url.to_string(),
                            content_type: mime,
                        })
                    }
                }
            }
        }

        let name = local_name(url);
        let path = dir.join(&name);
        debug!("Save {} to {}", url, path.display());
        if let Err(e) = save_body(resp, &path).await {
            let _ = fs::remove_file(&path).await;
            return Err(e);
        }
        Ok(Some(name))
    }
}

fn check_status(resp: &Response) -> Result<()> {
    if resp.status() != StatusCode::OK {
        return Err(TickerError::HttpStatus {
            url: resp.url().to_string(),
            status: resp.status().as_u16(),
        });
    }
    Ok(())
}

fn content_type(resp: &Response) -> String {
    resp.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn save_body(mut resp: Response, path: &Path) -> Result<()> {
    let mut fh = fs::File::create(path).await?;
    while let Some(chunk) = resp.chunk().await? {
        fh.write_all(&chunk).await?;
    }
    fh.flush().await?;
    Ok(())
}

/// The last path segment of `url`, or a checksum of the URL if it has none.
fn local_name(url: &Url) -> String {
    let base = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default();
    if base.is_empty() || base == "." || base == ".." {
        let mut hasher = Sha256::new();
        hasher.update(url.as_str().as_bytes());
        hex::encode(hasher.finalize())
    } else {
        base.to_string()
    }
}

fn record(found: &RefCell<Vec<(Kind, String)>>, kind: Kind, el: &Element, attr: &str) {
    if let Some(v) = el.get_attribute(attr) {
        found.borrow_mut().push((kind, v.trim().to_string()));
    }
}

fn collect_references(html: &str) -> Result<Vec<(Kind, String)>> {
    let found = RefCell::new(Vec::new());

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", |el| {
                    record(&found, Kind::Image, el, "src");
                    Ok(())
                }),
                element!("script[src]", |el| {
                    record(&found, Kind::Asset, el, "src");
                    Ok(())
                }),
                element!("link[href]", |el| {
                    record(&found, Kind::Asset, el, "href");
                    Ok(())
                }),
                element!("a[href]", |el| {
                    record(&found, Kind::Asset, el, "href");
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    Ok(found.into_inner())
}

type Outcomes = HashMap<(Kind, String), Outcome>;

fn apply(outcomes: &Outcomes, kind: Kind, el: &mut Element, attr: &str) -> HandlerResult {
    let Some(value) = el.get_attribute(attr) else {
        return Ok(());
    };
    let outcome = outcomes
        .get(&(kind, value.trim().to_string()))
        .unwrap_or(&Outcome::Keep);
    match outcome {
        Outcome::Keep => {}
        Outcome::Local(href) | Outcome::Remote(href) => el.set_attribute(attr, href)?,
        Outcome::Blocked => el.remove(),
        Outcome::Failed => match (kind, el.tag_name().as_str()) {
            (Kind::Image, _) => {}
            (_, "a") => el.remove_attribute(attr),
            _ => el.remove(),
        },
    }
    Ok(())
}

fn drop_element(el: &mut Element) -> HandlerResult {
    el.remove();
    Ok(())
}

fn rewrite_page(html: &str, outcomes: &Outcomes) -> Result<String> {
    let rendered = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("img[src]", |el| apply(outcomes, Kind::Image, el, "src")),
                element!("script[src]", |el| apply(outcomes, Kind::Asset, el, "src")),
                element!("link[href]", |el| apply(outcomes, Kind::Asset, el, "href")),
                element!("a[href]", |el| apply(outcomes, Kind::Asset, el, "href")),
                element!("video, audio, iframe", drop_element),
            ],
            ..RewriteStrSettings::default()
        },
    )?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::build_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r##"<html><head>
<script src="/js/app.js"></script>
<script src="https://www.google-analytics.com/ga.js"></script>
<script>inline();</script>
<link rel="stylesheet" href="style.css">
</head><body>
<img src="/img/pic.png"><img src="/img/missing.png">
<a href="/docs/manual.json">manual</a>
<a href="/broken.bin">broken</a>
<a href="/other.html">other page</a>
<a href="#top">top</a>
<a href="mailto:someone@example.com">mail</a>
<iframe src="/ad.html"></iframe>
<video src="/clip.mp4"></video>
</body></html>"##;

    async fn mount(server: &MockServer, p: &str, status: u16, mime: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(status).set_body_raw(body.to_vec(), mime))
            .mount(server)
            .await;
    }

    fn worker(dir: &Path) -> PageWorker {
        let client = build_client("ticker-test", Duration::from_secs(5)).unwrap();
        PageWorker::new(client, dir.to_path_buf())
    }

    fn item(id: i64, link: String) -> Item {
        let mut item = Item::new(1, link, "Archived");
        item.id = id;
        item
    }

    #[test]
    fn test_local_name() {
        let url = Url::parse("https://example.com/a/b/logo.png?x=1").unwrap();
        assert_eq!(local_name(&url), "logo.png");
        let root = Url::parse("https://example.com/").unwrap();
        let name = local_name(&root);
        assert_eq!(name.len(), 64);
        assert_ne!(name, local_name(&Url::parse("https://example.org/").unwrap()));
    }

    #[tokio::test]
    async fn test_process_page() {
        let server = MockServer::start().await;
        mount(&server, "/page.html", 200, "text/html; charset=utf-8", PAGE.as_bytes()).await;
        mount(&server, "/js/app.js", 200, "application/javascript", b"app();").await;
        mount(&server, "/style.css", 200, "text/css", b"body {}").await;
        mount(&server, "/img/pic.png", 200, "image/png", b"\x89PNG").await;
        mount(&server, "/img/missing.png", 404, "text/plain", b"").await;
        mount(&server, "/docs/manual.json", 200, "application/json", b"{}").await;
        mount(&server, "/broken.bin", 200, "application/octet-stream", b"\0").await;
        mount(&server, "/other.html", 200, "text/html", b"<html></html>").await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(dir.path());
        let index = w
            .process_page(&item(42, format!("{}/page.html", server.uri())))
            .await
            .unwrap();

        let page_dir = dir.path().join("42");
        assert_eq!(index, page_dir.join("index.html"));
        for f in ["app.js", "style.css", "pic.png", "manual.json"] {
            assert!(page_dir.join(f).exists(), "{} missing", f);
        }
        assert!(!page_dir.join("broken.bin").exists());
        assert!(!page_dir.join("other.html").exists());

        let html = std::fs::read_to_string(&index).unwrap();
        assert!(html.contains(r#"src="/archive/42/app.js""#));
        assert!(html.contains(r#"href="/archive/42/style.css""#));
        assert!(html.contains(r#"src="/archive/42/pic.png""#));
        assert!(html.contains(&format!(r#"src="{}/img/missing.png""#, server.uri())));
        assert!(html.contains(r#"href="/archive/42/manual.json""#));
        assert!(html.contains("<a>broken</a>"));
        assert!(html.contains(&format!(r#"href="{}/other.html""#, server.uri())));
        assert!(html.contains(r##"href="#top""##));
        assert!(html.contains(r#"href="mailto:someone@example.com""#));
        assert!(html.contains("inline();"));
        assert!(!html.contains("google-analytics"));
        assert!(!html.contains("<iframe"));
        assert!(!html.contains("<video"));
    }

    #[tokio::test]
    async fn test_archived_page_has_no_relative_references() {
        let server = MockServer::start().await;
        mount(&server, "/page.html", 200, "text/html", PAGE.as_bytes()).await;
        mount(&server, "/js/app.js", 200, "application/javascript", b"app();").await;
        mount(&server, "/style.css", 200, "text/css", b"body {}").await;
        mount(&server, "/img/pic.png", 200, "image/png", b"\x89PNG").await;
        mount(&server, "/img/missing.png", 404, "text/plain", b"").await;
        mount(&server, "/docs/manual.json", 200, "application/json", b"{}").await;
        mount(&server, "/broken.bin", 200, "application/octet-stream", b"\0").await;
        mount(&server, "/other.html", 200, "text/html", b"<html></html>").await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(dir.path());
        let index = w
            .process_page(&item(42, format!("{}/page.html", server.uri())))
            .await
            .unwrap();

        let page_dir = dir.path().join("42");
        let origin = format!("{}/", server.uri());
        let html = std::fs::read_to_string(&index).unwrap();
        let refs = collect_references(&html).unwrap();
        assert_eq!(refs.len(), 8);
        for (_, href) in refs {
            if let Some(name) = href.strip_prefix("/archive/42/") {
                assert!(page_dir.join(name).is_file(), "{} not in archive", href);
            } else {
                assert!(
                    href.starts_with(&origin) || href.starts_with('#') || href.starts_with("mailto:"),
                    "unexpected reference {}",
                    href
                );
            }
        }
    }

    #[tokio::test]
    async fn test_failed_page_leaves_nothing() {
        let server = MockServer::start().await;
        mount(&server, "/gone.html", 404, "text/html", b"").await;
        mount(&server, "/data.json", 200, "application/json", b"{}").await;

        let dir = tempfile::tempdir().unwrap();
        let mut w = worker(dir.path());

        let res = w.process_page(&item(7, format!("{}/gone.html", server.uri()))).await;
        assert!(matches!(res, Err(TickerError::HttpStatus { status: 404, .. })));
        assert!(!dir.path().join("7").exists());

        let res = w.process_page(&item(8, format!("{}/data.json", server.uri()))).await;
        assert!(matches!(res, Err(TickerError::ContentType { .. })));
        assert!(!dir.path().join("8").exists());
    }

    #[tokio::test]
    async fn test_worker_pool_archives_queued_items() {
        let server = MockServer::start().await;
        mount(&server, "/q.html", 200, "text/html", b"<html><body>queued</body></html>").await;

        let dir = tempfile::tempdir().unwrap();
        let client = build_client("ticker-test", Duration::from_secs(5)).unwrap();
        let (archiver, handle) = Archiver::new(client, dir.path(), 2, Duration::from_millis(20));
        let workers = archiver.start();
        assert!(archiver.is_running());

        handle
            .queue_item(item(5, format!("{}/q.html", server.uri())))
            .await
            .unwrap();

        let index = dir.path().join("5").join("index.html");
        for _ in 0..100 {
            if index.exists() && std::fs::read_to_string(&index).unwrap().contains("queued") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(std::fs::read_to_string(&index).unwrap().contains("queued"));

        archiver.stop();
        for w in workers {
            w.await.unwrap();
        }
    }
}
