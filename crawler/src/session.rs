use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use url::Url;

use sitesearch_core::config::AppConfig;
use sitesearch_core::lemma::Lemmatizer;
use sitesearch_core::model::SiteStatus;
use sitesearch_core::storage::Storage;
use sitesearch_core::SiteId;
use sitesearch_indexer::Indexer;

use crate::fetch::{FetchError, Fetcher};

pub const STOP_MESSAGE: &str = "Индексация остановлена пользователем";

/// How long a stop request waits for in-flight branches to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Non-document extensions that never become pages.
const SKIPPED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "css", "webp", "doc", "png", "gif", "bmp", "pdf",
];

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("url is outside the configured site list: {0}")]
    Configuration(String),
    #[error("a crawl session is already running")]
    AlreadyRunning,
    #[error("no crawl session is running")]
    NotRunning,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

struct SessionHandle {
    cancel: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Owns crawl sessions: at most one is active at a time, enforced by an
/// atomic check-and-set on `running`.
pub struct CrawlService {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn Fetcher>,
    indexer: Arc<Indexer>,
    lemmatizer: Arc<Lemmatizer>,
    config: AppConfig,
    running: AtomicBool,
    session: Mutex<Option<SessionHandle>>,
}

impl CrawlService {
    pub fn new(
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn Fetcher>,
        indexer: Arc<Indexer>,
        lemmatizer: Arc<Lemmatizer>,
        config: AppConfig,
    ) -> Self {
        Self {
            storage,
            fetcher,
            indexer,
            lemmatizer,
            config,
            running: AtomicBool::new(false),
            session: Mutex::new(None),
        }
    }

    pub fn is_crawling(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_configured(&self, url: &str) -> bool {
        self.config.site_for_url(url).is_some()
    }

    /// Launch one crawl session over every configured site. Rejected
    /// without side effects while another session runs.
    pub fn start_crawl(self: Arc<Self>) -> Result<(), CrawlError> {
        // the slot is locked before `running` flips, so a stop that sees
        // the flag always finds the handle behind this lock
        let mut session = self.session.lock();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CrawlError::AlreadyRunning);
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let service = Arc::clone(&self);
        let session_cancel = Arc::clone(&cancel);
        let driver = tokio::spawn(async move {
            service.run_session(session_cancel).await;
        });
        *session = Some(SessionHandle { cancel, driver });
        Ok(())
    }

    /// Cooperative stop: flag the session, wait briefly for the drain,
    /// then force every known site to Failed with a stop message.
    pub async fn stop_crawl(&self) -> Result<(), CrawlError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CrawlError::NotRunning);
        }
        tracing::info!("crawl stop requested by user");
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.cancel.store(true, Ordering::SeqCst);
            if tokio::time::timeout(DRAIN_TIMEOUT, session.driver).await.is_err() {
                tracing::warn!("crawl session did not drain in time");
            }
        }
        for site in self.storage.all_sites() {
            self.storage
                .set_site_status(site.id, SiteStatus::Failed, Some(STOP_MESSAGE.to_string()));
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn run_session(self: Arc<Self>, cancel: Arc<AtomicBool>) {
        let slots = Arc::new(Semaphore::new(self.config.crawl.workers.max(1)));
        let mut roots = Vec::new();
        for site_config in &self.config.sites {
            let root_url = match Url::parse(&site_config.url) {
                Ok(url) => url,
                Err(err) => {
                    tracing::error!(url = %site_config.url, %err, "invalid site url in config");
                    continue;
                }
            };
            if let Some(previous) = self.storage.find_site_by_url(&site_config.url) {
                self.storage.delete_site(previous.id);
            }
            let site = self.storage.insert_site(&site_config.url, &site_config.name);
            tracing::info!(site = %site.url, "crawl started");

            let context = Arc::new(CrawlContext {
                storage: Arc::clone(&self.storage),
                fetcher: Arc::clone(&self.fetcher),
                indexer: Arc::clone(&self.indexer),
                lemmatizer: Arc::clone(&self.lemmatizer),
                site_id: site.id,
                site_url: root_url.clone(),
                discovered: Mutex::new(HashSet::from([site_relative_path(&root_url)])),
                cancel: Arc::clone(&cancel),
                fetch_slots: Arc::clone(&slots),
                max_depth: self.config.crawl.max_depth,
                delay: Duration::from_millis(self.config.crawl.politeness_delay_ms),
            });
            roots.push(tokio::spawn(crawl_branch(context, root_url, 0)));
        }
        for root in roots {
            let _ = root.await;
        }
        // a stop in progress owns the flag and the final site states
        if !cancel.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            tracing::info!("crawl session finished");
        }
    }

    /// Re-fetch and re-index a single page. The url must extend one of
    /// the configured sites; anything else is rejected with no state
    /// change.
    pub async fn reindex_page(&self, url: &str) -> Result<(), CrawlError> {
        let site_config = self
            .config
            .site_for_url(url)
            .ok_or_else(|| CrawlError::Configuration(url.to_string()))?
            .clone();
        let parsed = Url::parse(url).map_err(|_| CrawlError::Configuration(url.to_string()))?;
        let path = site_relative_path(&parsed);

        let site = match self.storage.find_site_by_url(&site_config.url) {
            Some(site) => site,
            None => self.storage.insert_site(&site_config.url, &site_config.name),
        };
        if let Some(existing) = self.storage.find_page(site.id, &path) {
            tracing::info!(%path, "deleting page before reindex");
            self.indexer.remove_page(existing.id);
        }
        self.storage.set_site_status(site.id, SiteStatus::Indexing, None);
        tokio::time::sleep(Duration::from_millis(self.config.crawl.politeness_delay_ms)).await;

        match self.fetcher.fetch(&parsed).await {
            Ok(fetched) => {
                let page = self
                    .storage
                    .save_page(site.id, &path, fetched.code, &fetched.body);
                let counts = self.lemmatizer.collect_lemmas(&fetched.body);
                self.indexer.index_page(site.id, &page, &counts);
                self.storage.set_site_status(site.id, SiteStatus::Indexed, None);
                tracing::info!(url, "page reindexed");
                Ok(())
            }
            Err(FetchError::Connect { message, .. }) => {
                let error = format!("Could not connect to page {url}: {message}");
                self.storage
                    .set_site_status(site.id, SiteStatus::Failed, Some(error.clone()));
                Err(CrawlError::Other(anyhow!(error)))
            }
        }
    }
}

/// Per-site state shared by every branch of one crawl session.
struct CrawlContext {
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn Fetcher>,
    indexer: Arc<Indexer>,
    lemmatizer: Arc<Lemmatizer>,
    site_id: SiteId,
    site_url: Url,
    /// Paths already claimed by some branch. The insert is the atomic
    /// dedup point that keeps two branches from creating the same page.
    discovered: Mutex<HashSet<String>>,
    cancel: Arc<AtomicBool>,
    fetch_slots: Arc<Semaphore>,
    max_depth: u32,
    delay: Duration,
}

impl CrawlContext {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: SiteStatus, last_error: Option<String>) {
        if !self.cancelled() {
            self.storage.set_site_status(self.site_id, status, last_error);
        }
    }

    /// Reduce an outbound link to a site-relative path, or reject it.
    fn normalize_link(&self, link: &Url) -> Option<String> {
        if !host_matches(&self.site_url, link) {
            return None;
        }
        if !is_document_path(link.path()) {
            return None;
        }
        // fragment-only anchors collapse onto an already-discovered path
        Some(site_relative_path(link))
    }
}

/// One traversal unit of the fork-join tree: fetch `url`, store and index
/// its page, then fork a child per newly discovered path.
fn crawl_branch(
    ctx: Arc<CrawlContext>,
    url: Url,
    depth: u32,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        if ctx.cancelled() || depth > ctx.max_depth {
            return;
        }
        ctx.set_status(SiteStatus::Indexing, None);
        tokio::time::sleep(ctx.delay).await;

        let fetched = {
            let _permit = match ctx.fetch_slots.acquire().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            if ctx.cancelled() {
                return;
            }
            tracing::info!(%url, depth, "crawling page");
            ctx.fetcher.fetch(&url).await
        };
        let path = site_relative_path(&url);

        let page = match fetched {
            Err(FetchError::Connect { message, .. }) => {
                if depth == 0 {
                    tracing::error!(%url, %message, "site root unreachable");
                    ctx.set_status(
                        SiteStatus::Failed,
                        Some(format!("Could not connect to site {url}: {message}")),
                    );
                } else if !ctx.cancelled() {
                    tracing::warn!(%url, %message, "page unreachable, branch continues");
                    ctx.storage.save_page(
                        ctx.site_id,
                        &path,
                        0,
                        &format!("Failed to load page content. Error: {message}"),
                    );
                }
                return;
            }
            Ok(page) => page,
        };

        if ctx.cancelled() {
            return;
        }
        let stored = ctx
            .storage
            .save_page(ctx.site_id, &path, page.code, &page.body);
        let counts = ctx.lemmatizer.collect_lemmas(&page.body);
        ctx.indexer.index_page(ctx.site_id, &stored, &counts);

        let mut children = Vec::new();
        if depth + 1 <= ctx.max_depth {
            for link in &page.links {
                if ctx.cancelled() {
                    break;
                }
                let Some(child_path) = ctx.normalize_link(link) else {
                    continue;
                };
                let newly_discovered = ctx.discovered.lock().insert(child_path);
                if newly_discovered {
                    let mut child_url = link.clone();
                    child_url.set_fragment(None);
                    children.push(tokio::spawn(crawl_branch(
                        Arc::clone(&ctx),
                        child_url,
                        depth + 1,
                    )));
                }
            }
        }
        for child in children {
            let _ = child.await;
        }

        if depth == 0 && !ctx.cancelled() {
            ctx.set_status(SiteStatus::Indexed, None);
        }
    })
}

/// Path plus query of a url, scheme and host stripped; never empty.
pub fn site_relative_path(url: &Url) -> String {
    let mut path = url.path().to_string();
    if path.is_empty() {
        path.push('/');
    }
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

fn host_matches(site: &Url, link: &Url) -> bool {
    match (site.host_str(), link.host_str()) {
        (Some(a), Some(b)) => {
            a.trim_start_matches("www.") == b.trim_start_matches("www.")
        }
        _ => false,
    }
}

fn is_document_path(path: &str) -> bool {
    match path.rsplit_once('.') {
        Some((_, ext)) => !SKIPPED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => true,
    }
}
