use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use sitesearch_core::config::{AppConfig, CrawlSettings, SiteConfig};
use sitesearch_core::lemma::Lemmatizer;
use sitesearch_core::model::SiteStatus;
use sitesearch_core::storage::{MemoryStorage, Storage};
use sitesearch_crawler::fetch::{extract_links, FetchError, FetchedPage, Fetcher};
use sitesearch_crawler::session::{site_relative_path, CrawlError, CrawlService, STOP_MESSAGE};
use sitesearch_indexer::Indexer;

enum Fixture {
    Page(&'static str),
    Unreachable,
}

/// Serves a canned site keyed by site-relative path, with a configurable
/// per-fetch delay to keep branches in flight during stop tests.
struct FakeFetcher {
    pages: HashMap<&'static str, Fixture>,
    delay: Duration,
}

impl FakeFetcher {
    fn new(pages: Vec<(&'static str, Fixture)>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let path = site_relative_path(url);
        match self.pages.get(path.as_str()) {
            Some(Fixture::Page(body)) => Ok(FetchedPage {
                code: 200,
                body: body.to_string(),
                links: extract_links(url, body),
            }),
            Some(Fixture::Unreachable) | None => Err(FetchError::Connect {
                url: url.to_string(),
                message: "connection refused".into(),
            }),
        }
    }
}

fn test_config(max_depth: u32) -> AppConfig {
    AppConfig {
        sites: vec![SiteConfig {
            url: "https://example.com".into(),
            name: "Example".into(),
        }],
        crawl: CrawlSettings {
            max_depth,
            workers: 4,
            politeness_delay_ms: 1,
            ..CrawlSettings::default()
        },
        ..AppConfig::default()
    }
}

fn service_with(
    fetcher: FakeFetcher,
    config: AppConfig,
) -> (Arc<MemoryStorage>, Arc<CrawlService>) {
    let storage = Arc::new(MemoryStorage::new());
    let dyn_storage: Arc<dyn Storage> = storage.clone();
    let indexer = Arc::new(Indexer::new(dyn_storage.clone()));
    let lemmatizer = Arc::new(Lemmatizer::new());
    let service = Arc::new(CrawlService::new(
        dyn_storage,
        Arc::new(fetcher),
        indexer,
        lemmatizer,
        config,
    ));
    (storage, service)
}

async fn wait_idle(service: &Arc<CrawlService>) {
    for _ in 0..500 {
        if !service.is_crawling() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("crawl session never finished");
}

#[tokio::test(flavor = "multi_thread")]
async fn crawl_produces_one_page_per_reachable_path() {
    let fetcher = FakeFetcher::new(vec![
        (
            "/",
            Fixture::Page(
                r##"<html><body>кошка
                <a href="/a">a</a> <a href="/b">b</a> <a href="/a">dup</a>
                <a href="/logo.png">img</a> <a href="https://other.org/x">ext</a>
                <a href="#top">anchor</a></body></html>"##,
            ),
        ),
        (
            "/a",
            Fixture::Page(r#"<html><body>собака <a href="/c">c</a> <a href="/">home</a></body></html>"#),
        ),
        (
            "/b",
            Fixture::Page(r#"<html><body>кошка собака <a href="/c">c</a></body></html>"#),
        ),
        ("/c", Fixture::Page("<html><body>лесная кошка</body></html>")),
    ]);
    let (storage, service) = service_with(fetcher, test_config(2));

    service.clone().start_crawl().unwrap();
    wait_idle(&service).await;

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    let mut paths: Vec<String> = storage
        .pages_for_site(site.id)
        .into_iter()
        .map(|p| p.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/", "/a", "/b", "/c"]);
    assert!(storage.lemma_count(site.id) > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn depth_bound_cuts_off_deep_links() {
    let fetcher = FakeFetcher::new(vec![
        ("/", Fixture::Page(r#"<a href="/1">1</a>"#)),
        ("/1", Fixture::Page(r#"<a href="/2">2</a>"#)),
        ("/2", Fixture::Page(r#"<a href="/3">3</a>"#)),
        ("/3", Fixture::Page(r#"<a href="/4">4</a>"#)),
    ]);
    let (storage, service) = service_with(fetcher, test_config(2));

    service.clone().start_crawl().unwrap();
    wait_idle(&service).await;

    let site = storage.find_site_by_url("https://example.com").unwrap();
    let mut paths: Vec<String> = storage
        .pages_for_site(site.id)
        .into_iter()
        .map(|p| p.path)
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["/", "/1", "/2"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_root_fails_the_site_only() {
    let fetcher = FakeFetcher::new(vec![("/", Fixture::Unreachable)]);
    let (storage, service) = service_with(fetcher, test_config(2));

    service.clone().start_crawl().unwrap();
    wait_idle(&service).await;

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert!(site.last_error.unwrap().contains("Could not connect"));
    assert_eq!(storage.page_count(site.id), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_child_is_recorded_and_siblings_continue() {
    let fetcher = FakeFetcher::new(vec![
        (
            "/",
            Fixture::Page(r#"<a href="/broken">x</a> <a href="/ok">y</a>"#),
        ),
        ("/broken", Fixture::Unreachable),
        ("/ok", Fixture::Page("<html><body>кошка</body></html>")),
    ]);
    let (storage, service) = service_with(fetcher, test_config(2));

    service.clone().start_crawl().unwrap();
    wait_idle(&service).await;

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    let broken = storage.find_page(site.id, "/broken").unwrap();
    assert_eq!(broken.code, 0);
    assert!(broken.content.contains("Failed to load page content"));
    assert!(storage.find_page(site.id, "/ok").is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn second_start_is_rejected_while_running() {
    let fetcher = FakeFetcher::new(vec![("/", Fixture::Page("<html></html>"))])
        .with_delay(Duration::from_millis(200));
    let (_storage, service) = service_with(fetcher, test_config(0));

    service.clone().start_crawl().unwrap();
    assert!(matches!(
        service.clone().start_crawl(),
        Err(CrawlError::AlreadyRunning)
    ));
    wait_idle(&service).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_fails_every_site_and_halts_page_writes() {
    let fetcher = FakeFetcher::new(vec![
        (
            "/",
            Fixture::Page(
                r#"<a href="/1">1</a> <a href="/2">2</a> <a href="/3">3</a>
                   <a href="/4">4</a> <a href="/5">5</a>"#,
            ),
        ),
        ("/1", Fixture::Page("<html></html>")),
        ("/2", Fixture::Page("<html></html>")),
        ("/3", Fixture::Page("<html></html>")),
        ("/4", Fixture::Page("<html></html>")),
        ("/5", Fixture::Page("<html></html>")),
    ])
    .with_delay(Duration::from_millis(60));
    let mut config = test_config(2);
    config.crawl.workers = 1;
    let (storage, service) = service_with(fetcher, config);

    service.clone().start_crawl().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    service.stop_crawl().await.unwrap();
    assert!(!service.is_crawling());

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some(STOP_MESSAGE));

    let pages_after_stop = storage.page_count(site.id);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(storage.page_count(site.id), pages_after_stop);
}

#[tokio::test(flavor = "multi_thread")]
async fn immediate_stop_cancels_a_fresh_session() {
    let fetcher = FakeFetcher::new(vec![(
        "/",
        Fixture::Page("<html><body>кошка</body></html>"),
    )])
    .with_delay(Duration::from_millis(100));
    let (storage, service) = service_with(fetcher, test_config(2));

    service.clone().start_crawl().unwrap();
    service.stop_crawl().await.unwrap();
    assert!(!service.is_crawling());

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some(STOP_MESSAGE));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(storage.page_count(site.id), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_without_session_is_rejected() {
    let fetcher = FakeFetcher::new(vec![]);
    let (_storage, service) = service_with(fetcher, test_config(2));
    assert!(matches!(
        service.stop_crawl().await,
        Err(CrawlError::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn reindex_rejects_urls_outside_configured_sites() {
    let fetcher = FakeFetcher::new(vec![]);
    let (storage, service) = service_with(fetcher, test_config(2));

    let result = service.reindex_page("https://stranger.org/page").await;
    assert!(matches!(result, Err(CrawlError::Configuration(_))));
    assert!(storage.all_sites().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reindex_stores_and_indexes_a_single_page() {
    let fetcher = FakeFetcher::new(vec![(
        "/about",
        Fixture::Page("<html><title>О нас</title><body>кошка и собака</body></html>"),
    )]);
    let (storage, service) = service_with(fetcher, test_config(2));

    service
        .reindex_page("https://example.com/about")
        .await
        .unwrap();

    let site = storage.find_site_by_url("https://example.com").unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    let page = storage.find_page(site.id, "/about").unwrap();
    assert_eq!(page.code, 200);
    assert!(storage.lemma_count(site.id) >= 2);

    // reindexing the unchanged page keeps frequencies and ranks stable
    let lemmas_before = storage.lemma_count(site.id);
    service
        .reindex_page("https://example.com/about")
        .await
        .unwrap();
    assert_eq!(storage.lemma_count(site.id), lemmas_before);
    assert_eq!(storage.page_count(site.id), 1);
}
