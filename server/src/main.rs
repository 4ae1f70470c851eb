use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

use sitesearch_core::config::AppConfig;
use sitesearch_core::lemma::Lemmatizer;
use sitesearch_core::storage::{MemoryStorage, Storage};
use sitesearch_crawler::fetch::HttpFetcher;
use sitesearch_crawler::session::CrawlService;
use sitesearch_indexer::Indexer;
use sitesearch_server::search::SearchService;
use sitesearch_server::{build_app, AppState};

#[derive(Parser)]
struct Args {
    /// Path to the JSON config with the site list
    #[arg(long, default_value = "./sites.json")]
    config: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = AppConfig::load(&args.config)?;

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let lemmatizer = Arc::new(Lemmatizer::new());
    let indexer = Arc::new(Indexer::new(Arc::clone(&storage)));
    let fetcher = Arc::new(HttpFetcher::new(
        &config.crawl.user_agent,
        Duration::from_secs(config.crawl.fetch_timeout_secs),
    )?);
    let search = Arc::new(SearchService::new(
        Arc::clone(&storage),
        Arc::clone(&lemmatizer),
        config.search.clone(),
    ));
    let crawl = Arc::new(CrawlService::new(
        Arc::clone(&storage),
        fetcher,
        indexer,
        lemmatizer,
        config,
    ));

    let app: Router = build_app(AppState {
        search,
        crawl,
        storage,
    });
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
