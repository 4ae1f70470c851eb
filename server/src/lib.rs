use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tower_http::cors::{Any, CorsLayer};

use sitesearch_core::storage::Storage;
use sitesearch_crawler::session::{CrawlError, CrawlService};

pub mod search;

use search::{QueryError, SearchService};

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub crawl: Arc<CrawlService>,
    pub storage: Arc<dyn Storage>,
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/search", get(search_handler))
        .route("/api/startIndexing", get(start_indexing))
        .route("/api/stopIndexing", get(stop_indexing))
        .route("/api/indexPage", post(index_page))
        .route("/api/statistics", get(statistics))
        .with_state(state)
        .layer(cors)
}

#[derive(Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    query: String,
    #[serde(default)]
    site: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
struct ErrorBody {
    result: bool,
    error: String,
}

fn ok_body() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "result": true }))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            result: false,
            error: message.into(),
        }),
    )
        .into_response()
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state
        .search
        .search(&params.query, &params.site, params.offset, params.limit)
    {
        Ok(outcome) => Json(serde_json::json!({
            "result": true,
            "count": outcome.count,
            "data": outcome.data,
        }))
        .into_response(),
        Err(err @ QueryError::NotFound) => error_response(StatusCode::NOT_FOUND, err.to_string()),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn start_indexing(State(state): State<AppState>) -> Response {
    match Arc::clone(&state.crawl).start_crawl() {
        Ok(()) => ok_body().into_response(),
        Err(err @ CrawlError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, err.to_string())
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

async fn stop_indexing(State(state): State<AppState>) -> Response {
    match state.crawl.stop_crawl().await {
        Ok(()) => ok_body().into_response(),
        Err(err @ CrawlError::NotRunning) => error_response(StatusCode::CONFLICT, err.to_string()),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

#[derive(Deserialize)]
struct IndexPageParams {
    url: String,
}

async fn index_page(
    State(state): State<AppState>,
    Query(params): Query<IndexPageParams>,
) -> Response {
    if !state.crawl.is_configured(&params.url) {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("url is outside the configured site list: {}", params.url),
        );
    }
    let crawl = Arc::clone(&state.crawl);
    tokio::spawn(async move {
        if let Err(err) = crawl.reindex_page(&params.url).await {
            tracing::error!(%err, "single page reindex failed");
        }
    });
    (StatusCode::ACCEPTED, ok_body()).into_response()
}

#[derive(Serialize)]
struct SiteStatistics {
    url: String,
    name: String,
    status: sitesearch_core::model::SiteStatus,
    #[serde(rename = "statusTime")]
    status_time: String,
    error: Option<String>,
    pages: usize,
    lemmas: usize,
}

async fn statistics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sites = state.storage.all_sites();
    let detailed: Vec<SiteStatistics> = sites
        .iter()
        .map(|site| SiteStatistics {
            url: site.url.clone(),
            name: site.name.clone(),
            status: site.status,
            status_time: site
                .status_time
                .format(&Rfc3339)
                .unwrap_or_default(),
            error: site.last_error.clone(),
            pages: state.storage.page_count(site.id),
            lemmas: state.storage.lemma_count(site.id),
        })
        .collect();
    let total_pages: usize = detailed.iter().map(|s| s.pages).sum();
    let total_lemmas: usize = detailed.iter().map(|s| s.lemmas).sum();
    Json(serde_json::json!({
        "result": true,
        "statistics": {
            "total": {
                "sites": sites.len(),
                "pages": total_pages,
                "lemmas": total_lemmas,
                "indexing": state.crawl.is_crawling(),
            },
            "detailed": detailed,
        }
    }))
}
