use std::time::Duration;

use async_trait::async_trait;
use reqwest::{redirect, Client};
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("could not connect to {url}: {message}")]
    Connect { url: String, message: String },
}

/// Result of fetching one URL: status code, raw body, and the outbound
/// links resolved to absolute urls.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub code: u16,
    pub body: String,
    pub links: Vec<Url>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError>;
}

/// Production fetcher over reqwest with a fixed timeout and bounded
/// redirect chain.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .redirect(redirect::Policy::limited(5))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let connect_err = |e: reqwest::Error| FetchError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url.clone()).send().await.map_err(connect_err)?;
        let code = response.status().as_u16();
        let body = response.text().await.map_err(connect_err)?;
        let links = extract_links(url, &body);
        Ok(FetchedPage { code, body, links })
    }
}

/// Outbound links of an HTML document, resolved against `base`.
pub fn extract_links(base: &Url, html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href], link[href]").expect("valid selector");
    let mut links = Vec::new();
    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            if let Ok(url) = Url::parse(href).or_else(|_| base.join(href)) {
                if url.scheme().starts_with("http") {
                    links.push(url);
                }
            }
        }
    }
    links
}

/// The `<title>` text of a stored HTML document.
pub fn extract_title(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").expect("valid selector");
    document
        .select(&selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}
