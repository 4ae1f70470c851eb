use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One crawl target from the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub search: SearchSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    /// Maximum link depth from the site root.
    pub max_depth: u32,
    /// Upper bound on concurrent fetches per session.
    pub workers: usize,
    /// Politeness delay before every fetch.
    pub politeness_delay_ms: u64,
    pub fetch_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_depth: 4,
            workers: 4,
            politeness_delay_ms: 400,
            fetch_timeout_secs: 10,
            user_agent: "sitesearch-bot/0.1 (+https://example.com/bot)".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Cap on the accumulated snippet length, in bytes.
    pub max_snippet_len: usize,
    /// How far past the last matched word a fragment window extends.
    pub fragment_len: usize,
    /// Gap threshold for merging adjacent matches into one fragment.
    /// `None` falls back to the query's word count.
    pub merge_distance: Option<usize>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            max_snippet_len: 400,
            fragment_len: 150,
            merge_distance: None,
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config {}", path.as_ref().display()))?;
        let config: AppConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.as_ref().display()))?;
        Ok(config)
    }

    /// The configured site whose url prefixes `url`, if any.
    pub fn site_for_url(&self, url: &str) -> Option<&SiteConfig> {
        self.sites
            .iter()
            .find(|site| url.starts_with(site.url.trim_end_matches('/')))
    }
}
