use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{LemmaId, PageId, RecordId, SiteId};

/// Lifecycle of a site within one crawl. The only legal transitions are
/// Indexing -> Indexed and Indexing -> Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Site {
    pub id: SiteId,
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub status_time: OffsetDateTime,
    pub last_error: Option<String>,
}

/// One fetched document. `path` is site-relative and unique within the site.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub path: String,
    pub code: u16,
    pub content: String,
}

/// A normalized index key for one site. `frequency` counts the distinct
/// pages of the site containing the lemma, not raw token occurrences.
#[derive(Debug, Clone)]
pub struct Lemma {
    pub id: LemmaId,
    pub site_id: SiteId,
    pub text: String,
    pub frequency: u32,
}

/// Inverted-index entry, unique per (page, lemma). `rank` is the term
/// weight of the lemma on that page and is overwritten on re-crawl.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub id: RecordId,
    pub page_id: PageId,
    pub lemma_id: LemmaId,
    pub rank: f32,
}
