use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use time::OffsetDateTime;

use crate::model::{IndexRecord, Lemma, Page, Site, SiteStatus};
use crate::{LemmaId, PageId, RecordId, SiteId};

/// Persistence contract consumed by the crawler, indexer and query engine.
/// Every method is one atomic operation; `delete_page` and `delete_site`
/// run their whole cascade inside a single exclusive critical section.
pub trait Storage: Send + Sync {
    // sites
    fn insert_site(&self, url: &str, name: &str) -> Site;
    fn find_site_by_url(&self, url: &str) -> Option<Site>;
    fn site(&self, id: SiteId) -> Option<Site>;
    fn all_sites(&self) -> Vec<Site>;
    fn set_site_status(&self, id: SiteId, status: SiteStatus, last_error: Option<String>);
    fn delete_site(&self, id: SiteId);

    // pages
    /// Insert the page, or overwrite code and content in place when the
    /// (site, path) pair already exists.
    fn save_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Page;
    fn find_page(&self, site_id: SiteId, path: &str) -> Option<Page>;
    fn pages_for_site(&self, site_id: SiteId) -> Vec<Page>;
    fn page_count(&self, site_id: SiteId) -> usize;
    /// Cascade of the data-model contract: delete the page's records, then
    /// every lemma of the site left with zero records; surviving lemmas
    /// lose one frequency point per vanished page.
    fn delete_page(&self, id: PageId);

    // lemmas
    fn find_lemma(&self, site_id: SiteId, text: &str) -> Option<Lemma>;
    /// Create the lemma with frequency 1. (site, text) uniqueness is the
    /// caller's responsibility via `find_lemma`.
    fn insert_lemma(&self, site_id: SiteId, text: &str) -> Lemma;
    fn update_lemma(&self, lemma: &Lemma);
    /// Lemmas of the given sites whose text matches one of `texts`
    /// case-insensitively, sorted ascending by frequency.
    fn find_lemmas(&self, site_ids: &[SiteId], texts: &[String]) -> Vec<Lemma>;
    fn lemma_count(&self, site_id: SiteId) -> usize;

    // index records
    fn find_record(&self, lemma_id: LemmaId, page_id: PageId) -> Option<IndexRecord>;
    fn insert_record(&self, page_id: PageId, lemma_id: LemmaId, rank: f32) -> IndexRecord;
    fn update_record(&self, record: &IndexRecord);
    /// Pages whose records cover at least `required` distinct ids out of
    /// `lemma_ids`.
    fn pages_covering(&self, lemma_ids: &[LemmaId], required: usize) -> Vec<Page>;
    fn records_for(&self, lemma_ids: &[LemmaId], page_ids: &[PageId]) -> Vec<IndexRecord>;
}

#[derive(Default)]
struct Tables {
    sites: HashMap<SiteId, Site>,
    pages: HashMap<PageId, Page>,
    lemmas: HashMap<LemmaId, Lemma>,
    records: HashMap<RecordId, IndexRecord>,
    next_site: SiteId,
    next_page: PageId,
    next_lemma: LemmaId,
    next_record: RecordId,
}

impl Tables {
    fn delete_page_cascade(&mut self, page_id: PageId) {
        if self.pages.remove(&page_id).is_none() {
            return;
        }
        let mut affected: HashSet<LemmaId> = HashSet::new();
        self.records.retain(|_, record| {
            if record.page_id == page_id {
                affected.insert(record.lemma_id);
                false
            } else {
                true
            }
        });
        for lemma_id in affected {
            let still_used = self.records.values().any(|r| r.lemma_id == lemma_id);
            if still_used {
                if let Some(lemma) = self.lemmas.get_mut(&lemma_id) {
                    lemma.frequency = lemma.frequency.saturating_sub(1);
                }
            } else {
                self.lemmas.remove(&lemma_id);
            }
        }
    }
}

/// In-memory implementation backing tests and the default server wiring.
#[derive(Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn insert_site(&self, url: &str, name: &str) -> Site {
        let mut t = self.tables.write();
        t.next_site += 1;
        let site = Site {
            id: t.next_site,
            url: url.to_string(),
            name: name.to_string(),
            status: SiteStatus::Indexing,
            status_time: OffsetDateTime::now_utc(),
            last_error: None,
        };
        t.sites.insert(site.id, site.clone());
        site
    }

    fn find_site_by_url(&self, url: &str) -> Option<Site> {
        let t = self.tables.read();
        t.sites
            .values()
            .find(|site| site.url.trim_end_matches('/') == url.trim_end_matches('/'))
            .cloned()
    }

    fn site(&self, id: SiteId) -> Option<Site> {
        self.tables.read().sites.get(&id).cloned()
    }

    fn all_sites(&self) -> Vec<Site> {
        let mut sites: Vec<Site> = self.tables.read().sites.values().cloned().collect();
        sites.sort_by_key(|s| s.id);
        sites
    }

    fn set_site_status(&self, id: SiteId, status: SiteStatus, last_error: Option<String>) {
        let mut t = self.tables.write();
        if let Some(site) = t.sites.get_mut(&id) {
            site.status = status;
            site.status_time = OffsetDateTime::now_utc();
            site.last_error = last_error;
        }
    }

    fn delete_site(&self, id: SiteId) {
        let mut t = self.tables.write();
        if t.sites.remove(&id).is_none() {
            return;
        }
        let page_ids: Vec<PageId> = t
            .pages
            .values()
            .filter(|p| p.site_id == id)
            .map(|p| p.id)
            .collect();
        for page_id in page_ids {
            t.delete_page_cascade(page_id);
        }
        t.lemmas.retain(|_, lemma| lemma.site_id != id);
    }

    fn save_page(&self, site_id: SiteId, path: &str, code: u16, content: &str) -> Page {
        let mut t = self.tables.write();
        if let Some(existing) = t
            .pages
            .values_mut()
            .find(|p| p.site_id == site_id && p.path == path)
        {
            existing.code = code;
            existing.content = content.to_string();
            return existing.clone();
        }
        t.next_page += 1;
        let page = Page {
            id: t.next_page,
            site_id,
            path: path.to_string(),
            code,
            content: content.to_string(),
        };
        t.pages.insert(page.id, page.clone());
        page
    }

    fn find_page(&self, site_id: SiteId, path: &str) -> Option<Page> {
        let t = self.tables.read();
        t.pages
            .values()
            .find(|p| p.site_id == site_id && p.path == path)
            .cloned()
    }

    fn pages_for_site(&self, site_id: SiteId) -> Vec<Page> {
        let mut pages: Vec<Page> = self
            .tables
            .read()
            .pages
            .values()
            .filter(|p| p.site_id == site_id)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.id);
        pages
    }

    fn page_count(&self, site_id: SiteId) -> usize {
        self.tables
            .read()
            .pages
            .values()
            .filter(|p| p.site_id == site_id)
            .count()
    }

    fn delete_page(&self, id: PageId) {
        self.tables.write().delete_page_cascade(id);
    }

    fn find_lemma(&self, site_id: SiteId, text: &str) -> Option<Lemma> {
        let needle = text.to_lowercase();
        let t = self.tables.read();
        t.lemmas
            .values()
            .find(|l| l.site_id == site_id && l.text.to_lowercase() == needle)
            .cloned()
    }

    fn insert_lemma(&self, site_id: SiteId, text: &str) -> Lemma {
        let mut t = self.tables.write();
        t.next_lemma += 1;
        let lemma = Lemma {
            id: t.next_lemma,
            site_id,
            text: text.to_string(),
            frequency: 1,
        };
        t.lemmas.insert(lemma.id, lemma.clone());
        lemma
    }

    fn update_lemma(&self, lemma: &Lemma) {
        let mut t = self.tables.write();
        t.lemmas.insert(lemma.id, lemma.clone());
    }

    fn find_lemmas(&self, site_ids: &[SiteId], texts: &[String]) -> Vec<Lemma> {
        let wanted: HashSet<String> = texts.iter().map(|t| t.to_lowercase()).collect();
        let t = self.tables.read();
        let mut lemmas: Vec<Lemma> = t
            .lemmas
            .values()
            .filter(|l| site_ids.contains(&l.site_id) && wanted.contains(&l.text.to_lowercase()))
            .cloned()
            .collect();
        lemmas.sort_by_key(|l| l.frequency);
        lemmas
    }

    fn lemma_count(&self, site_id: SiteId) -> usize {
        self.tables
            .read()
            .lemmas
            .values()
            .filter(|l| l.site_id == site_id)
            .count()
    }

    fn find_record(&self, lemma_id: LemmaId, page_id: PageId) -> Option<IndexRecord> {
        let t = self.tables.read();
        t.records
            .values()
            .find(|r| r.lemma_id == lemma_id && r.page_id == page_id)
            .cloned()
    }

    fn insert_record(&self, page_id: PageId, lemma_id: LemmaId, rank: f32) -> IndexRecord {
        let mut t = self.tables.write();
        t.next_record += 1;
        let record = IndexRecord {
            id: t.next_record,
            page_id,
            lemma_id,
            rank,
        };
        t.records.insert(record.id, record.clone());
        record
    }

    fn update_record(&self, record: &IndexRecord) {
        let mut t = self.tables.write();
        t.records.insert(record.id, record.clone());
    }

    fn pages_covering(&self, lemma_ids: &[LemmaId], required: usize) -> Vec<Page> {
        let wanted: HashSet<LemmaId> = lemma_ids.iter().copied().collect();
        let t = self.tables.read();
        let mut covered: HashMap<PageId, HashSet<LemmaId>> = HashMap::new();
        for record in t.records.values() {
            if wanted.contains(&record.lemma_id) {
                covered.entry(record.page_id).or_default().insert(record.lemma_id);
            }
        }
        let mut pages: Vec<Page> = covered
            .into_iter()
            .filter(|(_, lemmas)| lemmas.len() >= required)
            .filter_map(|(page_id, _)| t.pages.get(&page_id).cloned())
            .collect();
        pages.sort_by_key(|p| p.id);
        pages
    }

    fn records_for(&self, lemma_ids: &[LemmaId], page_ids: &[PageId]) -> Vec<IndexRecord> {
        let lemmas: HashSet<LemmaId> = lemma_ids.iter().copied().collect();
        let pages: HashSet<PageId> = page_ids.iter().copied().collect();
        let t = self.tables.read();
        let mut records: Vec<IndexRecord> = t
            .records
            .values()
            .filter(|r| lemmas.contains(&r.lemma_id) && pages.contains(&r.page_id))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}
