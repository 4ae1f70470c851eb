use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use sitesearch_core::model::Page;
use sitesearch_core::storage::Storage;
use sitesearch_core::{PageId, SiteId};

/// Incremental inverted-index maintainer.
///
/// The find-then-create sequence on Lemma and IndexRecord is not atomic at
/// the storage level, so all index mutation is serialized through one
/// writer lock shared by every crawl branch.
pub struct Indexer {
    storage: Arc<dyn Storage>,
    write_lock: Mutex<()>,
}

impl Indexer {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    /// Apply a page's lemma -> occurrence-count map to the index.
    ///
    /// A lemma unseen on the site is created with frequency 1. A known
    /// lemma gains one frequency point the first time this page carries
    /// it; on re-crawl of an already-indexed page only the record's rank
    /// is overwritten.
    pub fn index_page(&self, site_id: SiteId, page: &Page, lemma_counts: &HashMap<String, u32>) {
        let _guard = self.write_lock.lock();
        for (text, count) in lemma_counts {
            let rank = *count as f32;
            match self.storage.find_lemma(site_id, text) {
                None => {
                    let lemma = self.storage.insert_lemma(site_id, text);
                    self.storage.insert_record(page.id, lemma.id, rank);
                }
                Some(mut lemma) => match self.storage.find_record(lemma.id, page.id) {
                    None => {
                        lemma.frequency += 1;
                        self.storage.update_lemma(&lemma);
                        self.storage.insert_record(page.id, lemma.id, rank);
                    }
                    Some(mut record) => {
                        record.rank = rank;
                        self.storage.update_record(&record);
                    }
                },
            }
        }
        tracing::debug!(page = %page.path, lemmas = lemma_counts.len(), "page indexed");
    }

    /// Remove a page together with its records; lemmas left without
    /// records on the site are pruned by the storage cascade.
    pub fn remove_page(&self, page_id: PageId) {
        let _guard = self.write_lock.lock();
        self.storage.delete_page(page_id);
    }
}
