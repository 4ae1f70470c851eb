use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use sitesearch_core::config::SearchSettings;
use sitesearch_core::lemma::{is_token_boundary, Lemmatizer};
use sitesearch_core::model::Page;
use sitesearch_core::storage::Storage;
use sitesearch_core::{PageId, SiteId};
use sitesearch_crawler::fetch::extract_title;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Задан пустой поисковый запрос")]
    EmptyQuery,
    #[error("Указанный сайт не найден: {0}")]
    UnknownSite(String),
    #[error("Ничего не найдено по запросу")]
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub site: String,
    #[serde(rename = "siteName")]
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f32,
}

#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    /// Size of the full ranked list, before pagination.
    pub count: usize,
    pub data: Vec<SearchResult>,
}

/// Resolves search scope, ranks pages by summed term weight and renders
/// highlighted snippets.
pub struct SearchService {
    storage: Arc<dyn Storage>,
    lemmatizer: Arc<Lemmatizer>,
    settings: SearchSettings,
}

impl SearchService {
    pub fn new(
        storage: Arc<dyn Storage>,
        lemmatizer: Arc<Lemmatizer>,
        settings: SearchSettings,
    ) -> Self {
        Self {
            storage,
            lemmatizer,
            settings,
        }
    }

    pub fn search(
        &self,
        query: &str,
        site_filter: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SearchOutcome, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        tracing::info!(query, site_filter, "search request");

        let query_lemmas = self.lemmatizer.lemmatize_query(query);
        let word_count = query.split_whitespace().count();
        let merge_distance = self.settings.merge_distance.unwrap_or(word_count).max(1);

        let scope: Vec<SiteId> = if site_filter.is_empty() {
            self.storage.all_sites().iter().map(|s| s.id).collect()
        } else {
            match self.storage.find_site_by_url(site_filter) {
                Some(site) => vec![site.id],
                None => return Err(QueryError::UnknownSite(site_filter.to_string())),
            }
        };

        // rarest first; a selectivity ordering, not a ranking step
        let matched = self.storage.find_lemmas(&scope, &query_lemmas);
        if matched.is_empty() {
            return Err(QueryError::NotFound);
        }

        let required: usize = query_lemmas
            .iter()
            .collect::<HashSet<_>>()
            .len();
        let matched_texts: HashSet<String> =
            matched.iter().map(|l| l.text.to_lowercase()).collect();
        if matched_texts.len() < required {
            // some query lemma exists nowhere in scope
            return Ok(SearchOutcome {
                count: 0,
                data: Vec::new(),
            });
        }

        let lemma_ids: Vec<_> = matched.iter().map(|l| l.id).collect();
        let pages = self.storage.pages_covering(&lemma_ids, required);
        if pages.is_empty() {
            return Err(QueryError::NotFound);
        }
        let page_ids: Vec<PageId> = pages.iter().map(|p| p.id).collect();
        let records = self.storage.records_for(&lemma_ids, &page_ids);

        let mut rank_sums: HashMap<PageId, f32> = HashMap::new();
        for record in &records {
            *rank_sums.entry(record.page_id).or_insert(0.0) += record.rank;
        }
        let max_sum = rank_sums.values().copied().fold(0.0_f32, f32::max);

        let mut ranked: Vec<(Page, f32)> = pages
            .into_iter()
            .map(|page| {
                let relevance = rank_sums.get(&page.id).copied().unwrap_or(0.0) / max_sum;
                (page, relevance)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        let total = ranked.len();
        let start = offset.min(total);
        let end = offset.saturating_add(limit).min(total);
        let data = ranked[start..end]
            .iter()
            .map(|(page, relevance)| {
                self.result_row(page, *relevance, &query_lemmas, merge_distance)
            })
            .collect();

        Ok(SearchOutcome { count: total, data })
    }

    fn result_row(
        &self,
        page: &Page,
        relevance: f32,
        query_lemmas: &[String],
        merge_distance: usize,
    ) -> SearchResult {
        let (site_url, site_name) = self
            .storage
            .site(page.site_id)
            .map(|s| (s.url, s.name))
            .unwrap_or_default();
        let title = extract_title(&page.content);
        let clear_content = self.lemmatizer.strip_html_tags(&page.content);
        let snippet = self.build_snippet(&clear_content, query_lemmas, merge_distance);
        SearchResult {
            site: site_url,
            site_name,
            uri: page.path.clone(),
            title,
            snippet,
            relevance,
        }
    }

    /// Merge nearby matches into fragments, highlight the matched words,
    /// and concatenate the longest fragments up to the length cap.
    fn build_snippet(&self, content: &str, lemmas: &[String], merge_distance: usize) -> String {
        let offsets = self.lemmatizer.locate_lemmas(content, lemmas);
        let mut fragments =
            highlighted_fragments(content, &offsets, merge_distance, self.settings.fragment_len);
        fragments.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut snippet = String::new();
        for fragment in fragments {
            if snippet.len() + fragment.len() >= self.settings.max_snippet_len {
                break;
            }
            snippet.push_str(&fragment);
            snippet.push_str("... ");
        }
        snippet.trim_end().to_string()
    }
}

/// One fragment per run of matches separated by fewer than
/// `merge_distance` intervening words, expanded to the previous
/// whitespace and ~`fragment_len` bytes past the last match, with every
/// matched word wrapped in `<b>`.
fn highlighted_fragments(
    content: &str,
    offsets: &[usize],
    merge_distance: usize,
    fragment_len: usize,
) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut i = 0;
    while i < offsets.len() {
        let start = offsets[i];
        let mut end = word_end(content, start);
        let mut matches = vec![(start, end)];
        let mut j = i + 1;
        while j < offsets.len() && words_between(content, end, offsets[j]) < merge_distance {
            let next_end = word_end(content, offsets[j]);
            matches.push((offsets[j], next_end));
            end = next_end;
            j += 1;
        }
        i = j;
        fragments.push(render_fragment(content, &matches, end, fragment_len));
    }
    fragments
}

fn render_fragment(
    content: &str,
    matches: &[(usize, usize)],
    last_end: usize,
    fragment_len: usize,
) -> String {
    let first_start = matches[0].0;
    let window_start = content[..first_start]
        .rfind(' ')
        .map(|i| i + 1)
        .unwrap_or(0);
    let probe = floor_char_boundary(content, last_end + fragment_len);
    let window_end = content[probe..]
        .find(' ')
        .map(|i| probe + i)
        .or_else(|| content[last_end..].find(' ').map(|i| last_end + i))
        .unwrap_or(content.len());

    // matches are ascending and non-overlapping; wrap each one in place
    let mut text = String::new();
    let mut pos = window_start;
    for &(start, end) in matches {
        if start < pos || end > window_end {
            continue;
        }
        text.push_str(&content[pos..start]);
        text.push_str("<b>");
        text.push_str(&content[start..end]);
        text.push_str("</b>");
        pos = end;
    }
    text.push_str(&content[pos..window_end]);
    text
}

fn words_between(content: &str, from: usize, to: usize) -> usize {
    if from >= to {
        return 0;
    }
    content[from..to].split_whitespace().count()
}

fn word_end(content: &str, start: usize) -> usize {
    content[start..]
        .char_indices()
        .find(|&(_, c)| is_token_boundary(c))
        .map(|(i, _)| start + i)
        .unwrap_or(content.len())
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
