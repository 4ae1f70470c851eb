use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]*>").expect("valid regex");
    static ref WORD_RE: Regex = Regex::new(r"^[а-яё]+$").expect("valid regex");
    static ref FUNCTION_WORDS: HashSet<&'static str> = {
        // prepositions, conjunctions, interjections, pronouns, particles
        let words: &[&str] = &[
            "в","на","с","со","по","к","ко","у","о","об","обо","от","до","за","из","под","над",
            "при","про","без","для","через","между","перед","около","среди","возле","вдоль",
            "и","а","но","да","или","либо","что","чтобы","как","когда","если","хотя","пока",
            "будто","тоже","также","зато","однако","причем","потому","поэтому","ибо","словно",
            "не","ни","же","ли","бы","б","ведь","вот","вон","даже","лишь","только","уже","уж",
            "именно","почти","разве","неужели","пусть","пускай","еще","ещё",
            "я","ты","он","она","оно","мы","вы","они","мой","моя","твой","наш","ваш","свой",
            "его","ее","её","их","кто","кого","кому","чего","чему","весь","вся","все","всё",
            "всех","всем","этот","эта","это","этого","этом","этой","этих","тот","та","то",
            "того","такой","такая","такое","который","которая","которое","каждый","сам",
            "самый","себя","себе","меня","тебя","нас","вас","него","нее","неё","ему","ей",
            "нам","вам","им","ими","мне","тебе",
            "ах","ох","эх","эй","ого","увы","ура",
        ];
        words.iter().copied().collect()
    };
}

/// Characters that delimit tokens when locating lemmas in raw text.
pub fn is_token_boundary(c: char) -> bool {
    !c.is_alphanumeric()
}

/// Morphological analyzer seam: candidate normal forms plus the
/// function-word test (prepositions, conjunctions, interjections,
/// pronouns, particles).
pub trait MorphAnalyzer: Send + Sync {
    fn normal_forms(&self, word: &str) -> Result<Vec<String>>;
    fn is_function_word(&self, word: &str) -> bool;
}

/// Snowball-backed analyzer for the Russian alphabet.
pub struct StemmerAnalyzer {
    stemmer: Stemmer,
}

impl StemmerAnalyzer {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::Russian),
        }
    }
}

impl Default for StemmerAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MorphAnalyzer for StemmerAnalyzer {
    fn normal_forms(&self, word: &str) -> Result<Vec<String>> {
        Ok(vec![self.stemmer.stem(word).to_string()])
    }

    fn is_function_word(&self, word: &str) -> bool {
        FUNCTION_WORDS.contains(word)
    }
}

/// Reduces text to normalized index keys and locates them again for
/// snippet highlighting.
pub struct Lemmatizer {
    analyzer: Arc<dyn MorphAnalyzer>,
}

impl Default for Lemmatizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lemmatizer {
    pub fn new() -> Self {
        Self::with_analyzer(Arc::new(StemmerAnalyzer::new()))
    }

    pub fn with_analyzer(analyzer: Arc<dyn MorphAnalyzer>) -> Self {
        Self { analyzer }
    }

    pub fn strip_html_tags(&self, html: &str) -> String {
        TAG_RE.replace_all(html, " ").into_owned()
    }

    /// NFKC, lowercase, every character outside the target alphabet
    /// collapsed to whitespace.
    pub fn normalize(&self, text: &str) -> String {
        text.nfkc()
            .collect::<String>()
            .to_lowercase()
            .chars()
            .map(|c| if matches!(c, 'а'..='я' | 'ё') { c } else { ' ' })
            .collect()
    }

    /// Candidate lemmas for one normalized token. Empty when the token is
    /// not a word of the alphabet, is a function word, or the analyzer
    /// fails on it; normal forms of length <= 3 are dropped.
    pub fn token_lemmas(&self, word: &str) -> Vec<String> {
        if word.is_empty() || !WORD_RE.is_match(word) {
            return Vec::new();
        }
        if self.analyzer.is_function_word(word) {
            return Vec::new();
        }
        match self.analyzer.normal_forms(word) {
            Ok(forms) => forms
                .into_iter()
                .filter(|form| form.chars().count() > 3)
                .collect(),
            Err(err) => {
                tracing::debug!(word, %err, "morphological analysis failed, token skipped");
                Vec::new()
            }
        }
    }

    /// Lemma -> occurrence count over the tag-stripped, normalized text.
    pub fn collect_lemmas(&self, text: &str) -> HashMap<String, u32> {
        let cleaned = self.normalize(&self.strip_html_tags(text));
        let mut counts = HashMap::new();
        for word in cleaned.split_whitespace() {
            for lemma in self.token_lemmas(word) {
                *counts.entry(lemma).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Ordered lemma list for a raw query, duplicates retained.
    pub fn lemmatize_query(&self, query: &str) -> Vec<String> {
        let cleaned = self.normalize(query);
        let mut lemmas = Vec::new();
        for word in cleaned.split_whitespace() {
            lemmas.extend(self.token_lemmas(word));
        }
        lemmas
    }

    /// Byte offsets of the tokens in `text` whose candidate forms contain
    /// `lemma`. Tokens are delimited by punctuation and whitespace.
    pub fn locate_lemma(&self, text: &str, lemma: &str) -> Vec<usize> {
        let mut offsets = Vec::new();
        for (start, word) in split_with_offsets(text) {
            let lowered = word.to_lowercase();
            if self.token_lemmas(&lowered).iter().any(|l| l == lemma) {
                offsets.push(start);
            }
        }
        offsets
    }

    /// Merged, ascending offsets of every lemma in `lemmas`.
    pub fn locate_lemmas(&self, text: &str, lemmas: &[String]) -> Vec<usize> {
        let mut offsets: Vec<usize> = lemmas
            .iter()
            .flat_map(|lemma| self.locate_lemma(text, lemma))
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        offsets
    }
}

fn split_with_offsets(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if is_token_boundary(c) {
            if let Some(s) = start.take() {
                tokens.push((s, &text[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        tokens.push((s, &text[s..]));
    }
    tokens
}
