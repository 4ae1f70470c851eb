use anyhow::bail;
use std::sync::Arc;

use sitesearch_core::lemma::{Lemmatizer, MorphAnalyzer};

#[test]
fn emitted_lemmas_are_longer_than_three_chars() {
    let lemmatizer = Lemmatizer::new();
    let counts = lemmatizer.collect_lemmas("лес дом кот рыжая кошка гуляла");
    for lemma in counts.keys() {
        assert!(lemma.chars().count() > 3, "short lemma emitted: {lemma}");
    }
}

#[test]
fn function_words_yield_no_lemmas() {
    let lemmatizer = Lemmatizer::new();
    for word in ["и", "в", "не", "чтобы", "однако", "который"] {
        assert!(
            lemmatizer.token_lemmas(word).is_empty(),
            "function word produced a lemma: {word}"
        );
    }
}

#[test]
fn non_alphabet_tokens_are_discarded() {
    let lemmatizer = Lemmatizer::new();
    assert!(lemmatizer.token_lemmas("hello").is_empty());
    assert!(lemmatizer.token_lemmas("1234").is_empty());
    assert!(lemmatizer.collect_lemmas("<p>hello world 42</p>").is_empty());
}

#[test]
fn inflected_forms_share_one_lemma() {
    let lemmatizer = Lemmatizer::new();
    let counts = lemmatizer.collect_lemmas("кошка кошки кошку");
    assert_eq!(counts.len(), 1);
    assert_eq!(counts.values().copied().sum::<u32>(), 3);
}

#[test]
fn html_markup_does_not_reach_the_index() {
    let lemmatizer = Lemmatizer::new();
    let counts =
        lemmatizer.collect_lemmas("<html><title>собака</title><body>собака лает</body></html>");
    let query = lemmatizer.lemmatize_query("собака");
    assert_eq!(counts.get(&query[0]), Some(&2));
}

#[test]
fn query_lemmas_keep_order_and_duplicates() {
    let lemmatizer = Lemmatizer::new();
    let lemmas = lemmatizer.lemmatize_query("кошка собака кошка");
    assert_eq!(lemmas.len(), 3);
    assert_eq!(lemmas[0], lemmas[2]);
    assert_ne!(lemmas[0], lemmas[1]);
}

#[test]
fn locate_lemma_reports_token_byte_offsets() {
    let lemmatizer = Lemmatizer::new();
    let text = "Кошка спит. Рядом другая кошка.";
    let lemma = &lemmatizer.lemmatize_query("кошка")[0];
    let offsets = lemmatizer.locate_lemma(text, lemma);
    assert_eq!(offsets.len(), 2);
    assert_eq!(offsets[0], 0);
    assert!(text[offsets[1]..].to_lowercase().starts_with("кошка"));
}

#[test]
fn locate_lemmas_merges_and_sorts() {
    let lemmatizer = Lemmatizer::new();
    let text = "собака увидела кошку";
    let lemmas = lemmatizer.lemmatize_query("кошка собака");
    let offsets = lemmatizer.locate_lemmas(text, &lemmas);
    assert_eq!(offsets.len(), 2);
    assert!(offsets[0] < offsets[1]);
}

struct FailingAnalyzer;

impl MorphAnalyzer for FailingAnalyzer {
    fn normal_forms(&self, word: &str) -> anyhow::Result<Vec<String>> {
        bail!("no morphology for {word}")
    }

    fn is_function_word(&self, _word: &str) -> bool {
        false
    }
}

#[test]
fn analyzer_failures_are_swallowed_per_token() {
    let lemmatizer = Lemmatizer::with_analyzer(Arc::new(FailingAnalyzer));
    assert!(lemmatizer.collect_lemmas("кошка собака").is_empty());
    assert!(lemmatizer.lemmatize_query("кошка").is_empty());
}
