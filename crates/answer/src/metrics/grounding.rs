//! Supported terms, numeric fidelity and per-sentence precision

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use parley_core::{Span, TermSupport};

use super::text::{
    informative_term_spans, informative_terms, split_sentences, tokenize,
};

/// Terms of the answer found in at least one cited passage, with spans
/// for highlighting, plus the IDF-weighted supported ratio.
pub fn supported_terms(
    answer: &str,
    cited_terms: &[Vec<String>],
    idf: &HashMap<String, f32>,
) -> (Vec<TermSupport>, f32) {
    let context_set: HashSet<&str> = cited_terms
        .iter()
        .flat_map(|terms| terms.iter().map(String::as_str))
        .collect();

    let mut supported_mass = 0.0f32;
    let mut total_mass = 0.0f32;
    let mut spans_by_term: BTreeMap<String, Vec<Span>> = BTreeMap::new();

    for (term, start, end) in informative_term_spans(answer) {
        let weight = idf.get(&term).copied().unwrap_or(1.0);
        total_mass += weight;
        if context_set.contains(term.as_str()) {
            supported_mass += weight;
            spans_by_term
                .entry(term)
                .or_default()
                .push(Span { start, end });
        }
    }

    let supported = spans_by_term
        .into_iter()
        .map(|(term, spans)| TermSupport {
            idf: idf.get(&term).copied().unwrap_or(1.0),
            term,
            spans,
        })
        .collect();

    let ratio = if total_mass > 0.0 {
        (supported_mass / total_mass).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (supported, ratio)
}

static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\d+(\.\d+)?$").expect("money regex"));
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?%$").expect("percent regex"));
static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("number regex"));

/// Normalized numeric facts of a text: money, percents, plain numbers.
pub fn answer_numbers(text: &str) -> HashSet<(&'static str, String)> {
    tokenize(text)
        .into_iter()
        .filter_map(|token| {
            if MONEY_RE.is_match(&token) {
                Some(("money", token))
            } else if PERCENT_RE.is_match(&token) {
                Some(("percent", token))
            } else if NUMBER_RE.is_match(&token) {
                Some(("number", token))
            } else {
                None
            }
        })
        .collect()
}

/// Numbers in the answer with no verbatim (after normalization) match in
/// any cited passage, formatted `kind:value`.
pub fn unsupported_numbers(answer: &str, cited: &[&str]) -> Vec<String> {
    let in_answer = answer_numbers(answer);
    if in_answer.is_empty() {
        return Vec::new();
    }
    let mut in_context: HashSet<(&'static str, String)> = HashSet::new();
    for text in cited {
        in_context.extend(answer_numbers(text));
    }
    let mut missing: Vec<String> = in_answer
        .into_iter()
        .filter(|fact| !in_context.contains(fact))
        .map(|(kind, value)| format!("{kind}:{value}"))
        .collect();
    missing.sort();
    missing
}

/// Per sentence: fraction of IDF mass of content tokens that is
/// supported by the cited passages.
pub fn per_sentence_precision(
    answer: &str,
    cited_terms: &[Vec<String>],
    idf: &HashMap<String, f32>,
) -> Vec<f32> {
    let context_set: HashSet<&str> = cited_terms
        .iter()
        .flat_map(|terms| terms.iter().map(String::as_str))
        .collect();

    split_sentences(answer)
        .into_iter()
        .map(|sentence| {
            let mut supported = 0.0f32;
            let mut total = 0.0f32;
            for term in informative_terms(sentence) {
                let weight = idf.get(&term).copied().unwrap_or(1.0);
                total += weight;
                if context_set.contains(term.as_str()) {
                    supported += weight;
                }
            }
            if total > 0.0 {
                supported / total
            } else {
                0.0
            }
        })
        .collect()
}
