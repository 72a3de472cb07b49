//! Tokenization, normalization and TF-IDF primitives
//!
//! Deterministic and dependency-light: a single token regex, a cheap
//! normalizer (money, percents, plain numbers, crude suffix stripping), a
//! fixed stopword list, and add-1-smoothed IDF. Spans are byte offsets
//! into the source text.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

/// Money, percents, numbers and words, in that priority order.
static TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\d[\d,]*(?:\.\d+)?|\d[\d,]*(?:\.\d+)?%|\d[\d,]*(?:\.\d+)?|[A-Za-z][A-Za-z'-]*")
        .expect("token regex")
});

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "can", "this", "that",
        "these", "those", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us",
        "them", "my", "your", "his", "hers", "its", "our", "their", "as", "from", "about", "into",
        "over", "under", "than", "then", "so", "if", "not", "no", "yes", "also", "just", "only",
        "very", "more", "most", "such", "what", "which", "who", "when", "where", "why", "how",
    ]
    .into_iter()
    .collect()
});

/// Strip an all-zero fraction: "20000.00" -> "20000", "12.5" stays.
fn strip_zero_fraction(value: &str) -> String {
    match value.split_once('.') {
        Some((int, frac)) if frac.chars().all(|c| c == '0') => int.to_string(),
        _ => value.to_string(),
    }
}

/// Normalize a raw token: `$20,000.00` -> `$20000`, `12.5%` -> `12.5%`,
/// `1,234` -> `1234`, words lowercased with crude suffix stripping.
pub fn normalize_token(raw: &str) -> String {
    let token = raw.trim().to_lowercase();
    if let Some(rest) = token.strip_prefix('$') {
        let cleaned = strip_zero_fraction(&rest.replace(',', ""));
        return format!("${cleaned}");
    }
    if let Some(core) = token.strip_suffix('%') {
        return format!("{}%", core.replace(',', ""));
    }
    if token.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return strip_zero_fraction(&token.replace(',', ""));
    }
    let mut word = token;
    for suffix in ["'s", "s", "es", "ed", "ing"] {
        if word.ends_with(suffix) && word.len() > suffix.len() + 2 {
            word.truncate(word.len() - suffix.len());
            break;
        }
    }
    word
}

/// Normalized tokens of a text.
pub fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| normalize_token(m.as_str()))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Normalized tokens with their byte spans in the source text.
pub fn token_spans(text: &str) -> Vec<(String, usize, usize)> {
    TOKEN_RE
        .find_iter(text)
        .map(|m| (normalize_token(m.as_str()), m.start(), m.end()))
        .filter(|(t, _, _)| !t.is_empty())
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

fn is_informative(token: &str) -> bool {
    !is_stopword(token) && !token.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Content-bearing normalized tokens: stopwords and bare numbers are out
/// (numbers are handled by the numeric-fidelity check).
pub fn informative_terms(text: &str) -> Vec<String> {
    tokenize(text).into_iter().filter(|t| is_informative(t)).collect()
}

/// Informative tokens with spans, for evidence highlighting.
pub fn informative_term_spans(text: &str) -> Vec<(String, usize, usize)> {
    token_spans(text)
        .into_iter()
        .filter(|(t, _, _)| is_informative(t))
        .collect()
}

/// Add-1-smoothed IDF over a small set of term lists.
pub fn build_idf(docs: &[&[String]]) -> HashMap<String, f32> {
    let n = docs.len() as f32;
    let mut df: HashMap<&str, usize> = HashMap::new();
    for doc in docs {
        let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
        for term in unique {
            *df.entry(term).or_default() += 1;
        }
    }
    df.into_iter()
        .map(|(term, count)| {
            (
                term.to_string(),
                ((n + 1.0) / (count as f32 + 1.0)).ln() + 1.0,
            )
        })
        .collect()
}

fn tfidf_vector(terms: &[String], idf: &HashMap<String, f32>) -> BTreeMap<String, f32> {
    let mut tf: BTreeMap<String, f32> = BTreeMap::new();
    for term in terms {
        *tf.entry(term.clone()).or_default() += 1.0;
    }
    for (term, weight) in tf.iter_mut() {
        *weight *= idf.get(term).copied().unwrap_or(1.0);
    }
    tf
}

/// Cosine similarity of two term lists under TF-IDF weighting.
pub fn tfidf_cosine(a: &[String], b: &[String], idf: &HashMap<String, f32>) -> f32 {
    let va = tfidf_vector(a, idf);
    let vb = tfidf_vector(b, idf);
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }
    let dot: f32 = va
        .iter()
        .filter_map(|(term, w)| vb.get(term).map(|w2| w * w2))
        .sum();
    let na: f32 = va.values().map(|w| w * w).sum::<f32>().sqrt();
    let nb: f32 = vb.values().map(|w| w * w).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Split into sentences at `.!?` followed by whitespace and an
/// upper-case letter, digit or `$`. Deterministic, no lookarounds.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            let boundary = j > i + 1
                && j < bytes.len()
                && (bytes[j].is_ascii_uppercase() || bytes[j].is_ascii_digit() || bytes[j] == b'$');
            if boundary {
                let sentence = text[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = j;
                i = j;
                continue;
            }
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_normalizes_without_commas_and_cents() {
        assert_eq!(normalize_token("$20,000"), "$20000");
        assert_eq!(normalize_token("$20,000.00"), "$20000");
        assert_eq!(normalize_token("$1,234.50"), "$1234.50");
    }

    #[test]
    fn percent_and_plain_numbers_normalize() {
        assert_eq!(normalize_token("12.5%"), "12.5%");
        assert_eq!(normalize_token("1,234"), "1234");
        assert_eq!(normalize_token("3.00"), "3");
    }

    #[test]
    fn words_lowercase_and_strip_suffixes() {
        assert_eq!(normalize_token("Balances"), "balance");
        assert_eq!(normalize_token("requires"), "require");
        assert_eq!(normalize_token("Bank's"), "bank");
        // Too short for stripping.
        assert_eq!(normalize_token("is"), "is");
    }

    #[test]
    fn tokenizer_keeps_money_as_one_token() {
        let tokens = tokenize("Gold tier requires $20,000 in combined balances.");
        assert!(tokens.contains(&"$20000".to_string()));
        assert!(tokens.contains(&"gold".to_string()));
    }

    #[test]
    fn informative_terms_drop_stopwords_and_bare_numbers() {
        let terms = informative_terms("the balance is 42 dollars");
        assert!(!terms.contains(&"the".to_string()));
        assert!(!terms.contains(&"42".to_string()));
        assert!(terms.contains(&"balance".to_string()));
    }

    #[test]
    fn idf_weights_rare_terms_higher() {
        let a = vec!["common".to_string(), "rare".to_string()];
        let b = vec!["common".to_string()];
        let c = vec!["common".to_string()];
        let idf = build_idf(&[&a, &b, &c]);
        assert!(idf["rare"] > idf["common"]);
    }

    #[test]
    fn cosine_of_identical_lists_is_one() {
        let terms = informative_terms("gold tier balance");
        let idf = build_idf(&[&terms]);
        let cos = tfidf_cosine(&terms, &terms, &idf);
        assert!((cos - 1.0).abs() < 1e-5);
    }

    #[test]
    fn sentences_split_on_terminators_before_capitals() {
        let sentences =
            split_sentences("Gold tier requires $20,000. Platinum requires $50,000. Done");
        assert_eq!(sentences.len(), 3);
        assert!(sentences[0].contains("$20,000"));
    }

    #[test]
    fn decimal_points_do_not_split_sentences() {
        let sentences = split_sentences("The rate is 4.5% for one year.");
        assert_eq!(sentences.len(), 1);
    }
}
