//! Regex entity recognition
//!
//! Well-defined surface patterns only: money, percents, dates, times,
//! emails, URLs, phone numbers, acronyms, id-like tokens and quoted
//! spans. Overlapping matches keep the longer one. An entity is supported
//! iff its surface form appears (case-insensitively) in a cited passage.

use once_cell::sync::Lazy;
use regex::Regex;

use parley_core::{EntitySupport, Span};

static PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let table: &[(&str, &str)] = &[
        ("email", r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
        ("url", r"(?i)\b(?:https?://|www\.)\S+"),
        (
            "phone",
            r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        ),
        ("date", r"\b\d{4}-\d{2}-\d{2}\b"),
        ("date", r"\b\d{1,2}/\d{1,2}/\d{2,4}\b"),
        (
            "date",
            r"(?i)\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\s+\d{1,2}(?:,\s*\d{2,4})?\b",
        ),
        ("time", r"(?i)\b\d{1,2}:\d{2}\s*(?:am|pm)?\b"),
        ("money", r"\$[\d,]+(?:\.\d{2})?"),
        ("percent", r"\d+(?:\.\d+)?%"),
        ("acronym", r"\b[A-Z]{2,6}s?\b"),
        ("id", r"\b[A-Z0-9]{6,}\b"),
    ];
    table
        .iter()
        .map(|(name, re)| (*name, Regex::new(re).expect("entity regex")))
        .collect()
});

static QUOTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([^"']{2,})["']"#).expect("quoted regex"));

/// Recognize entities in the answer and mark each as supported or not
/// against the cited passages.
pub fn extract_entities(answer: &str, cited: &[&str]) -> Vec<EntitySupport> {
    // (start, end, type, surface)
    let mut matches: Vec<(usize, usize, &'static str, String)> = Vec::new();
    for (name, regex) in PATTERNS.iter() {
        for m in regex.find_iter(answer) {
            matches.push((m.start(), m.end(), *name, m.as_str().to_string()));
        }
    }
    for caps in QUOTED_RE.captures_iter(answer) {
        if let Some(inner) = caps.get(1) {
            matches.push((
                inner.start(),
                inner.end(),
                "quoted",
                inner.as_str().to_string(),
            ));
        }
    }

    // Position order, longer match first; drop overlaps.
    matches.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| (b.1 - b.0).cmp(&(a.1 - a.0))));
    let mut kept: Vec<(usize, usize, &'static str, String)> = Vec::new();
    for candidate in matches {
        let overlaps = kept
            .iter()
            .any(|existing| candidate.0 < existing.1 && existing.0 < candidate.1);
        if !overlaps {
            kept.push(candidate);
        }
    }

    let lowered_cited: Vec<String> = cited.iter().map(|c| c.to_lowercase()).collect();
    kept.into_iter()
        .map(|(start, end, entity_type, surface)| {
            let needle = surface.to_lowercase();
            let supported = lowered_cited.iter().any(|c| c.contains(&needle));
            EntitySupport {
                text: surface,
                entity_type: entity_type.to_string(),
                spans: vec![Span { start, end }],
                supported,
            }
        })
        .collect()
}
