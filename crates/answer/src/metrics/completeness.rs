//! Interrogative-spine completeness heuristic
//!
//! Extract the question's interrogative facets (what / which / who /
//! when / where / why / how-much / how) and check the answer addresses
//! each. The ratio addressed is the artifact's completeness.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::grounding::answer_numbers;
use super::text::informative_terms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Facet {
    What,
    Which,
    Who,
    When,
    Where,
    Why,
    HowMuch,
    How,
}

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year regex"));
static MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\b")
        .expect("month regex")
});

fn facets_of(question: &str) -> BTreeSet<Facet> {
    let lowered = question.to_lowercase();
    let mut facets = BTreeSet::new();
    let has_word = |word: &str| {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|t| t == word)
    };

    if lowered.contains("how much") || lowered.contains("how many") {
        facets.insert(Facet::HowMuch);
    } else if has_word("how") {
        facets.insert(Facet::How);
    }
    if has_word("what") {
        facets.insert(Facet::What);
    }
    if has_word("which") {
        facets.insert(Facet::Which);
    }
    if has_word("who") || has_word("whom") {
        facets.insert(Facet::Who);
    }
    if has_word("when") {
        facets.insert(Facet::When);
    }
    if has_word("where") {
        facets.insert(Facet::Where);
    }
    if has_word("why") {
        facets.insert(Facet::Why);
    }

    if facets.is_empty() {
        // Imperatives and keyword queries still ask for something.
        facets.insert(Facet::What);
    }
    facets
}

fn addressed(facet: Facet, answer: &str) -> bool {
    match facet {
        Facet::HowMuch => !answer_numbers(answer).is_empty(),
        Facet::When => {
            YEAR_RE.is_match(answer)
                || MONTH_RE.is_match(answer)
                || answer_numbers(answer)
                    .iter()
                    .any(|(kind, _)| *kind == "number")
        }
        // The remaining facets share one requirement: the answer carries
        // actual content, not a deflection.
        _ => informative_terms(answer).len() >= 3,
    }
}

/// Fraction of the question's facets the answer addresses.
pub fn completeness_ratio(question: &str, answer: &str) -> f32 {
    if answer.trim().is_empty() {
        return 0.0;
    }
    let facets = facets_of(question);
    let hit = facets
        .iter()
        .filter(|facet| addressed(**facet, answer))
        .count();
    hit as f32 / facets.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substantive_answer_to_what_question_is_complete() {
        let ratio = completeness_ratio(
            "What balance is needed for Gold?",
            "Gold tier requires $20,000 in combined balances.",
        );
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn how_much_needs_a_number() {
        let with_number = completeness_ratio("How much does it cost?", "It costs $25 per wire.");
        let without = completeness_ratio(
            "How much does it cost?",
            "Costs vary depending on several considerations.",
        );
        assert_eq!(with_number, 1.0);
        assert!(without < 1.0);
    }

    #[test]
    fn when_needs_a_temporal_marker() {
        let dated = completeness_ratio("When does it start?", "It starts in January 2026.");
        let undated = completeness_ratio("When does it start?", "It starts fairly soon probably.");
        assert_eq!(dated, 1.0);
        assert!(undated < 1.0);
    }

    #[test]
    fn multi_facet_questions_average() {
        let ratio = completeness_ratio(
            "What is the fee and when does it apply?",
            "The fee applies broadly to several transfer categories.",
        );
        // "what" addressed, "when" not.
        assert!(ratio > 0.0 && ratio < 1.0);
    }

    #[test]
    fn empty_answer_is_incomplete() {
        assert_eq!(completeness_ratio("What is it?", "  "), 0.0);
    }

    #[test]
    fn keyword_query_gets_generic_facet() {
        let ratio = completeness_ratio("FX wire fees", "Outbound wires carry a $45 fee.");
        assert_eq!(ratio, 1.0);
    }
}
