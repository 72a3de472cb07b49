//! Grounding metrics, computed locally rather than by the model
//!
//! Deterministic lexical analysis of the answer against the cited
//! passages: IDF-weighted supported-term ratio, entity coverage, numeric
//! fidelity, per-sentence precision, TF-IDF question/answer alignment and
//! the interrogative-spine completeness heuristic.

pub mod completeness;
pub mod entities;
pub mod grounding;
pub mod text;

use std::collections::BTreeMap;

use parley_core::{EntitySupport, TermSupport};

pub use completeness::completeness_ratio;
pub use entities::extract_entities;
pub use grounding::{per_sentence_precision, supported_terms, unsupported_numbers};
pub use text::{build_idf, informative_terms, tfidf_cosine, tokenize};

/// Everything the generator needs to apply the abstention rules and fill
/// the artifact's evidence block.
#[derive(Debug, Clone, Default)]
pub struct GroundingReport {
    /// Σ supported IDF / Σ answer IDF, clipped to [0, 1].
    pub supported_term_ratio: f32,
    pub supported_terms: Vec<TermSupport>,
    pub entities: Vec<EntitySupport>,
    /// supported / total recognized entities; 1.0 when none.
    pub entity_coverage: f32,
    pub entity_coverage_by_type: BTreeMap<String, f32>,
    /// Numbers in the answer with no verbatim (normalized) match in any
    /// cited passage. Non-empty forces abstention.
    pub unsupported_numbers: Vec<String>,
    /// Fraction of answer numbers that are supported; 1.0 when none.
    pub numeric_match: f32,
    pub per_sentence_precision: Vec<f32>,
    /// TF-IDF cosine of question vs answer, diagnostic only.
    pub qa_alignment: f32,
    /// Interrogative-spine ratio.
    pub completeness: f32,
}

/// Run the full grounding analysis of an answer against its cited
/// passages.
pub fn analyze_grounding(question: &str, answer: &str, cited: &[&str]) -> GroundingReport {
    let question_terms = informative_terms(question);
    let answer_terms = informative_terms(answer);
    let cited_terms: Vec<Vec<String>> = cited.iter().map(|c| informative_terms(c)).collect();

    // IDF over the cited passages plus question and answer, so rare terms
    // weigh more than boilerplate.
    let mut idf_docs: Vec<&[String]> = cited_terms.iter().map(Vec::as_slice).collect();
    idf_docs.push(&question_terms);
    idf_docs.push(&answer_terms);
    let idf = build_idf(&idf_docs);

    let (supported, ratio) = supported_terms(answer, &cited_terms, &idf);

    let entities = extract_entities(answer, cited);
    let (entity_coverage, entity_coverage_by_type) = entity_stats(&entities);

    let unsupported = unsupported_numbers(answer, cited);
    let total_numbers = grounding::answer_numbers(answer).len();
    let numeric_match = if total_numbers == 0 {
        1.0
    } else {
        (total_numbers - unsupported.len()) as f32 / total_numbers as f32
    };

    GroundingReport {
        supported_term_ratio: ratio,
        supported_terms: supported,
        entities,
        entity_coverage,
        entity_coverage_by_type,
        unsupported_numbers: unsupported,
        numeric_match,
        per_sentence_precision: per_sentence_precision(answer, &cited_terms, &idf),
        qa_alignment: tfidf_cosine(&question_terms, &answer_terms, &idf),
        completeness: completeness_ratio(question, answer),
    }
}

fn entity_stats(entities: &[EntitySupport]) -> (f32, BTreeMap<String, f32>) {
    if entities.is_empty() {
        return (1.0, BTreeMap::new());
    }
    let mut total: BTreeMap<String, usize> = BTreeMap::new();
    let mut covered: BTreeMap<String, usize> = BTreeMap::new();
    for entity in entities {
        *total.entry(entity.entity_type.clone()).or_default() += 1;
        if entity.supported {
            *covered.entry(entity.entity_type.clone()).or_default() += 1;
        }
    }
    let overall = entities.iter().filter(|e| e.supported).count() as f32 / entities.len() as f32;
    let by_type = total
        .into_iter()
        .map(|(ty, count)| {
            let hit = covered.get(&ty).copied().unwrap_or(0);
            (ty, hit as f32 / count as f32)
        })
        .collect();
    (overall, by_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grounded_answer_scores_high() {
        let passage = "Gold tier requires $20,000 in combined balances across accounts.";
        let report = analyze_grounding(
            "What balance is needed for Gold?",
            "Gold tier requires $20,000 in combined balances.",
            &[passage],
        );
        assert!(report.supported_term_ratio >= 0.8, "{report:?}");
        assert!(report.unsupported_numbers.is_empty());
        assert_eq!(report.numeric_match, 1.0);
        assert!(report.entity_coverage >= 0.5);
        assert!(report.completeness > 0.5);
    }

    #[test]
    fn fabricated_number_is_unsupported() {
        let passage = "Gold tier requires $20,000 in combined balances.";
        let report = analyze_grounding(
            "What balance is needed for Gold?",
            "Gold tier requires $25,000 in combined balances.",
            &[passage],
        );
        assert!(!report.unsupported_numbers.is_empty());
        assert!(report.numeric_match < 1.0);
    }

    #[test]
    fn unrelated_answer_scores_low() {
        let passage = "Gold tier requires $20,000 in combined balances.";
        let report = analyze_grounding(
            "What balance is needed for Gold?",
            "Penguins migrate across Antarctic winters hunting krill swarms.",
            &[passage],
        );
        assert!(report.supported_term_ratio < 0.5);
    }

    #[test]
    fn no_entities_means_full_coverage() {
        let report = analyze_grounding("why", "because of policy reasons", &["policy reasons"]);
        assert_eq!(report.entity_coverage, 1.0);
    }

    #[test]
    fn spans_index_into_answer() {
        let answer = "Gold tier requires $20,000 in combined balances.";
        let report = analyze_grounding("What is needed?", answer, &[answer]);
        for term in &report.supported_terms {
            for span in &term.spans {
                assert!(span.end <= answer.len());
                assert!(span.start < span.end);
            }
        }
        for entity in &report.entities {
            for span in &entity.spans {
                assert!(span.end <= answer.len());
            }
        }
    }
}
