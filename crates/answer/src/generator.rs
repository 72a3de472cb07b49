//! The answer generator
//!
//! One chat call per request (plus at most one schema-repair retry),
//! strict parsing, local grounding metrics, and the abstention rules in
//! order:
//! 1. no passages retrieved
//! 2. any unsupported number
//! 3. supported-term ratio or entity coverage below 0.5
//! 4. otherwise the model's declared kind stands

use std::sync::Arc;

use parley_core::{AnswerArtifact, ChunkRef, GroundingEvidence, RetrievedPassage};
use parley_llm::{ChatOptions, LanguageModel};

use crate::metrics::{analyze_grounding, GroundingReport};
use crate::prompt::{grounded_prompt, SCHEMA_REMINDER, SYSTEM_PROMPT};
use crate::schema::{RawAnswer, RawAnswerKind};
use crate::AnswerError;

const MIN_SUPPORTED_RATIO: f32 = 0.5;
const MIN_ENTITY_COVERAGE: f32 = 0.5;

pub struct GenerationInput<'a> {
    pub question: &'a str,
    pub passages: &'a [RetrievedPassage],
    pub conversation_snippet: &'a str,
    pub topic_hint: &'a str,
}

pub struct AnswerGenerator {
    llm: Arc<dyn LanguageModel>,
    options: ChatOptions,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, options: ChatOptions) -> Self {
        Self { llm, options }
    }

    /// Produce an artifact. Backend failures and irreparably malformed
    /// responses are errors; every grounding problem becomes an
    /// abstention value instead.
    pub async fn generate(
        &self,
        input: GenerationInput<'_>,
    ) -> Result<AnswerArtifact, AnswerError> {
        if input.passages.is_empty() {
            return Ok(AnswerArtifact::abstain("no passages retrieved")
                .with_missing(vec!["No relevant passages were found".into()]));
        }

        let user_prompt = grounded_prompt(
            input.question,
            input.passages,
            input.conversation_snippet,
            input.topic_hint,
        );

        let raw = self.call_with_repair(&user_prompt).await?;
        Ok(self.enforce(input.question, input.passages, raw))
    }

    /// First call, then at most one retry with the schema reminder.
    async fn call_with_repair(&self, user_prompt: &str) -> Result<RawAnswer, AnswerError> {
        let response = self
            .llm
            .chat(SYSTEM_PROMPT, user_prompt, &self.options)
            .await?;
        match RawAnswer::parse(&response) {
            Ok(parsed) => Ok(parsed),
            Err(first_failure) => {
                tracing::warn!(error = %first_failure, "malformed structured response, retrying once");
                let reminder_system = format!("{SYSTEM_PROMPT}\n\n{SCHEMA_REMINDER}");
                let retry = self
                    .llm
                    .chat(&reminder_system, user_prompt, &self.options)
                    .await?;
                RawAnswer::parse(&retry)
            }
        }
    }

    /// Apply citation validation, grounding metrics and the abstention
    /// rules to the model's raw response.
    fn enforce(
        &self,
        question: &str,
        passages: &[RetrievedPassage],
        raw: RawAnswer,
    ) -> AnswerArtifact {
        // Clarifications pass through; they carry no factual claims.
        if raw.answer_kind == RawAnswerKind::Clarification {
            let question_text = raw
                .clarifying_question
                .clone()
                .filter(|q| !q.trim().is_empty())
                .unwrap_or(raw.answer);
            return AnswerArtifact::clarification(question_text)
                .with_missing(raw.missing_information)
                .with_notes(raw.reasoning_notes);
        }

        if raw.answer_kind == RawAnswerKind::Abstain || raw.abstained {
            let mut artifact = AnswerArtifact::abstain(raw.reasoning_notes)
                .with_missing(raw.missing_information);
            artifact.clarification = raw
                .clarifying_question
                .filter(|q| !q.trim().is_empty());
            return artifact;
        }

        // Citations must come from the presented ordinal set; a stray id
        // forfeits the answer.
        let mut cited: Vec<ChunkRef> = Vec::new();
        for citation in &raw.citations {
            match RawAnswer::ordinal_index(citation, passages.len()) {
                Some(index) => cited.push(passages[index].chunk.clone()),
                None => {
                    return AnswerArtifact::abstain(format!(
                        "cited unknown passage id {citation:?}"
                    ))
                    .with_missing(raw.missing_information);
                }
            }
        }
        cited.sort();
        cited.dedup();

        let cited_texts: Vec<&str> = passages
            .iter()
            .filter(|p| cited.contains(&p.chunk))
            .map(|p| p.text.as_str())
            .collect();
        let report = analyze_grounding(question, &raw.answer, &cited_texts);

        if let Some(artifact) = self.abstention_for(&raw, &report) {
            return artifact;
        }

        let mut artifact = AnswerArtifact::direct(
            raw.answer,
            report.supported_term_ratio,
            report.completeness,
        );
        artifact.missing_information = raw.missing_information;
        artifact.reasoning_notes = raw.reasoning_notes;
        artifact.evidence = GroundingEvidence {
            supported_terms: report.supported_terms,
            entities: report.entities,
        };
        artifact.cited = cited;
        debug_assert!(artifact.invariants_hold());
        artifact
    }

    /// Rules 2 and 3. Rule 1 (no passages) is handled before the call and
    /// rule 4 is the fall-through.
    fn abstention_for(
        &self,
        raw: &RawAnswer,
        report: &GroundingReport,
    ) -> Option<AnswerArtifact> {
        if !report.unsupported_numbers.is_empty() {
            let missing = report
                .unsupported_numbers
                .iter()
                .map(|n| format!("No source for {n}"))
                .collect();
            return Some(
                AnswerArtifact::abstain(format!(
                    "unsupported numbers in draft answer: {}",
                    report.unsupported_numbers.join(", ")
                ))
                .with_missing(missing),
            );
        }
        if report.supported_term_ratio < MIN_SUPPORTED_RATIO
            || report.entity_coverage < MIN_ENTITY_COVERAGE
        {
            tracing::debug!(
                supported = report.supported_term_ratio,
                entities = report.entity_coverage,
                "grounding below floor, abstaining"
            );
            return Some(
                AnswerArtifact::abstain(format!(
                    "insufficient grounding (terms {:.2}, entities {:.2})",
                    report.supported_term_ratio, report.entity_coverage
                ))
                .with_missing(raw.missing_information.clone()),
            );
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{AnswerKind, DocKind, DocRef, Document, SignalScores};
    use parley_llm::{LlmError, MockLanguageModel};

    fn passage(id: &str, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk: ChunkRef(id.into()),
            text: text.into(),
            signals: SignalScores::default(),
            fused: 0.1,
            document: Document {
                id: DocRef("d".into()),
                url: "local".into(),
                kind: DocKind::Disclosure,
                language: "en".into(),
                title: "Tiers".into(),
                published_at: None,
                updated_at: None,
                effective_at: None,
                expires_at: None,
                geo_scope: String::new(),
                currency: "USD".into(),
                product_entities: Vec::new(),
                categories: Vec::new(),
                authority: 0.9,
                source_path: String::new(),
            },
            rank: 1,
        }
    }

    fn direct_response(answer: &str, citations: &[&str]) -> String {
        serde_json::json!({
            "answer": answer,
            "answer_kind": "direct",
            "abstained": false,
            "faithfulness": 0.9,
            "completeness": 0.9,
            "missing_information": [],
            "reasoning_notes": "from context",
            "clarifying_question": null,
            "citations": citations,
        })
        .to_string()
    }

    fn generator(llm: Arc<MockLanguageModel>) -> AnswerGenerator {
        AnswerGenerator::new(llm, ChatOptions::default())
    }

    fn tier_passages() -> Vec<RetrievedPassage> {
        vec![passage(
            "tiers_chunk_0",
            "Gold tier requires $20,000 in combined balances.",
        )]
    }

    #[tokio::test]
    async fn grounded_direct_answer_passes() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response(direct_response(
            "Gold tier requires $20,000 in combined balances.",
            &["C1"],
        ));
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Direct);
        assert!(!artifact.abstained);
        assert!(artifact.answer.contains("$20,000"));
        assert!(artifact.faithfulness.unwrap() >= 0.8);
        assert_eq!(artifact.cited, vec![ChunkRef("tiers_chunk_0".into())]);
        assert!(artifact.invariants_hold());
    }

    #[tokio::test]
    async fn empty_retrieval_abstains_without_calling_model() {
        let llm = Arc::new(MockLanguageModel::new(8));
        let artifact = generator(llm.clone())
            .generate(GenerationInput {
                question: "What is the rate?",
                passages: &[],
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Abstain);
        assert!(!artifact.missing_information.is_empty());
        assert!(llm.chat_log.lock().is_empty());
    }

    #[tokio::test]
    async fn fabricated_number_forces_abstention() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response(direct_response(
            "Gold tier requires $99,999 in combined balances.",
            &["C1"],
        ));
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Abstain);
        assert!(artifact.abstained);
        assert!(artifact.reasoning_notes.contains("$99999"));
    }

    #[tokio::test]
    async fn citation_outside_set_forces_abstention() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response(direct_response(
            "Gold tier requires $20,000 in combined balances.",
            &["C7"],
        ));
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Abstain);
    }

    #[tokio::test]
    async fn ungrounded_prose_forces_abstention() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response(direct_response(
            "Penguins migrate across Antarctic winters hunting krill.",
            &["C1"],
        ));
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Abstain);
    }

    #[tokio::test]
    async fn malformed_response_retries_once_then_errors() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response("not json at all");
        llm.push_response("still not json");
        let passages = tier_passages();
        let result = generator(llm.clone())
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await;
        assert!(matches!(result, Err(AnswerError::Malformed(_))));
        assert_eq!(llm.chat_log.lock().len(), 2);
    }

    #[tokio::test]
    async fn malformed_then_valid_succeeds_on_retry() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response("oops");
        llm.push_response(direct_response(
            "Gold tier requires $20,000 in combined balances.",
            &["C1"],
        ));
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What balance is needed for Gold?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Direct);
    }

    #[tokio::test]
    async fn backend_failure_surfaces() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_error(LlmError::Timeout);
        let passages = tier_passages();
        let result = generator(llm)
            .generate(GenerationInput {
                question: "q",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await;
        assert!(matches!(result, Err(AnswerError::Backend(_))));
    }

    #[tokio::test]
    async fn model_abstention_keeps_clarifying_question() {
        let llm = Arc::new(MockLanguageModel::new(8));
        llm.push_response(
            serde_json::json!({
                "answer": "",
                "answer_kind": "abstain",
                "abstained": true,
                "faithfulness": "n/a",
                "completeness": "n/a",
                "missing_information": ["Which program the user means"],
                "reasoning_notes": "ambiguous",
                "clarifying_question": "Do you mean Preferred Rewards or Preferred Deposits?",
                "citations": [],
            })
            .to_string(),
        );
        let passages = tier_passages();
        let artifact = generator(llm)
            .generate(GenerationInput {
                question: "What are the rates?",
                passages: &passages,
                conversation_snippet: "",
                topic_hint: "",
            })
            .await
            .unwrap();
        assert_eq!(artifact.kind, AnswerKind::Abstain);
        assert!(artifact.clarification.is_some());
        assert!(artifact.faithfulness.is_none());
    }
}
