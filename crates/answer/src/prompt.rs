//! Grounded prompt construction
//!
//! Three lanes with different trust levels: the conversation snippet and
//! the topic hint are for disambiguation only; the grounding context is
//! the only lane facts may come from.

use parley_core::RetrievedPassage;

pub const SYSTEM_PROMPT: &str = "You are a grounded question-answering assistant for a \
document corpus. You must base all factual statements ONLY on the Grounding context. \
The Conversation and Topic hint lanes are for disambiguation and tone ONLY; they are \
NOT sources of facts. If the Grounding context is insufficient for the user request, \
abstain. Respond with exactly one JSON object and nothing else.";

/// Appended as a system reminder on the single repair retry.
pub const SCHEMA_REMINDER: &str = "Your previous reply did not conform. Respond with \
exactly one JSON object in the exact schema given, with no surrounding prose, no \
markdown fences, and no extra fields.";

const OUTPUT_SCHEMA: &str = r#"{
  "answer": "",
  "answer_kind": "direct | clarification | abstain",
  "abstained": false,
  "faithfulness": 0.0,
  "completeness": 0.0,
  "missing_information": [],
  "reasoning_notes": "",
  "clarifying_question": null,
  "citations": []
}"#;

/// Render passages as "C1: ..." blocks; the ordinals double as citation
/// identifiers.
pub fn passage_block(passages: &[RetrievedPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("C{}: {}", i + 1, p.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The user message for the main generation call.
pub fn grounded_prompt(
    question: &str,
    passages: &[RetrievedPassage],
    conversation_snippet: &str,
    topic_hint: &str,
) -> String {
    let valid_ids = (1..=passages.len())
        .map(|i| format!("C{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let snippet = if conversation_snippet.is_empty() {
        "(none)"
    } else {
        conversation_snippet
    };
    let hint = if topic_hint.is_empty() {
        "(none)"
    } else {
        topic_hint
    };
    let context = if passages.is_empty() {
        "(no context)".to_string()
    } else {
        passage_block(passages)
    };

    format!(
        "----- Conversation (non-factual; recent turns) -----\n{snippet}\n\n\
         ----- Topic hint (non-factual) -----\n{hint}\n\n\
         ----- Grounding context (factual; cite passage IDs) -----\n{context}\n\n\
         ----- User message -----\n{question}\n\n\
         INTERPRETATION RULES:\n\
         - If the user message is an acknowledgement (e.g. 'yes', 'that one'), \
         interpret it as confirming the Topic hint.\n\
         - Do NOT extract facts from Conversation or Topic hint.\n\
         - Use ONLY the Grounding context for facts; set \"citations\" to the \
         passage IDs you relied on, drawn only from: [{valid_ids}].\n\
         - If a needed fact is missing from the Grounding context, set \
         \"answer_kind\" to \"abstain\", \"abstained\" to true, both scores to \
         \"n/a\", and include a \"clarifying_question\" when one would help.\n\
         - For \"clarification\" and \"abstain\" kinds the scores MUST be \"n/a\"; \
         for \"direct\" they MUST be numeric in [0, 1].\n\n\
         OUTPUT JSON (single object, strict JSON, no extra fields):\n{OUTPUT_SCHEMA}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{ChunkRef, DocKind, DocRef, Document, SignalScores};

    fn passage(id: &str, text: &str) -> RetrievedPassage {
        RetrievedPassage {
            chunk: ChunkRef(id.into()),
            text: text.into(),
            signals: SignalScores::default(),
            fused: 0.1,
            document: Document {
                id: DocRef("d".into()),
                url: "local".into(),
                kind: DocKind::Other,
                language: "en".into(),
                title: String::new(),
                published_at: None,
                updated_at: None,
                effective_at: None,
                expires_at: None,
                geo_scope: String::new(),
                currency: String::new(),
                product_entities: Vec::new(),
                categories: Vec::new(),
                authority: 0.5,
                source_path: String::new(),
            },
            rank: 1,
        }
    }

    #[test]
    fn prompt_enumerates_ordinals() {
        let passages = vec![passage("a_chunk_0", "first"), passage("b_chunk_0", "second")];
        let prompt = grounded_prompt("q?", &passages, "", "");
        assert!(prompt.contains("C1: first"));
        assert!(prompt.contains("C2: second"));
        assert!(prompt.contains("[C1, C2]"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn empty_passages_render_no_context_marker() {
        let prompt = grounded_prompt("q?", &[], "User: hi", "deposits");
        assert!(prompt.contains("(no context)"));
        assert!(prompt.contains("User: hi"));
        assert!(prompt.contains("deposits"));
    }
}
