//! Utterance ingestion
//!
//! Decides how the raw utterance becomes the processed question: merge
//! with the pending question when it answers a clarification, rephrase
//! against history when it is an acknowledgement or pronoun-only
//! follow-up, or pass through untouched.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;

use parley_core::{conversation_snippet, Turn};
use parley_llm::{ChatOptions, LanguageModel};

static ACK_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "yes", "y", "yeah", "yep", "ok", "okay", "sure", "that", "this", "it", "right",
        "correct", "exactly", "both",
    ]
    .into_iter()
    .collect()
});

const COREF_PRONOUNS: &[&str] = &[
    "it", "that", "this", "those", "these", "them", "they", "he", "she",
];

/// Acknowledgements and short pronoun-only follow-ups lean on prior
/// turns and need help before retrieval.
pub fn is_ack_or_coref(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    if ACK_TOKENS.contains(lowered.as_str()) {
        return true;
    }
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    words.len() <= 3 && words.iter().any(|w| COREF_PRONOUNS.contains(w))
}

/// What INGEST decided, surfaced in diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestReport {
    pub original_question: String,
    pub processed_question: String,
    pub rephrased: bool,
    pub clarification_response: bool,
    pub summary: String,
}

fn rephrase_prompt(question: &str, snippet: &str) -> String {
    format!(
        "Rewrite the user's message as a self-contained question, resolving pronouns \
         and topic references against the conversation. If the message is already a \
         complete question, or refers to a new topic, return it unchanged. Never add \
         context the user did not refer to.\n\n\
         Conversation:\n{snippet}\n\n\
         User message: \"{question}\"\n\n\
         Return ONLY the rephrased question, nothing else."
    )
}

/// Rephrase an utterance against history. One LLM call with a
/// return-only-the-question contract; any failure falls back to the
/// original utterance.
pub async fn rephrase(
    llm: &Arc<dyn LanguageModel>,
    options: &ChatOptions,
    utterance: &str,
    history: &[Turn],
) -> (String, bool) {
    let snippet = conversation_snippet(history, 3);
    if snippet.is_empty() {
        return (utterance.to_string(), false);
    }
    let prompt = rephrase_prompt(utterance, &snippet);
    match llm
        .chat("You rephrase questions. Output the question only.", &prompt, options)
        .await
    {
        Ok(response) => {
            let rephrased = response.lines().next().unwrap_or("").trim().to_string();
            if rephrased.is_empty() || rephrased == utterance {
                (utterance.to_string(), false)
            } else {
                (rephrased, true)
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "rephrasing unavailable, using raw utterance");
            (utterance.to_string(), false)
        }
    }
}

/// Merge a clarification reply into the pending question.
pub fn merge_clarification_reply(pending: &str, reply: &str) -> String {
    format!("{} ({})", pending.trim(), reply.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_acks_are_detected() {
        assert!(is_ack_or_coref("yes"));
        assert!(is_ack_or_coref("  OK "));
        assert!(is_ack_or_coref("that one"));
        assert!(is_ack_or_coref("tell me it"));
    }

    #[test]
    fn full_questions_are_not_acks() {
        assert!(!is_ack_or_coref("What balance is needed for Gold?"));
        assert!(!is_ack_or_coref("tell me more about the deposits program"));
    }

    #[test]
    fn merged_reply_carries_both_parts() {
        let merged = merge_clarification_reply("What are the rates?", "Preferred Deposits");
        assert_eq!(merged, "What are the rates? (Preferred Deposits)");
    }

    #[tokio::test]
    async fn rephrase_skips_when_no_history() {
        let llm: Arc<dyn LanguageModel> =
            Arc::new(parley_llm::MockLanguageModel::new(8));
        let (question, rephrased) =
            rephrase(&llm, &ChatOptions::default(), "units", &[]).await;
        assert_eq!(question, "units");
        assert!(!rephrased);
    }

    #[tokio::test]
    async fn rephrase_falls_back_on_llm_failure() {
        let mock = Arc::new(parley_llm::MockLanguageModel::new(8));
        // No scripted response queued: the chat call errors.
        let llm: Arc<dyn LanguageModel> = mock;
        let history = vec![Turn::user("what is the gold tier?")];
        let (question, rephrased) =
            rephrase(&llm, &ChatOptions::default(), "tell me more", &history).await;
        assert_eq!(question, "tell me more");
        assert!(!rephrased);
    }

    #[tokio::test]
    async fn rephrase_uses_model_output_first_line() {
        let mock = Arc::new(parley_llm::MockLanguageModel::new(8));
        mock.push_response("How many units are in the Villas project?\nextra");
        let llm: Arc<dyn LanguageModel> = mock;
        let history = vec![Turn::user("what is the Villas project?")];
        let (question, rephrased) =
            rephrase(&llm, &ChatOptions::default(), "units", &history).await;
        assert_eq!(question, "How many units are in the Villas project?");
        assert!(rephrased);
    }
}
