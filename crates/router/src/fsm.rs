//! The routing state machine

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use parley_answer::{AnswerError, AnswerGenerator, GenerationInput};
use parley_config::{ChatConfig, HybridConfig};
use parley_core::{
    conversation_snippet, AnswerArtifact, AnswerKind, Error, RetrievedPassage, Turn,
};
use parley_llm::{ChatOptions, LanguageModel};
use parley_retrieval::{HybridRetriever, RetrievalDiagnostics};
use parley_session::Session;

use crate::ingest::{is_ack_or_coref, merge_clarification_reply, rephrase, IngestReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Ingest,
    Retrieve,
    Route,
    Answer,
    Clarify,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    NoEvidence,
    AboveThreshold,
    LowConfidence,
    BudgetExhausted,
    SafetyNet,
}

/// The ROUTE node's verdict and the numbers behind it.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDecision {
    pub target: RouterState,
    pub reason: RouteReason,
    pub top_similarity: Option<f32>,
    pub threshold: f32,
    pub reclarify_threshold: f32,
    pub clarify_count: u32,
    pub max_clarify: u32,
}

/// Per-node diagnostics for the debug surface.
#[derive(Debug, Clone, Serialize)]
pub struct RouterDiagnostics {
    pub ingest: IngestReport,
    pub retrieve: RetrievalDiagnostics,
    pub route: RouteDecision,
}

pub struct RouterOutcome {
    pub artifact: AnswerArtifact,
    /// Node that produced the final response.
    pub generated_by: &'static str,
    pub passages: Vec<RetrievedPassage>,
    pub diagnostics: RouterDiagnostics,
    pub trace: Vec<RouterState>,
}

#[derive(Debug, Deserialize)]
struct FocusClarification {
    clarification_question: String,
    #[serde(default)]
    focus_topic: String,
}

fn focus_clarification_prompt(question: &str, snippet: &str) -> String {
    format!(
        "The user's question is too ambiguous to answer from the documents.\n\n\
         Recent conversation (non-factual):\n{snippet}\n\n\
         User message: \"{question}\"\n\n\
         Ask exactly ONE specific clarification question and propose a concise \
         \"focus_topic\" (at most 8 words) naming the likely subject. No facts, no \
         new claims. Return one JSON object only:\n\
         {{\"clarification_question\": \"...\", \"focus_topic\": \"...\"}}"
    )
}

pub struct Router {
    retriever: Arc<HybridRetriever>,
    generator: AnswerGenerator,
    llm: Arc<dyn LanguageModel>,
    options: ChatOptions,
}

impl Router {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        llm: Arc<dyn LanguageModel>,
        options: ChatOptions,
    ) -> Self {
        Self {
            retriever,
            generator: AnswerGenerator::new(llm.clone(), options.clone()),
            llm,
            options,
        }
    }

    /// Run one utterance through the full state machine. The caller must
    /// hold the session's request lock.
    pub async fn handle(
        &self,
        session: &Session,
        utterance: &str,
        chat: &ChatConfig,
        hybrid: &HybridConfig,
    ) -> Result<RouterOutcome, Error> {
        let mut trace = vec![RouterState::Ingest];
        session.append_turn(Turn::user(utterance));

        // ---- INGEST ----
        let (pending, clarify_count, focus_hint) = {
            let state = session.conversation.lock();
            (
                state
                    .last_clarification
                    .as_ref()
                    .and(state.pending_question.clone()),
                state.clarify_count,
                state.focus_hint.clone(),
            )
        };
        let history = session.history();

        let (processed, rephrased, clarification_response, hint) = match &pending {
            Some(pending_question) => {
                // The utterance answers the clarification we asked.
                let merged = merge_clarification_reply(pending_question, utterance);
                (merged, false, true, Some(utterance.to_string()))
            }
            None if is_ack_or_coref(utterance) => {
                let (question, rephrased) =
                    rephrase(&self.llm, &self.options, utterance, &history).await;
                (question, rephrased, false, focus_hint.clone())
            }
            None => (utterance.to_string(), false, false, None),
        };

        let ingest = IngestReport {
            original_question: utterance.to_string(),
            processed_question: processed.clone(),
            rephrased,
            clarification_response,
            summary: format!("processed {} turns of history", history.len()),
        };
        tracing::debug!(
            processed = %processed,
            rephrased,
            clarification_response,
            "ingest complete"
        );

        // ---- RETRIEVE ----
        trace.push(RouterState::Retrieve);
        let mut retrieval_config = hybrid.clone();
        retrieval_config.k_final = chat.retrieval_top_k;
        let outcome = self
            .retriever
            .search_with_hint(
                &processed,
                hint.as_deref(),
                None,
                &retrieval_config,
                chat.retrieval_method,
            )
            .await
            .map_err(Error::from)?;
        {
            let mut state = session.conversation.lock();
            state.last_retrieval = outcome.passages.clone();
        }

        // ---- ROUTE ----
        trace.push(RouterState::Route);
        let top_similarity = outcome
            .passages
            .iter()
            .map(|p| p.routing_score())
            .fold(None, |best: Option<f32>, score| {
                Some(best.map_or(score, |b| b.max(score)))
            });
        let route = decide(
            top_similarity,
            outcome.passages.is_empty(),
            clarify_count,
            chat,
        );
        tracing::info!(
            target = ?route.target,
            reason = ?route.reason,
            similarity = ?route.top_similarity,
            "route decided"
        );

        let snippet = conversation_snippet(&history, 3);
        let diagnostics = RouterDiagnostics {
            ingest,
            retrieve: outcome.diagnostics.clone(),
            route: route.clone(),
        };

        // ---- ANSWER / CLARIFY ----
        let (artifact, generated_by) = match route.target {
            RouterState::Answer => {
                trace.push(RouterState::Answer);
                self.answer_node(
                    session,
                    &processed,
                    &outcome.passages,
                    &snippet,
                    hint.as_deref().unwrap_or(""),
                    clarify_count,
                    chat,
                )
                .await
            }
            _ => {
                trace.push(RouterState::Clarify);
                let artifact = self
                    .clarify_node(session, &processed, &outcome.passages, &snippet)
                    .await;
                (artifact, "clarify")
            }
        };
        trace.push(RouterState::End);

        Ok(RouterOutcome {
            artifact,
            generated_by,
            passages: outcome.passages,
            diagnostics,
            trace,
        })
    }

    /// Direct generation without routing: the "simple" strategy.
    pub async fn handle_simple(
        &self,
        session: &Session,
        utterance: &str,
        chat: &ChatConfig,
        hybrid: &HybridConfig,
    ) -> Result<RouterOutcome, Error> {
        session.append_turn(Turn::user(utterance));
        let history = session.history();
        let snippet = conversation_snippet(&history, 3);

        let mut retrieval_config = hybrid.clone();
        retrieval_config.k_final = chat.retrieval_top_k;
        let outcome = self
            .retriever
            .search(utterance, None, &retrieval_config, chat.retrieval_method)
            .await
            .map_err(Error::from)?;

        let artifact = match self
            .generator
            .generate(GenerationInput {
                question: utterance,
                passages: &outcome.passages,
                conversation_snippet: &snippet,
                topic_hint: "",
            })
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => abstention_for_failure(e),
        };
        finish_question(session, &artifact);

        let top_similarity = outcome.passages.first().map(|p| p.routing_score());
        Ok(RouterOutcome {
            artifact,
            generated_by: "answer",
            diagnostics: RouterDiagnostics {
                ingest: IngestReport {
                    original_question: utterance.to_string(),
                    processed_question: utterance.to_string(),
                    rephrased: false,
                    clarification_response: false,
                    summary: "simple routing, no rephrasing".into(),
                },
                retrieve: outcome.diagnostics.clone(),
                route: RouteDecision {
                    target: RouterState::Answer,
                    reason: RouteReason::SafetyNet,
                    top_similarity,
                    threshold: chat.similarity_threshold,
                    reclarify_threshold: chat.reclarify_threshold,
                    clarify_count: 0,
                    max_clarify: chat.max_clarify,
                },
            },
            passages: outcome.passages,
            trace: vec![
                RouterState::Ingest,
                RouterState::Retrieve,
                RouterState::Answer,
                RouterState::End,
            ],
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn answer_node(
        &self,
        session: &Session,
        question: &str,
        passages: &[RetrievedPassage],
        snippet: &str,
        hint: &str,
        clarify_count: u32,
        chat: &ChatConfig,
    ) -> (AnswerArtifact, &'static str) {
        let artifact = match self
            .generator
            .generate(GenerationInput {
                question,
                passages,
                conversation_snippet: snippet,
                topic_hint: hint,
            })
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => {
                let artifact = abstention_for_failure(e);
                finish_question(session, &artifact);
                return (artifact, "answer");
            }
        };

        let budget_left = clarify_count < chat.max_clarify;

        // A clarification offered by the generator only stands while the
        // budget allows; past it, abstention is the answer.
        if artifact.kind == AnswerKind::Clarification {
            if budget_left {
                let question_text = artifact
                    .clarification
                    .clone()
                    .unwrap_or_else(|| artifact.answer.clone());
                record_clarification(session, question, &question_text, None);
                return (artifact, "answer");
            }
            let abstain = AnswerArtifact::abstain("clarification budget exhausted")
                .with_missing(artifact.missing_information);
            finish_question(session, &abstain);
            return (abstain, "answer");
        }

        // Model abstained but proposed a clarifying question: surface it
        // while the budget allows.
        if artifact.abstained && budget_left {
            if let Some(question_text) = artifact
                .clarification
                .clone()
                .filter(|q| !q.trim().is_empty())
            {
                let clarification = AnswerArtifact::clarification(question_text.clone())
                    .with_missing(artifact.missing_information.clone())
                    .with_notes(artifact.reasoning_notes.clone());
                record_clarification(session, question, &question_text, None);
                return (clarification, "answer");
            }
        }

        finish_question(session, &artifact);
        (artifact, "answer")
    }

    async fn clarify_node(
        &self,
        session: &Session,
        question: &str,
        passages: &[RetrievedPassage],
        snippet: &str,
    ) -> AnswerArtifact {
        let (clarification, focus_topic) = match self
            .llm
            .chat(
                "You write clarification questions. JSON only.",
                &focus_clarification_prompt(question, snippet),
                &self.options,
            )
            .await
        {
            Ok(response) => match serde_json::from_str::<FocusClarification>(response.trim()) {
                Ok(parsed) if !parsed.clarification_question.trim().is_empty() => (
                    parsed.clarification_question,
                    Some(parsed.focus_topic).filter(|t| !t.trim().is_empty()),
                ),
                _ => synthesize_clarification(passages),
            },
            Err(e) => {
                tracing::debug!(error = %e, "clarify LLM unavailable, synthesizing");
                synthesize_clarification(passages)
            }
        };

        record_clarification(session, question, &clarification, focus_topic);
        AnswerArtifact::clarification(clarification)
            .with_missing(vec!["The specific program or topic meant".into()])
    }
}

/// The ROUTE policy. Pure and synchronous, so the boundary cases are
/// easy to test exhaustively.
fn decide(
    top_similarity: Option<f32>,
    empty: bool,
    clarify_count: u32,
    chat: &ChatConfig,
) -> RouteDecision {
    let budget_left = clarify_count < chat.max_clarify;
    let (target, reason) = if empty {
        if budget_left {
            (RouterState::Clarify, RouteReason::NoEvidence)
        } else {
            // Answering with empty context forces an abstention.
            (RouterState::Answer, RouteReason::BudgetExhausted)
        }
    } else {
        let similarity = top_similarity.unwrap_or(0.0);
        if similarity >= chat.similarity_threshold {
            (RouterState::Answer, RouteReason::AboveThreshold)
        } else if similarity < chat.reclarify_threshold && budget_left {
            (RouterState::Clarify, RouteReason::LowConfidence)
        } else {
            (RouterState::Answer, RouteReason::SafetyNet)
        }
    };
    RouteDecision {
        target,
        reason,
        top_similarity,
        threshold: chat.similarity_threshold,
        reclarify_threshold: chat.reclarify_threshold,
        clarify_count,
        max_clarify: chat.max_clarify,
    }
}

/// Fallback clarification built from retrieval diagnostics: name the top
/// two distinct documents and ask the user to pick.
fn synthesize_clarification(passages: &[RetrievedPassage]) -> (String, Option<String>) {
    let mut titles: Vec<&str> = Vec::new();
    for passage in passages {
        let title = passage.document.title.as_str();
        if !title.is_empty() && !titles.contains(&title) {
            titles.push(title);
        }
        if titles.len() == 2 {
            break;
        }
    }
    match titles.as_slice() {
        [first, second] => (
            format!("Are you asking about \"{first}\" or \"{second}\"?"),
            None,
        ),
        [only] => (
            format!("Are you asking about \"{only}\"? Could you be more specific?"),
            Some((*only).to_string()),
        ),
        _ => (
            "Could you clarify the specific program or topic you mean?".to_string(),
            None,
        ),
    }
}

fn abstention_for_failure(error: AnswerError) -> AnswerArtifact {
    let core: Error = error.into();
    AnswerArtifact::abstain(format!("{}: {core}", core.kind()))
        .with_missing(vec!["A working generation backend".into()])
}

/// The pending question is settled: record the assistant turn and clear
/// the clarification state.
fn finish_question(session: &Session, artifact: &AnswerArtifact) {
    session.append_turn(
        Turn::assistant(&artifact.answer).with_metadata(serde_json::json!({
            "kind": artifact.kind.as_str(),
            "abstained": artifact.abstained,
            "faithfulness": artifact.faithfulness,
            "completeness": artifact.completeness,
        })),
    );
    let mut state = session.conversation.lock();
    state.clarify_count = 0;
    state.pending_question = None;
    state.last_clarification = None;
    state.focus_hint = None;
}

/// A clarification went out: bump the budget counter and remember what
/// we asked and what for.
fn record_clarification(
    session: &Session,
    pending_question: &str,
    clarification: &str,
    focus_topic: Option<String>,
) {
    session.append_turn(
        Turn::assistant(clarification).with_metadata(serde_json::json!({
            "kind": "clarification",
        })),
    );
    let mut state = session.conversation.lock();
    state.clarify_count += 1;
    state.pending_question = Some(pending_question.to_string());
    state.last_clarification = Some(clarification.to_string());
    if focus_topic.is_some() {
        state.focus_hint = focus_topic;
    }
}
