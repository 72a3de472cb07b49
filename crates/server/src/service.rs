//! Query-time facade
//!
//! `ask(session, utterance)` is the single entry point: resolve the
//! session, serialize on its request lock, run the router under the
//! request deadline, and hand back the artifact with diagnostics.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use parley_config::{RetrievalMethod, RoutingStrategy, Settings};
use parley_core::{AnswerArtifact, Error, RetrievedPassage, Turn};
use parley_router::{Router, RouterDiagnostics};
use parley_session::SessionManager;

/// One source entry of the chat response.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub text: String,
    pub score: f32,
    pub rank: usize,
}

const SOURCE_PREVIEW_CHARS: usize = 200;

impl From<&RetrievedPassage> for SourceInfo {
    fn from(passage: &RetrievedPassage) -> Self {
        let mut text = passage.text.clone();
        if text.len() > SOURCE_PREVIEW_CHARS {
            let mut cut = SOURCE_PREVIEW_CHARS;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            text.push_str("...");
        }
        Self {
            chunk_id: passage.chunk.as_str().to_string(),
            doc_id: passage.document.id.as_str().to_string(),
            title: passage.document.title.clone(),
            text,
            score: passage.fused,
            rank: passage.rank,
        }
    }
}

/// The terminal value of `ask`.
#[derive(Debug)]
pub struct AskResponse {
    pub session_id: String,
    pub artifact: AnswerArtifact,
    pub sources: Vec<SourceInfo>,
    pub passages: Vec<RetrievedPassage>,
    pub generated_by: String,
    pub diagnostics: RouterDiagnostics,
    pub timestamp: String,
}

/// Partial update for the chat configuration endpoint. Absent fields
/// keep their current values; the merged result must validate.
#[derive(Debug, Default, Deserialize)]
pub struct ChatConfigPatch {
    pub retrieval_method: Option<RetrievalMethod>,
    pub routing_strategy: Option<RoutingStrategy>,
    pub retrieval_top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub max_clarify: Option<u32>,
    pub reclarify_threshold: Option<f32>,
    pub window_k: Option<usize>,
    pub hybrid_config: Option<HybridConfigPatch>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HybridConfigPatch {
    pub k_embed: Option<usize>,
    pub k_bm25_chunk: Option<usize>,
    pub k_bm25_meta_docs: Option<usize>,
    pub k_rrf: Option<usize>,
    pub k_final: Option<usize>,
}

pub struct AskService {
    router: Router,
    sessions: Arc<SessionManager>,
    config: Arc<RwLock<Settings>>,
}

impl AskService {
    pub fn new(
        router: Router,
        sessions: Arc<SessionManager>,
        config: Arc<RwLock<Settings>>,
    ) -> Self {
        Self {
            router,
            sessions,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Answer one utterance.
    ///
    /// With a session id, the session must exist and be unexpired.
    /// Without one, a session is created lazily; client-supplied history
    /// seeds only that fresh session. For existing sessions the server's
    /// record is authoritative.
    pub async fn ask(
        &self,
        session_id: Option<&str>,
        utterance: &str,
        client_history: Option<Vec<Turn>>,
    ) -> Result<AskResponse, Error> {
        let session = match session_id {
            Some(id) => self.sessions.get(id).map_err(Error::from)?,
            None => {
                let session = self.sessions.create().map_err(Error::from)?;
                if let Some(history) = client_history {
                    session.seed_history(history);
                }
                session
            }
        };

        let (chat, hybrid, strategy, deadline) = {
            let settings = self.config.read();
            (
                settings.chat.clone(),
                settings.hybrid.clone(),
                settings.chat.routing_strategy,
                Duration::from_secs(settings.limits.request_deadline_secs),
            )
        };

        let run = async {
            // Per-session serialization: one FSM transition at a time.
            let _guard = session.lock_request().await;
            session.touch();
            match strategy {
                RoutingStrategy::Intelligent => {
                    self.router.handle(&session, utterance, &chat, &hybrid).await
                }
                RoutingStrategy::Simple => {
                    self.router
                        .handle_simple(&session, utterance, &chat, &hybrid)
                        .await
                }
            }
        };

        let outcome = tokio::time::timeout(deadline, run)
            .await
            .map_err(|_| Error::DeadlineExceeded(deadline))??;

        Ok(AskResponse {
            session_id: session.id.clone(),
            sources: outcome.passages.iter().map(SourceInfo::from).collect(),
            passages: outcome.passages,
            generated_by: outcome.generated_by.to_string(),
            diagnostics: outcome.diagnostics,
            artifact: outcome.artifact,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    /// Current chat configuration as the wire shape.
    pub fn chat_config(&self) -> serde_json::Value {
        let settings = self.config.read();
        serde_json::json!({
            "retrieval_method": settings.chat.retrieval_method,
            "routing_strategy": settings.chat.routing_strategy,
            "retrieval_top_k": settings.chat.retrieval_top_k,
            "similarity_threshold": settings.chat.similarity_threshold,
            "max_clarify": settings.chat.max_clarify,
            "reclarify_threshold": settings.chat.reclarify_threshold,
            "window_k": settings.session.window_k,
            "hybrid_config": {
                "k_embed": settings.hybrid.k_embed,
                "k_bm25_chunk": settings.hybrid.k_bm25_chunk,
                "k_bm25_meta_docs": settings.hybrid.k_bm25_meta_docs,
                "k_rrf": settings.hybrid.k_rrf,
                "k_final": settings.hybrid.k_final,
            },
        })
    }

    /// Apply a partial configuration update. The merged settings are
    /// validated before anything is committed; an invalid combination
    /// leaves the running configuration untouched.
    pub fn update_chat_config(&self, patch: ChatConfigPatch) -> Result<(), Error> {
        let mut settings = self.config.write();
        let mut candidate = settings.clone();

        if let Some(value) = patch.retrieval_method {
            candidate.chat.retrieval_method = value;
        }
        if let Some(value) = patch.routing_strategy {
            candidate.chat.routing_strategy = value;
        }
        if let Some(value) = patch.retrieval_top_k {
            candidate.chat.retrieval_top_k = value;
        }
        if let Some(value) = patch.similarity_threshold {
            candidate.chat.similarity_threshold = value;
        }
        if let Some(value) = patch.max_clarify {
            candidate.chat.max_clarify = value;
        }
        if let Some(value) = patch.reclarify_threshold {
            candidate.chat.reclarify_threshold = value;
        }
        if let Some(value) = patch.window_k {
            candidate.session.window_k = value;
        }
        if let Some(hybrid) = patch.hybrid_config {
            if let Some(value) = hybrid.k_embed {
                candidate.hybrid.k_embed = value;
            }
            if let Some(value) = hybrid.k_bm25_chunk {
                candidate.hybrid.k_bm25_chunk = value;
            }
            if let Some(value) = hybrid.k_bm25_meta_docs {
                candidate.hybrid.k_bm25_meta_docs = value;
            }
            if let Some(value) = hybrid.k_rrf {
                candidate.hybrid.k_rrf = value;
            }
            if let Some(value) = hybrid.k_final {
                candidate.hybrid.k_final = value;
            }
        }

        candidate.validate().map_err(Error::from)?;
        *settings = candidate;
        tracing::info!("chat configuration updated");
        Ok(())
    }
}
