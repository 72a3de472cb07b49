//! Retrieved passages with per-signal diagnostic scores

use serde::{Deserialize, Serialize};

use crate::document::{ChunkRef, Document};

/// Per-signal scores for one passage. A signal the passage was absent
/// from stays `None`; the fused score is always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalScores {
    /// Cosine similarity normalized to [0, 1].
    pub dense: Option<f32>,
    pub bm25_chunk: Option<f32>,
    pub bm25_meta: Option<f32>,
    /// Additive heuristic adjustment applied on top of the RRF score.
    pub heuristic: f32,
}

/// One ranked passage as returned by the hybrid retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk: ChunkRef,
    pub text: String,
    pub signals: SignalScores,
    /// Reciprocal-rank-fusion score plus the heuristic adjustment.
    pub fused: f32,
    /// Snapshot of the owning document's metadata at retrieval time.
    pub document: Document,
    /// 1-based final rank.
    pub rank: usize,
}

impl RetrievedPassage {
    /// Best available similarity signal for routing: dense when present,
    /// otherwise the fused score.
    pub fn routing_score(&self) -> f32 {
        self.signals.dense.unwrap_or(self.fused)
    }
}
