//! Hybrid retrieval
//!
//! Dense KNN, BM25 over chunk text and BM25 over document metadata
//! (expanded to chunks) fan out in parallel and are fused with
//! Reciprocal Rank Fusion, then adjusted by a clamped heuristic. Output is
//! deterministic for a fixed query, configuration and store snapshot.

pub mod boost;
pub mod hybrid;

pub use boost::{freshness_decay, heuristic_boost};
pub use hybrid::{HybridRetriever, RetrievalDiagnostics, RetrievalOutcome};

use thiserror::Error;

/// Retrieval errors. A single failing sub-retriever is absorbed; this
/// surfaces only when nothing can run at all.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("all sub-retrievers failed: {0}")]
    AllRetrieversFailed(String),

    #[error("index error: {0}")]
    Index(#[from] parley_index::IndexError),
}

impl From<RetrievalError> for parley_core::Error {
    fn from(err: RetrievalError) -> Self {
        parley_core::Error::RetrievalBackendFailure(err.to_string())
    }
}
