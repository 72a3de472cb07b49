//! Vector/keyword index adapter
//!
//! A narrow, uniform read surface over the storage engine:
//! - dense KNN over chunk embeddings
//! - BM25 over chunk text (Tantivy)
//! - BM25 over concatenated document metadata (Tantivy)
//! - chunk resolution to text + chunk metadata + document snapshot
//!
//! Two implementations: [`MemoryIndex`] (brute-force cosine + in-RAM
//! Tantivy) for tests and single-node development, and [`QdrantIndex`]
//! for a Qdrant-backed deployment. Both are read-only from the core's
//! point of view; writes belong to the ingestion pipeline.

pub mod adapter;
pub mod doc_store;
pub mod memory;
pub mod metadata;
pub mod qdrant;
pub mod text_index;

pub use adapter::{IndexAdapter, ResolvedChunk, ScoredChunk, ScoredDoc, SearchFilter};
pub use doc_store::DocumentStore;
pub use memory::MemoryIndex;
pub use qdrant::QdrantIndex;
pub use text_index::TextIndex;

use thiserror::Error;

/// Index adapter errors. Engine failures are never swallowed; empty
/// result sets without an error are legal.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("unknown chunk: {0}")]
    UnknownChunk(String),

    #[error("unknown document: {0}")]
    UnknownDocument(String),

    #[error("metadata decode error: {0}")]
    Metadata(String),
}

impl From<IndexError> for parley_core::Error {
    fn from(err: IndexError) -> Self {
        parley_core::Error::RetrievalBackendFailure(err.to_string())
    }
}
