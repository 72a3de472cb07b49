//! The `IndexAdapter` trait and its result types

use async_trait::async_trait;

use parley_core::{Chunk, ChunkRef, DocKind, DocRef, Document};

use crate::IndexError;

/// A chunk with its retrieval score. `knn` scores are cosine similarity
/// normalized to [0, 1]; BM25 scores are raw.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: ChunkRef,
    pub score: f32,
}

/// A document with its metadata-BM25 score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc: DocRef,
    pub score: f32,
}

/// A fully resolved chunk: body text, chunk metadata, and a snapshot of
/// the owning document's metadata.
#[derive(Debug, Clone)]
pub struct ResolvedChunk {
    pub text: String,
    pub chunk: Chunk,
    pub document: Document,
}

/// Equality / set-containment predicates on document metadata. Empty
/// filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<DocKind>,
    pub language: Option<String>,
    /// Set containment against the document's category list.
    pub category: Option<String>,
    /// Set containment against the document's product-entity list.
    pub product: Option<String>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: DocKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none()
            && self.language.is_none()
            && self.category.is_none()
            && self.product.is_none()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(kind) = self.kind {
            if doc.kind != kind {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if &doc.language != language {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if !doc.categories.iter().any(|c| c == category) {
                return false;
            }
        }
        if let Some(product) = &self.product {
            if !doc.product_entities.iter().any(|p| p == product) {
                return false;
            }
        }
        true
    }
}

/// Uniform read surface over the storage engine. All operations observe a
/// single consistent snapshot for the duration of one request; results
/// are sorted by score descending with ties broken by identifier
/// ascending.
#[async_trait]
pub trait IndexAdapter: Send + Sync {
    /// Dense nearest-neighbor search. Scores are cosine similarity
    /// normalized into [0, 1].
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    /// BM25 over chunk text.
    async fn bm25_chunk(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    /// BM25 over concatenated document metadata (title + categories +
    /// product entities + kind).
    async fn bm25_meta(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDoc>, IndexError>;

    /// Top `m` chunks of a document, in position order.
    async fn doc_chunks(&self, doc: &DocRef, m: usize) -> Result<Vec<ChunkRef>, IndexError>;

    async fn resolve(&self, chunk: &ChunkRef) -> Result<ResolvedChunk, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

/// Deterministic ordering shared by every adapter: score descending,
/// identifier ascending on ties.
pub(crate) fn sort_scored_chunks(results: &mut [ScoredChunk]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.cmp(&b.chunk))
    });
}

pub(crate) fn sort_scored_docs(results: &mut [ScoredDoc]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc.cmp(&b.doc))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_by_identifier_ascending() {
        let mut results = vec![
            ScoredChunk {
                chunk: ChunkRef("d_chunk_2".into()),
                score: 0.5,
            },
            ScoredChunk {
                chunk: ChunkRef("d_chunk_1".into()),
                score: 0.5,
            },
            ScoredChunk {
                chunk: ChunkRef("d_chunk_0".into()),
                score: 0.9,
            },
        ];
        sort_scored_chunks(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.chunk.as_str()).collect();
        assert_eq!(ids, vec!["d_chunk_0", "d_chunk_1", "d_chunk_2"]);
    }

    #[test]
    fn filter_matches_on_containment() {
        let doc = Document {
            id: DocRef("d".into()),
            url: "local".into(),
            kind: DocKind::Faq,
            language: "en".into(),
            title: "t".into(),
            published_at: None,
            updated_at: None,
            effective_at: None,
            expires_at: None,
            geo_scope: String::new(),
            currency: String::new(),
            product_entities: vec!["Preferred Deposits".into()],
            categories: vec!["rates".into(), "deposits".into()],
            authority: 0.5,
            source_path: String::new(),
        };
        assert!(SearchFilter::new().category("rates").matches(&doc));
        assert!(!SearchFilter::new().category("loans").matches(&doc));
        assert!(SearchFilter::new()
            .kind(DocKind::Faq)
            .product("Preferred Deposits")
            .matches(&doc));
        assert!(SearchFilter::new().is_empty());
    }
}
