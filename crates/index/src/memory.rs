//! In-memory index adapter
//!
//! Brute-force cosine over stored embeddings plus the shared Tantivy RAM
//! indexes for BM25. Backs the test suites and single-node development;
//! also the seeding surface the (out-of-scope) ingestion pipeline drives.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use parley_core::{Chunk, ChunkRef, DocRef, Document};

use crate::adapter::{
    sort_scored_chunks, sort_scored_docs, IndexAdapter, ResolvedChunk, ScoredChunk, ScoredDoc,
    SearchFilter,
};
use crate::text_index::TextIndex;
use crate::IndexError;

/// Overfetch factor when a metadata filter must be applied after the
/// lexical search.
const FILTER_OVERFETCH: usize = 4;

#[derive(Default)]
struct Inner {
    chunks: HashMap<ChunkRef, (Chunk, Vec<f32>)>,
    docs: HashMap<DocRef, Document>,
    /// Chunk ids per document, position order.
    doc_chunks: HashMap<DocRef, Vec<ChunkRef>>,
}

pub struct MemoryIndex {
    text: TextIndex,
    inner: RwLock<Inner>,
}

impl MemoryIndex {
    pub fn new() -> Result<Self, IndexError> {
        Ok(Self {
            text: TextIndex::in_ram()?,
            inner: RwLock::new(Inner::default()),
        })
    }

    /// Insert a document with its chunks and their embeddings. Replaces
    /// any previous version of the same document.
    pub fn insert_document(
        &self,
        doc: Document,
        chunks: Vec<(Chunk, Vec<f32>)>,
    ) -> Result<(), IndexError> {
        let mut inner = self.inner.write();
        if let Some(old) = inner.doc_chunks.remove(&doc.id) {
            for chunk_id in old {
                inner.chunks.remove(&chunk_id);
                self.text.delete_chunk(chunk_id.as_str());
            }
            self.text.delete_doc_meta(doc.id.as_str());
        }

        self.text.add_doc_meta(doc.id.as_str(), &doc.metadata_text())?;

        let mut ordered: Vec<(Chunk, Vec<f32>)> = chunks;
        ordered.sort_by_key(|(c, _)| c.position);
        let mut ids = Vec::with_capacity(ordered.len());
        for (chunk, embedding) in ordered {
            self.text.add_chunk(chunk.id.as_str(), &chunk.text)?;
            ids.push(chunk.id.clone());
            inner.chunks.insert(chunk.id.clone(), (chunk, embedding));
        }
        inner.doc_chunks.insert(doc.id.clone(), ids);
        inner.docs.insert(doc.id.clone(), doc);
        drop(inner);

        self.text.commit()
    }

    fn doc_of(&self, inner: &Inner, chunk: &ChunkRef) -> Option<Document> {
        let (record, _) = inner.chunks.get(chunk)?;
        inner.docs.get(&record.doc).cloned()
    }

    fn passes_filter(&self, inner: &Inner, chunk: &ChunkRef, filter: &SearchFilter) -> bool {
        self.doc_of(inner, chunk)
            .map(|doc| filter.matches(&doc))
            .unwrap_or(false)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[async_trait]
impl IndexAdapter for MemoryIndex {
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let inner = self.inner.read();
        let mut results: Vec<ScoredChunk> = inner
            .chunks
            .iter()
            .filter(|(id, _)| match filter {
                Some(f) if !f.is_empty() => self.passes_filter(&inner, id, f),
                _ => true,
            })
            .map(|(id, (_, embedding))| ScoredChunk {
                chunk: id.clone(),
                // Normalize cosine from [-1, 1] into [0, 1].
                score: (cosine(query, embedding) + 1.0) / 2.0,
            })
            .collect();
        sort_scored_chunks(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn bm25_chunk(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let fetch = match filter {
            Some(f) if !f.is_empty() => k * FILTER_OVERFETCH,
            _ => k,
        };
        let hits = self.text.search_chunks(query, fetch)?;
        let inner = self.inner.read();
        let mut results: Vec<ScoredChunk> = hits
            .into_iter()
            .map(|(id, score)| ScoredChunk {
                chunk: ChunkRef(id),
                score,
            })
            .filter(|hit| match filter {
                Some(f) if !f.is_empty() => self.passes_filter(&inner, &hit.chunk, f),
                _ => true,
            })
            .collect();
        sort_scored_chunks(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn bm25_meta(
        &self,
        query: &str,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredDoc>, IndexError> {
        let fetch = match filter {
            Some(f) if !f.is_empty() => k * FILTER_OVERFETCH,
            _ => k,
        };
        let hits = self.text.search_doc_meta(query, fetch)?;
        let inner = self.inner.read();
        let mut results: Vec<ScoredDoc> = hits
            .into_iter()
            .map(|(id, score)| ScoredDoc {
                doc: DocRef(id),
                score,
            })
            .filter(|hit| match filter {
                Some(f) if !f.is_empty() => inner
                    .docs
                    .get(&hit.doc)
                    .map(|doc| f.matches(doc))
                    .unwrap_or(false),
                _ => true,
            })
            .collect();
        sort_scored_docs(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn doc_chunks(&self, doc: &DocRef, m: usize) -> Result<Vec<ChunkRef>, IndexError> {
        let inner = self.inner.read();
        let ids = inner
            .doc_chunks
            .get(doc)
            .ok_or_else(|| IndexError::UnknownDocument(doc.to_string()))?;
        Ok(ids.iter().take(m).cloned().collect())
    }

    async fn resolve(&self, chunk: &ChunkRef) -> Result<ResolvedChunk, IndexError> {
        let inner = self.inner.read();
        let (record, _) = inner
            .chunks
            .get(chunk)
            .ok_or_else(|| IndexError::UnknownChunk(chunk.to_string()))?;
        let document = inner
            .docs
            .get(&record.doc)
            .cloned()
            .ok_or_else(|| IndexError::UnknownDocument(record.doc.to_string()))?;
        Ok(ResolvedChunk {
            text: record.text.clone(),
            chunk: record.clone(),
            document,
        })
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.inner.read().chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::DocKind;

    fn doc(id: &str, title: &str, kind: DocKind) -> Document {
        Document {
            id: DocRef(id.into()),
            url: "local".into(),
            kind,
            language: "en".into(),
            title: title.into(),
            published_at: None,
            updated_at: None,
            effective_at: None,
            expires_at: None,
            geo_scope: String::new(),
            currency: "USD".into(),
            product_entities: Vec::new(),
            categories: Vec::new(),
            authority: 0.6,
            source_path: String::new(),
        }
    }

    fn chunk(doc_id: &str, position: usize, text: &str) -> Chunk {
        let doc = DocRef(doc_id.into());
        Chunk {
            id: ChunkRef::compose(&doc, position),
            doc,
            position,
            text: text.into(),
            token_count: text.split_whitespace().count(),
            has_numbers: text.chars().any(|c| c.is_ascii_digit()),
            has_currency: text.contains('$'),
            start_line: 0,
            end_line: 0,
            start_char: 0,
            end_char: text.len(),
            embedding_version: "test-v1".into(),
        }
    }

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new().unwrap();
        index
            .insert_document(
                doc("tiers", "Preferred Rewards tiers", DocKind::Disclosure),
                vec![
                    (
                        chunk("tiers", 0, "Gold tier requires $20,000 in combined balances."),
                        vec![1.0, 0.0, 0.0],
                    ),
                    (
                        chunk("tiers", 1, "Platinum tier requires $50,000 in combined balances."),
                        vec![0.9, 0.1, 0.0],
                    ),
                ],
            )
            .unwrap();
        index
            .insert_document(
                doc("faq", "General FAQ", DocKind::Faq),
                vec![(
                    chunk("faq", 0, "Branches open at nine in the morning."),
                    vec![0.0, 1.0, 0.0],
                )],
            )
            .unwrap();
        index
    }

    #[tokio::test]
    async fn knn_normalizes_and_orders() {
        let index = seeded();
        let results = index.knn(&[1.0, 0.0, 0.0], 3, None).await.unwrap();
        assert_eq!(results[0].chunk.as_str(), "tiers_chunk_0");
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn knn_respects_filter() {
        let index = seeded();
        let filter = SearchFilter::new().kind(DocKind::Faq);
        let results = index.knn(&[1.0, 0.0, 0.0], 3, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.as_str(), "faq_chunk_0");
    }

    #[tokio::test]
    async fn bm25_chunk_finds_lexical_matches() {
        let index = seeded();
        let results = index.bm25_chunk("combined balances", 5, None).await.unwrap();
        assert!(results.len() >= 2);
        assert!(results[0].chunk.as_str().starts_with("tiers_chunk_"));
    }

    #[tokio::test]
    async fn bm25_meta_matches_title() {
        let index = seeded();
        let results = index.bm25_meta("Preferred Rewards", 5, None).await.unwrap();
        assert_eq!(results[0].doc.as_str(), "tiers");
    }

    #[tokio::test]
    async fn doc_chunks_in_position_order() {
        let index = seeded();
        let ids = index.doc_chunks(&DocRef("tiers".into()), 2).await.unwrap();
        assert_eq!(
            ids.iter().map(|c| c.as_str()).collect::<Vec<_>>(),
            vec!["tiers_chunk_0", "tiers_chunk_1"]
        );
    }

    #[tokio::test]
    async fn resolve_returns_document_snapshot() {
        let index = seeded();
        let resolved = index
            .resolve(&ChunkRef("tiers_chunk_0".into()))
            .await
            .unwrap();
        assert_eq!(resolved.document.title, "Preferred Rewards tiers");
        assert!(resolved.text.contains("$20,000"));
        assert!(resolved.chunk.has_currency);
    }

    #[tokio::test]
    async fn resolve_unknown_chunk_errors() {
        let index = seeded();
        let err = index.resolve(&ChunkRef("nope_chunk_0".into())).await;
        assert!(matches!(err, Err(IndexError::UnknownChunk(_))));
    }

    #[tokio::test]
    async fn reingestion_replaces_document() {
        let index = seeded();
        index
            .insert_document(
                doc("tiers", "Preferred Rewards tiers", DocKind::Disclosure),
                vec![(
                    chunk("tiers", 0, "Gold tier now requires $25,000."),
                    vec![1.0, 0.0, 0.0],
                )],
            )
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 2);
        let resolved = index
            .resolve(&ChunkRef("tiers_chunk_0".into()))
            .await
            .unwrap();
        assert!(resolved.text.contains("$25,000"));
    }
}
