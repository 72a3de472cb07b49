//! Qdrant-backed index adapter
//!
//! Dense KNN runs against a Qdrant collection whose points carry the
//! chunk's flat scalar payload (body under `text`, chunk fields from the
//! metadata codec). BM25 runs against the shared Tantivy indexes and
//! document metadata resolves through the [`DocumentStore`]. The adapter
//! is read-only; the ingestion pipeline owns all writes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use qdrant_client::qdrant::{value::Kind, GetPointsBuilder, PointId, SearchPointsBuilder};
use qdrant_client::Qdrant;

use parley_core::{ChunkRef, DocRef};
use parley_config::StorageConfig;

use crate::adapter::{
    sort_scored_chunks, sort_scored_docs, IndexAdapter, ResolvedChunk, ScoredChunk, ScoredDoc,
    SearchFilter,
};
use crate::doc_store::DocumentStore;
use crate::metadata::chunk_from_fields;
use crate::text_index::TextIndex;
use crate::IndexError;

const FILTER_OVERFETCH: u64 = 4;

pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    text: TextIndex,
    docs: DocumentStore,
}

impl QdrantIndex {
    /// Connect using the storage section of the settings. No cached
    /// iterators are held across requests, so writes landing between
    /// requests are picked up on the next search.
    pub fn connect(config: &StorageConfig) -> Result<Self, IndexError> {
        let client = Qdrant::from_url(&config.qdrant_endpoint)
            .timeout(std::time::Duration::from_secs(config.read_timeout_secs))
            .build()
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        let text = if config.index_path.is_empty() {
            TextIndex::in_ram()?
        } else {
            TextIndex::open(std::path::Path::new(&config.index_path))?
        };
        let docs = DocumentStore::open(&config.doc_store_path)?;
        Ok(Self {
            client,
            collection: config.collection.clone(),
            text,
            docs,
        })
    }

    fn doc_passes(&self, doc_id: &DocRef, filter: Option<&SearchFilter>) -> bool {
        match filter {
            Some(f) if !f.is_empty() => self
                .docs
                .get(doc_id)
                .map(|doc| f.matches(&doc))
                .unwrap_or(false),
            _ => true,
        }
    }

    fn chunk_passes(&self, chunk: &ChunkRef, filter: Option<&SearchFilter>) -> bool {
        match chunk.doc_ref() {
            Some(doc_id) => self.doc_passes(&doc_id, filter),
            None => false,
        }
    }
}

fn payload_to_fields(
    payload: std::collections::HashMap<String, qdrant_client::qdrant::Value>,
) -> (BTreeMap<String, String>, String) {
    let mut fields = BTreeMap::new();
    let mut text = String::new();
    for (key, value) in payload {
        if let Some(Kind::StringValue(s)) = value.kind {
            if key == "text" {
                text = s;
            } else {
                fields.insert(key, s);
            }
        }
    }
    (fields, text)
}

fn point_id_to_string(id: Option<PointId>) -> String {
    id.and_then(|pid| pid.point_id_options)
        .map(|options| match options {
            qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u) => u,
            qdrant_client::qdrant::point_id::PointIdOptions::Num(n) => n.to_string(),
        })
        .unwrap_or_default()
}

#[async_trait]
impl IndexAdapter for QdrantIndex {
    async fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let fetch = match filter {
            Some(f) if !f.is_empty() => k as u64 * FILTER_OVERFETCH,
            _ => k as u64,
        };
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, query.to_vec(), fetch)
                    .with_payload(false),
            )
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let mut results: Vec<ScoredChunk> = response
            .result
            .into_iter()
            .map(|point| ScoredChunk {
                chunk: ChunkRef(point_id_to_string(point.id)),
                // Qdrant cosine scores live in [-1, 1]; normalize.
                score: (point.score + 1.0) / 2.0,
            })
            .filter(|hit| self.chunk_passes(&hit.chunk, filter))
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
            Some(f) if !f.is_empty() => k * FILTER_OVERFETCH as usize,
            _ => k,
        };
        let mut results: Vec<ScoredChunk> = self
            .text
            .search_chunks(query, fetch)?
            .into_iter()
            .map(|(id, score)| ScoredChunk {
                chunk: ChunkRef(id),
                score,
            })
            .filter(|hit| self.chunk_passes(&hit.chunk, filter))
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
            Some(f) if !f.is_empty() => k * FILTER_OVERFETCH as usize,
            _ => k,
        };
        let mut results: Vec<ScoredDoc> = self
            .text
            .search_doc_meta(query, fetch)?
            .into_iter()
            .map(|(id, score)| ScoredDoc {
                doc: DocRef(id),
                score,
            })
            .filter(|hit| self.doc_passes(&hit.doc, filter))
            .collect();
        sort_scored_docs(&mut results);
        results.truncate(k);
        Ok(results)
    }

    async fn doc_chunks(&self, doc: &DocRef, m: usize) -> Result<Vec<ChunkRef>, IndexError> {
        // Chunk ids are `<docId>_chunk_<ordinal>` with dense ordinals, so
        // position order is ordinal order.
        if self.docs.get(doc).is_none() {
            return Err(IndexError::UnknownDocument(doc.to_string()));
        }
        Ok((0..m).map(|ordinal| ChunkRef::compose(doc, ordinal)).collect())
    }

    async fn resolve(&self, chunk: &ChunkRef) -> Result<ResolvedChunk, IndexError> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(
                    &self.collection,
                    vec![PointId::from(chunk.as_str().to_string())],
                )
                .with_payload(true),
            )
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let point = response
            .result
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::UnknownChunk(chunk.to_string()))?;
        let (fields, text) = payload_to_fields(point.payload);
        let record = chunk_from_fields(&fields, text.clone())?;
        let document = self
            .docs
            .get(&record.doc)
            .ok_or_else(|| IndexError::UnknownDocument(record.doc.to_string()))?;
        Ok(ResolvedChunk {
            text,
            chunk: record,
            document,
        })
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}
