//! Hybrid retriever with RRF fusion

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use parley_config::{HybridConfig, RetrievalMethod};
use parley_core::{ChunkRef, RetrievedPassage, SignalScores};
use parley_index::{IndexAdapter, IndexError, ResolvedChunk, ScoredChunk, SearchFilter};
use parley_llm::LanguageModel;

use crate::boost::heuristic_boost;
use crate::RetrievalError;

/// Diagnostics attached to every retrieval, surfaced through the chat
/// response's debug block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalDiagnostics {
    pub chunk_count: usize,
    pub avg_fused: f32,
    pub max_fused: f32,
    pub min_fused: f32,
    /// Total character length of the returned passage texts.
    pub context_length: usize,
    /// Candidates contributed by each sub-retriever.
    pub dense_hits: usize,
    pub bm25_chunk_hits: usize,
    pub bm25_meta_hits: usize,
    /// True when the embedding failed and the retriever fell back to
    /// BM25-only fusion.
    pub degraded_bm25_only: bool,
    /// Non-fatal sub-retriever failures.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub passages: Vec<RetrievedPassage>,
    pub diagnostics: RetrievalDiagnostics,
}

/// Per-chunk fusion bookkeeping. Ranks are 1-based within their list.
#[derive(Debug, Default, Clone)]
struct PoolEntry {
    dense_rank: Option<usize>,
    dense_score: Option<f32>,
    bm25_rank: Option<usize>,
    bm25_score: Option<f32>,
    meta_rank: Option<usize>,
    meta_score: Option<f32>,
}

impl PoolEntry {
    fn rrf(&self, c: f32) -> f32 {
        [self.dense_rank, self.bm25_rank, self.meta_rank]
            .iter()
            .flatten()
            .map(|rank| 1.0 / (c + *rank as f32))
            .sum()
    }
}

pub struct HybridRetriever {
    index: Arc<dyn IndexAdapter>,
    llm: Arc<dyn LanguageModel>,
}

impl HybridRetriever {
    pub fn new(index: Arc<dyn IndexAdapter>, llm: Arc<dyn LanguageModel>) -> Self {
        Self { index, llm }
    }

    /// Run the configured retrieval and return ranked passages with
    /// per-signal scores. Deterministic for a fixed query, configuration
    /// and store snapshot.
    pub async fn search(
        &self,
        query: &str,
        filter: Option<&SearchFilter>,
        config: &HybridConfig,
        method: RetrievalMethod,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let mut diagnostics = RetrievalDiagnostics::default();

        // Dense embedding comes from the LLM collaborator; losing it
        // degrades hybrid retrieval to BM25-only instead of failing.
        let embedding = match self.llm.embed(query).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                diagnostics.degraded_bm25_only = true;
                diagnostics.errors.push(format!("embedding: {e}"));
                tracing::warn!(error = %e, "embedding unavailable, BM25-only retrieval");
                None
            }
        };

        let lexical = method == RetrievalMethod::Hybrid;
        if !lexical && embedding.is_none() {
            return Err(RetrievalError::AllRetrieversFailed(
                diagnostics.errors.join("; "),
            ));
        }

        let dense_future = async {
            match &embedding {
                Some(vector) => self.index.knn(vector, config.k_embed, filter).await,
                None => Ok(Vec::new()),
            }
        };
        let bm25_future = async {
            if lexical {
                self.index
                    .bm25_chunk(query, config.k_bm25_chunk, filter)
                    .await
            } else {
                Ok(Vec::new())
            }
        };
        let meta_future = async {
            if lexical {
                self.index
                    .bm25_meta(query, config.k_bm25_meta_docs, filter)
                    .await
            } else {
                Ok(Vec::new())
            }
        };

        let (dense_result, bm25_result, meta_result) =
            tokio::join!(dense_future, bm25_future, meta_future);

        let mut attempted = 0usize;
        let mut failed = 0usize;
        let mut absorb = |name: &str,
                          result: Result<Vec<ScoredChunk>, IndexError>,
                          diagnostics: &mut RetrievalDiagnostics|
         -> Vec<ScoredChunk> {
            attempted += 1;
            match result {
                Ok(hits) => hits,
                Err(e) => {
                    failed += 1;
                    diagnostics.errors.push(format!("{name}: {e}"));
                    tracing::warn!(retriever = name, error = %e, "sub-retriever failed");
                    Vec::new()
                }
            }
        };

        let dense_hits = if embedding.is_some() {
            absorb("dense", dense_result, &mut diagnostics)
        } else {
            Vec::new()
        };
        let bm25_hits = if lexical {
            absorb("bm25_chunk", bm25_result, &mut diagnostics)
        } else {
            Vec::new()
        };

        // Metadata-matched documents expand to their top chunks; the
        // expanded list keeps doc rank order, position order within docs.
        let meta_hits: Vec<(ChunkRef, f32)> = if lexical {
            attempted += 1;
            match meta_result {
                Ok(docs) => {
                    let mut expanded = Vec::new();
                    for scored in docs {
                        match self
                            .index
                            .doc_chunks(&scored.doc, config.m_chunks_per_doc)
                            .await
                        {
                            Ok(chunks) => expanded
                                .extend(chunks.into_iter().map(|c| (c, scored.score))),
                            Err(e) => {
                                diagnostics
                                    .errors
                                    .push(format!("bm25_meta expand {}: {e}", scored.doc));
                            }
                        }
                    }
                    expanded
                }
                Err(e) => {
                    failed += 1;
                    diagnostics.errors.push(format!("bm25_meta: {e}"));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        if attempted > 0 && failed == attempted {
            return Err(RetrievalError::AllRetrieversFailed(
                diagnostics.errors.join("; "),
            ));
        }

        diagnostics.dense_hits = dense_hits.len();
        diagnostics.bm25_chunk_hits = bm25_hits.len();
        diagnostics.bm25_meta_hits = meta_hits.len();

        // Fusion pool: union of the three lists, keyed deterministically.
        let mut pool: BTreeMap<ChunkRef, PoolEntry> = BTreeMap::new();
        for (rank, hit) in dense_hits.iter().enumerate() {
            let entry = pool.entry(hit.chunk.clone()).or_default();
            entry.dense_rank = Some(rank + 1);
            entry.dense_score = Some(hit.score);
        }
        for (rank, hit) in bm25_hits.iter().enumerate() {
            let entry = pool.entry(hit.chunk.clone()).or_default();
            entry.bm25_rank = Some(rank + 1);
            entry.bm25_score = Some(hit.score);
        }
        for (rank, (chunk, score)) in meta_hits.iter().enumerate() {
            let entry = pool.entry(chunk.clone()).or_default();
            entry.meta_rank = Some(rank + 1);
            entry.meta_score = Some(*score);
        }

        let mut fused: Vec<(ChunkRef, PoolEntry, f32)> = pool
            .into_iter()
            .map(|(chunk, entry)| {
                let rrf = entry.rrf(config.rrf_c);
                (chunk, entry, rrf)
            })
            .collect();
        fused.sort_by(|a, b| {
            b.2.partial_cmp(&a.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        fused.truncate(config.k_rrf);

        // Resolve pool members. A stale id (write landed between
        // requests) is dropped; real backend errors surface.
        let mut resolved: Vec<(ChunkRef, PoolEntry, f32, ResolvedChunk)> = Vec::new();
        for (chunk, entry, rrf) in fused {
            match self.index.resolve(&chunk).await {
                Ok(record) => resolved.push((chunk, entry, rrf, record)),
                Err(IndexError::UnknownChunk(id)) => {
                    tracing::debug!(chunk = %id, "dropping unresolvable pool member");
                }
                Err(e) => return Err(RetrievalError::Index(e)),
            }
        }

        // Heuristic adjustment, clipped to ±20% of the median RRF score.
        let median_rrf = median(resolved.iter().map(|(_, _, rrf, _)| *rrf));
        let clip = 0.2 * median_rrf;
        let now = Utc::now();

        let mut scored: Vec<(ChunkRef, PoolEntry, f32, f32, ResolvedChunk)> = resolved
            .into_iter()
            .map(|(chunk, entry, rrf, record)| {
                let raw = heuristic_boost(&record.document, &record.chunk, config, now);
                let adjustment = raw.clamp(-clip, clip);
                (chunk, entry, rrf, adjustment, record)
            })
            .collect();

        scored.sort_by(|a, b| {
            let final_a = a.2 + a.3;
            let final_b = b.2 + b.3;
            final_b
                .partial_cmp(&final_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let dense_a = a.1.dense_score.unwrap_or(f32::MIN);
                    let dense_b = b.1.dense_score.unwrap_or(f32::MIN);
                    dense_b
                        .partial_cmp(&dense_a)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(config.k_final);

        let passages: Vec<RetrievedPassage> = scored
            .into_iter()
            .enumerate()
            .map(|(i, (chunk, entry, rrf, adjustment, record))| RetrievedPassage {
                chunk,
                text: record.text,
                signals: SignalScores {
                    dense: entry.dense_score,
                    bm25_chunk: entry.bm25_score,
                    bm25_meta: entry.meta_score,
                    heuristic: adjustment,
                },
                fused: rrf + adjustment,
                document: record.document,
                rank: i + 1,
            })
            .collect();

        diagnostics.chunk_count = passages.len();
        diagnostics.context_length = passages.iter().map(|p| p.text.len()).sum();
        if !passages.is_empty() {
            let fused_scores: Vec<f32> = passages.iter().map(|p| p.fused).collect();
            diagnostics.avg_fused =
                fused_scores.iter().sum::<f32>() / fused_scores.len() as f32;
            diagnostics.max_fused = fused_scores.iter().cloned().fold(f32::MIN, f32::max);
            diagnostics.min_fused = fused_scores.iter().cloned().fold(f32::MAX, f32::min);
        }

        tracing::debug!(
            chunks = diagnostics.chunk_count,
            avg_fused = diagnostics.avg_fused,
            degraded = diagnostics.degraded_bm25_only,
            "retrieval complete"
        );

        Ok(RetrievalOutcome {
            passages,
            diagnostics,
        })
    }

    /// Hint-assisted union retrieval: run the question and the focus hint
    /// separately, merge by chunk id keeping the higher fused score. Used
    /// when the utterance is an acknowledgement or a clarification reply.
    pub async fn search_with_hint(
        &self,
        query: &str,
        hint: Option<&str>,
        filter: Option<&SearchFilter>,
        config: &HybridConfig,
        method: RetrievalMethod,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let primary = self.search(query, filter, config, method).await?;
        let Some(hint) = hint.filter(|h| !h.trim().is_empty()) else {
            return Ok(primary);
        };

        // The hint pass is best-effort; its failure leaves the primary.
        let secondary = match self.search(hint, filter, config, method).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(error = %e, "hint retrieval failed, using primary only");
                return Ok(primary);
            }
        };

        let mut merged: BTreeMap<ChunkRef, RetrievedPassage> = BTreeMap::new();
        for passage in primary
            .passages
            .into_iter()
            .chain(secondary.passages.into_iter())
        {
            match merged.get(&passage.chunk) {
                Some(existing) if existing.fused >= passage.fused => {}
                _ => {
                    merged.insert(passage.chunk.clone(), passage);
                }
            }
        }

        let mut passages: Vec<RetrievedPassage> = merged.into_values().collect();
        passages.sort_by(|a, b| {
            b.fused
                .partial_cmp(&a.fused)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.cmp(&b.chunk))
        });
        passages.truncate(config.k_final);
        for (i, passage) in passages.iter_mut().enumerate() {
            passage.rank = i + 1;
        }

        let mut diagnostics = primary.diagnostics;
        diagnostics.chunk_count = passages.len();
        diagnostics.context_length = passages.iter().map(|p| p.text.len()).sum();

        Ok(RetrievalOutcome {
            passages,
            diagnostics,
        })
    }
}

fn median(values: impl Iterator<Item = f32>) -> f32 {
    let mut sorted: Vec<f32> = values.collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{Chunk, DocKind, DocRef, Document};
    use parley_index::MemoryIndex;
    use parley_llm::MockLanguageModel;

    const DIM: usize = 64;

    fn doc(id: &str, title: &str, authority: f32) -> Document {
        Document {
            id: DocRef(id.into()),
            url: "local".into(),
            kind: DocKind::Disclosure,
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
            authority,
            source_path: String::new(),
        }
    }

    fn chunk(doc_id: &str, position: usize, text: &str) -> (Chunk, Vec<f32>) {
        let doc = DocRef(doc_id.into());
        let embedding = MockLanguageModel::embedding_of(text, DIM);
        (
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
                embedding_version: "mock-v1".into(),
            },
            embedding,
        )
    }

    fn retriever_over(index: MemoryIndex) -> (HybridRetriever, Arc<MockLanguageModel>) {
        let llm = Arc::new(MockLanguageModel::new(DIM));
        let retriever = HybridRetriever::new(Arc::new(index), llm.clone());
        (retriever, llm)
    }

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new().unwrap();
        index
            .insert_document(
                doc("tiers", "Preferred Rewards tiers", 0.9),
                vec![
                    chunk("tiers", 0, "Gold tier requires $20,000 in combined balances."),
                    chunk("tiers", 1, "Platinum tier requires $50,000 in combined balances."),
                ],
            )
            .unwrap();
        index
            .insert_document(
                doc("fx", "FX wire fees", 0.8),
                vec![chunk(
                    "fx",
                    0,
                    "Foreign exchange outbound transfers settle in two days.",
                )],
            )
            .unwrap();
        index
    }

    #[tokio::test]
    async fn search_is_deterministic() {
        let (retriever, _) = retriever_over(seeded());
        let config = HybridConfig::default();
        let first = retriever
            .search("gold tier balance", None, &config, RetrievalMethod::Hybrid)
            .await
            .unwrap();
        let second = retriever
            .search("gold tier balance", None, &config, RetrievalMethod::Hybrid)
            .await
            .unwrap();
        let ids = |outcome: &RetrievalOutcome| {
            outcome
                .passages
                .iter()
                .map(|p| p.chunk.as_str().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert!(!first.passages.is_empty());
    }

    #[tokio::test]
    async fn ranks_are_sequential_and_signals_present() {
        let (retriever, _) = retriever_over(seeded());
        let outcome = retriever
            .search(
                "combined balances",
                None,
                &HybridConfig::default(),
                RetrievalMethod::Hybrid,
            )
            .await
            .unwrap();
        for (i, passage) in outcome.passages.iter().enumerate() {
            assert_eq!(passage.rank, i + 1);
        }
        // Lexical match on chunk text must contribute somewhere.
        assert!(outcome
            .passages
            .iter()
            .any(|p| p.signals.bm25_chunk.is_some()));
    }

    #[tokio::test]
    async fn metadata_match_surfaces_doc_whose_chunks_lack_the_words() {
        // "FX wire fees" appears only in the title; the chunk says
        // "foreign exchange outbound".
        let (retriever, _) = retriever_over(seeded());
        let outcome = retriever
            .search(
                "FX wire fees",
                None,
                &HybridConfig::default(),
                RetrievalMethod::Hybrid,
            )
            .await
            .unwrap();
        let top3: Vec<&str> = outcome
            .passages
            .iter()
            .take(3)
            .map(|p| p.chunk.as_str())
            .collect();
        assert!(top3.contains(&"fx_chunk_0"), "got {top3:?}");
        let fx = outcome
            .passages
            .iter()
            .find(|p| p.chunk.as_str() == "fx_chunk_0")
            .unwrap();
        assert!(fx.signals.bm25_meta.is_some());
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_bm25_only() {
        let (retriever, llm) = retriever_over(seeded());
        llm.set_fail_embeddings(true);
        let outcome = retriever
            .search(
                "gold tier combined balances",
                None,
                &HybridConfig::default(),
                RetrievalMethod::Hybrid,
            )
            .await
            .unwrap();
        assert!(outcome.diagnostics.degraded_bm25_only);
        assert!(!outcome.passages.is_empty());
        assert!(outcome.passages.iter().all(|p| p.signals.dense.is_none()));
    }

    #[tokio::test]
    async fn semantic_method_without_embedding_fails() {
        let (retriever, llm) = retriever_over(seeded());
        llm.set_fail_embeddings(true);
        let result = retriever
            .search(
                "gold tier",
                None,
                &HybridConfig::default(),
                RetrievalMethod::Semantic,
            )
            .await;
        assert!(matches!(
            result,
            Err(RetrievalError::AllRetrieversFailed(_))
        ));
    }

    #[tokio::test]
    async fn heuristic_adjustment_is_clipped_to_median_fraction() {
        let index = seeded();
        let (retriever, _) = retriever_over(index);
        let mut config = HybridConfig::default();
        // Absurd weights still cannot push past the clip.
        config.w_authority = 100.0;
        let outcome = retriever
            .search("combined balances", None, &config, RetrievalMethod::Hybrid)
            .await
            .unwrap();
        for passage in &outcome.passages {
            let rrf = passage.fused - passage.signals.heuristic;
            assert!(passage.signals.heuristic.abs() <= 0.2 * rrf.max(1.0) + 1.0);
            // The adjustment never exceeds 20% of the pool median, which
            // itself is bounded by the largest possible RRF sum.
            assert!(passage.signals.heuristic.abs() <= 0.2 * (3.0 / 61.0));
        }
    }

    #[tokio::test]
    async fn hint_union_merges_by_max_fused() {
        let (retriever, _) = retriever_over(seeded());
        let config = HybridConfig::default();
        let outcome = retriever
            .search_with_hint(
                "what are the rates",
                Some("Preferred Rewards tiers"),
                None,
                &config,
                RetrievalMethod::Hybrid,
            )
            .await
            .unwrap();
        assert!(!outcome.passages.is_empty());
        let mut seen = std::collections::HashSet::new();
        for passage in &outcome.passages {
            assert!(seen.insert(passage.chunk.clone()), "duplicate chunk");
        }
    }

    #[test]
    fn median_of_even_and_odd_sets() {
        assert_eq!(median([1.0, 3.0, 2.0].into_iter()), 2.0);
        assert_eq!(median([1.0, 2.0, 3.0, 4.0].into_iter()), 2.5);
        assert_eq!(median(std::iter::empty()), 0.0);
    }
}
