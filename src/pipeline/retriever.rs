//! Chunk retrieval: nearest-neighbor candidate generation, post-filtering by
//! chunk-analysis columns, and re-ranking by a configurable blend of
//! similarity, boundary quality, and validation score.

use crate::db::{EmbeddingIndex, MetadataStore};
use crate::pipeline::embedder::{Embedder, TEXT_MODEL};
use crate::pipeline::quality::QualityEngine;
use crate::types::{AppError, EntityType, Result, ScoredChunk, SearchFilters, SearchMode};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Weights the re-ranker applies on top of the candidate's raw similarity.
#[derive(Debug, Clone, Copy)]
pub struct RerankWeights {
    pub similarity: f32,
    pub boundary_quality: f32,
    pub validation_score: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self { similarity: 0.6, boundary_quality: 0.15, validation_score: 0.25 }
    }
}

/// Candidate overfetch multiplier: we pull more nearest neighbors than the
/// caller asked for so post-filtering still leaves `limit` results.
const OVERFETCH_FACTOR: usize = 4;

pub struct Retriever {
    store: Arc<dyn MetadataStore>,
    index: Arc<EmbeddingIndex>,
    embedder: Arc<Embedder>,
    quality: Arc<QualityEngine>,
    weights: RerankWeights,
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|s| s.len() > 1).map(String::from).collect()
}

/// Fraction of query terms that appear in the candidate's content; a simple,
/// index-free lexical overlap score suitable for re-ranking an already-small
/// candidate set (no separate persisted lexical index is maintained).
fn lexical_overlap(query_terms: &[String], content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms: std::collections::HashSet<String> = tokenize(content).into_iter().collect();
    let hits = query_terms.iter().filter(|t| content_terms.contains(*t)).count();
    hits as f32 / query_terms.len() as f32
}

impl Retriever {
    pub fn new(store: Arc<dyn MetadataStore>, index: Arc<EmbeddingIndex>, embedder: Arc<Embedder>, quality: Arc<QualityEngine>) -> Self {
        Self { store, index, embedder, quality, weights: RerankWeights::default() }
    }

    async fn fetch_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<crate::types::Chunk>> {
        match self.store.get_chunk(workspace_id, chunk_id).await {
            Ok(chunk) => Ok(Some(chunk)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs `query` against `workspace_id`, returning up to `limit` chunks
    /// ordered by the mode's scoring rule. `workspace_id` is a hard predicate
    /// at every step: the vector namespace, the chunk fetch, and the
    /// chunk-analysis lookups are all scoped to it.
    pub async fn search_chunks(&self, query: &str, workspace_id: &str, filters: &SearchFilters, mode: SearchMode, limit: usize) -> Result<Vec<ScoredChunk>> {
        let started = Instant::now();
        let query_vector = self.embedder.embed_query(query).await?;
        let hits = self.index.search(workspace_id, EntityType::Chunk, TEXT_MODEL, &query_vector, limit * OVERFETCH_FACTOR).await?;

        let query_terms = tokenize(query);
        let mut scored = Vec::with_capacity(hits.len());

        for hit in hits {
            let Some(chunk) = self.fetch_chunk(workspace_id, &hit.entity_id).await? else { continue };

            let classification = self.store.get_classification_for_chunk(workspace_id, &chunk.id).await?;
            let content_type = classification.as_ref().map(|c| c.content_type);
            if mode != SearchMode::Vector {
                if let Some(wanted) = &filters.content_types {
                    if !content_type.map(|ct| wanted.contains(&ct)).unwrap_or(false) {
                        continue;
                    }
                }
                if let Some(min_confidence) = filters.min_confidence {
                    if classification.as_ref().map(|c| c.confidence).unwrap_or(0.0) < min_confidence {
                        continue;
                    }
                }
            }

            let validation = self.store.get_validation_for_chunk(workspace_id, &chunk.id).await?;
            if mode != SearchMode::Vector {
                if let Some(wanted_status) = filters.validation_status {
                    if validation.as_ref().map(|v| v.status) != Some(wanted_status) {
                        continue;
                    }
                }
                if let Some(min) = filters.min_validation_score {
                    if validation.as_ref().map(|v| v.overall_score).unwrap_or(0.0) < min {
                        continue;
                    }
                }
                if filters.only_product_boundaries {
                    let boundary = self.store.get_boundary_for_chunk(workspace_id, &chunk.id).await?;
                    if !boundary.map(|b| b.is_product_boundary).unwrap_or(false) {
                        continue;
                    }
                }
            }

            let boundary_score = validation.as_ref().map(|v| v.boundary_quality);
            let validation_score = validation.as_ref().map(|v| v.overall_score);

            let combined_score = match mode {
                SearchMode::Vector | SearchMode::Semantic | SearchMode::Similarity => hit.score,
                SearchMode::Hybrid => {
                    let lexical = lexical_overlap(&query_terms, &chunk.content);
                    self.weights.similarity * hit.score + self.weights.boundary_quality * boundary_score.unwrap_or(0.0) + self.weights.validation_score * validation_score.unwrap_or(0.0) + 0.1 * lexical
                }
            };

            scored.push(ScoredChunk {
                chunk,
                similarity_score: hit.score,
                boundary_score,
                validation_score,
                combined_score,
                content_type,
                validation_status: validation.map(|v| v.status),
            });
        }

        scored.sort_by(|a, b| b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal));
        let candidate_ids: Vec<String> = scored.iter().map(|s| s.chunk.id.clone()).collect();
        scored.truncate(limit);

        // No external relevance judgments exist at serve time, so the full
        // post-filter candidate pool stands in as the relevant set and the
        // truncated top-k as retrieved; this tracks how much signal the
        // re-rank cutoff throws away, independent of any ground truth.
        let retrieved_ids: Vec<String> = scored.iter().map(|s| s.chunk.id.clone()).collect();
        let latency_ms = started.elapsed().as_millis() as u64;
        let query_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.quality.score_retrieval(workspace_id, &query_id, &retrieved_ids, &candidate_ids, latency_ms).await {
            tracing::warn!(query_id, error = %e, "failed to persist retrieval quality metrics");
        }

        Ok(scored)
    }

    /// Finds chunks similar to an existing chunk, by reusing its stored embedding.
    pub async fn similar_to_chunk(&self, workspace_id: &str, chunk_id: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self
            .store
            .get_embedding(workspace_id, chunk_id, EntityType::Chunk, TEXT_MODEL)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("chunk {chunk_id} has no embedding")))?;

        let hits = self.index.search(workspace_id, EntityType::Chunk, TEXT_MODEL, &embedding.vector, limit + 1).await?;
        let mut scored = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.entity_id == chunk_id {
                continue;
            }
            if let Some(chunk) = self.fetch_chunk(workspace_id, &hit.entity_id).await? {
                scored.push(ScoredChunk {
                    chunk,
                    similarity_score: hit.score,
                    boundary_score: None,
                    validation_score: None,
                    combined_score: hit.score,
                    content_type: None,
                    validation_status: None,
                });
            }
        }
        scored.truncate(limit);
        Ok(scored)
    }
}

/// Groups a set of scored chunks by document, preserving score order within each group.
pub fn group_by_document(results: &[ScoredChunk]) -> HashMap<String, Vec<&ScoredChunk>> {
    let mut groups: HashMap<String, Vec<&ScoredChunk>> = HashMap::new();
    for result in results {
        groups.entry(result.chunk.document_id.clone()).or_default().push(result);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    #[test]
    fn lexical_overlap_counts_matching_terms() {
        let terms = vec!["oak".to_string(), "table".to_string()];
        let score = lexical_overlap(&terms, "a solid oak dining table");
        assert!((score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn lexical_overlap_is_zero_for_empty_query() {
        assert_eq!(lexical_overlap(&[], "anything"), 0.0);
    }

    #[test]
    fn lexical_overlap_partial_match() {
        let terms = vec!["oak".to_string(), "granite".to_string()];
        let score = lexical_overlap(&terms, "a solid oak dining table");
        assert!((score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rerank_weights_sum_to_one() {
        let weights = RerankWeights::default();
        let total = weights.similarity + weights.boundary_quality + weights.validation_score;
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn group_by_document_preserves_order_within_group() {
        let chunk_a = Chunk::new("doc-1", "ws", 0, "a".into(), vec![1]);
        let chunk_b = Chunk::new("doc-1", "ws", 1, "b".into(), vec![1]);
        let results = vec![
            ScoredChunk { chunk: chunk_a, similarity_score: 0.9, boundary_score: None, validation_score: None, combined_score: 0.9, content_type: None, validation_status: None },
            ScoredChunk { chunk: chunk_b, similarity_score: 0.5, boundary_score: None, validation_score: None, combined_score: 0.5, content_type: None, validation_status: None },
        ];
        let groups = group_by_document(&results);
        let doc1 = groups.get("doc-1").unwrap();
        assert_eq!(doc1.len(), 2);
        assert!(doc1[0].combined_score > doc1[1].combined_score);
    }
}
