//! Turns chunks and images into persisted, L2-normalized vectors.
//!
//! All embedding generation is routed through the `AiGateway`; this module
//! owns batching, normalization, and fan-out into the metadata store and
//! vector index. It never talks to a provider directly.

use crate::ai_gateway::AiGateway;
use crate::db::{EmbeddingIndex, MetadataStore};
use crate::pipeline::quality::QualityEngine;
use crate::types::{AppError, Embedding, EntityType, Result};
use std::sync::Arc;

pub const TEXT_MODEL: &str = "text-embedding-3-small";
pub const TEXT_DIMENSIONS: usize = 1536;
pub const IMAGE_MODEL: &str = "clip-vit-b-32";
pub const IMAGE_DIMENSIONS: usize = 512;

const TEXT_BATCH_SIZE: usize = 100;

pub struct Embedder {
    gateway: Arc<AiGateway>,
    store: Arc<dyn MetadataStore>,
    index: Arc<EmbeddingIndex>,
    quality: Arc<QualityEngine>,
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

impl Embedder {
    pub fn new(gateway: Arc<AiGateway>, store: Arc<dyn MetadataStore>, index: Arc<EmbeddingIndex>, quality: Arc<QualityEngine>) -> Self {
        Self { gateway, store, index, quality }
    }

    /// Embeds and persists every chunk's text in batches of `TEXT_BATCH_SIZE`,
    /// flagging outlier vectors against the rest of their own batch.
    /// A chunk that never receives an embedding row is, by construction, never
    /// returned by semantic search.
    pub async fn embed_chunks(&self, workspace_id: &str, chunks: &[(String, String)]) -> Result<usize> {
        let mut embedded = 0;
        for batch in chunks.chunks(TEXT_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let response = self.gateway.embed_text(TEXT_MODEL, texts).await;
            let vectors = response.into_result()?;
            if vectors.len() != batch.len() {
                return Err(AppError::Internal(format!(
                    "embedding provider returned {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }
            let normalized: Vec<Vec<f32>> = vectors.into_iter().map(l2_normalize).collect();
            let batch_id = uuid::Uuid::new_v4().to_string();
            for ((chunk_id, _), vector) in batch.iter().zip(normalized.iter()) {
                self.persist(workspace_id, chunk_id, EntityType::Chunk, TEXT_MODEL, vector.clone()).await?;
                embedded += 1;
            }
            for ((chunk_id, _), vector) in batch.iter().zip(normalized.iter()) {
                if let Err(e) = self.quality.score_embedding_stability(workspace_id, chunk_id, vector, &normalized, &batch_id).await {
                    tracing::warn!(chunk_id, error = %e, "failed to persist embedding stability metrics");
                }
            }
        }
        Ok(embedded)
    }

    /// Embeds and persists one query string; used by the Retriever at search time.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let response = self.gateway.embed_text(TEXT_MODEL, vec![text.to_string()]).await;
        let vectors = response.into_result()?;
        let vector = vectors.into_iter().next().ok_or_else(|| AppError::Internal("embedding provider returned no vectors".into()))?;
        Ok(l2_normalize(vector))
    }

    /// Embeds and persists one image's raw bytes through a CLIP-class encoder.
    pub async fn embed_image(&self, workspace_id: &str, image_id: &str, image_bytes: Vec<u8>) -> Result<()> {
        let response = self.gateway.embed_image(IMAGE_MODEL, image_bytes).await;
        let vector = response.into_result()?;
        let normalized = l2_normalize(vector);
        self.persist(workspace_id, image_id, EntityType::Image, IMAGE_MODEL, normalized).await
    }

    async fn persist(&self, workspace_id: &str, entity_id: &str, entity_type: EntityType, model: &str, vector: Vec<f32>) -> Result<()> {
        self.index.upsert(workspace_id, entity_type, model, entity_id, &vector).await?;
        let embedding = Embedding::new(entity_id, entity_type, workspace_id, model, vector);
        self.store.upsert_embedding(&embedding).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vector() {
        let normalized = l2_normalize(vec![3.0, 4.0]);
        let norm = normalized.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn l2_normalize_leaves_zero_vector_untouched() {
        let normalized = l2_normalize(vec![0.0, 0.0, 0.0]);
        assert_eq!(normalized, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn model_constants_match_contract_dimensions() {
        assert_eq!(TEXT_MODEL, "text-embedding-3-small");
        assert_eq!(TEXT_DIMENSIONS, 1536);
        assert_eq!(IMAGE_DIMENSIONS, 512);
    }
}
