//! Stage-1 classification: cheaply discards chunks that are obviously not
//! product content before spending a model call on them, then classifies
//! the rest through the AI Gateway in fixed-size batches.

use crate::ai_gateway::{AiGateway, ClassifyResult};
use crate::db::MetadataStore;
use crate::types::{Chunk, ChunkClassification, ContentType, Result};
use crate::utils::config::ThresholdConfig;
use crate::utils::keywords::matches_non_product_keyword;
use std::sync::Arc;

const BATCH_SIZE: usize = 10;
const MAX_ATTEMPTS: u32 = 3;
const NEIGHBOR_WINDOW: usize = 2;

pub struct Classifier {
    gateway: Arc<AiGateway>,
    store: Arc<dyn MetadataStore>,
    model: String,
    thresholds: ThresholdConfig,
}

impl Classifier {
    pub fn new(gateway: Arc<AiGateway>, store: Arc<dyn MetadataStore>, model: impl Into<String>, thresholds: ThresholdConfig) -> Self {
        Self { gateway, store, model: model.into(), thresholds }
    }

    /// Classifies every chunk of a document, persisting one `ChunkClassification`
    /// per chunk in document order. Chunks a keyword pre-filter rejects never
    /// reach the model; the rest are sent to the AI Gateway in groups of
    /// `BATCH_SIZE`, one request per group, to keep call volume down.
    pub async fn classify_document(&self, workspace_id: &str, chunks: &[Chunk]) -> Result<Vec<ChunkClassification>> {
        let mut results: Vec<Option<ChunkClassification>> = vec![None; chunks.len()];
        let mut to_classify: Vec<usize> = Vec::new();

        for (index, chunk) in chunks.iter().enumerate() {
            if let Some(category) = matches_non_product_keyword(&chunk.content) {
                results[index] = Some(default_classification(chunk, workspace_id, &self.model, format!("keyword pre-filter matched category '{category}'")));
            } else {
                to_classify.push(index);
            }
        }

        for batch_indices in to_classify.chunks(BATCH_SIZE) {
            let items: Vec<(String, Vec<String>)> = batch_indices.iter().map(|&i| (chunks[i].content.clone(), neighbor_texts(chunks, i))).collect();
            match self.classify_batch_with_retry(&items).await {
                Ok(batch_results) => {
                    for (&index, result) in batch_indices.iter().zip(batch_results) {
                        results[index] = Some(self.apply_confidence_tiebreak(&chunks[index], workspace_id, result));
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    for &index in batch_indices {
                        results[index] = Some(default_classification(&chunks[index], workspace_id, &self.model, reason.clone()));
                    }
                }
            }
        }

        let classifications: Vec<ChunkClassification> = results.into_iter().map(|r| r.expect("every chunk index is assigned a classification exactly once")).collect();
        for classification in &classifications {
            self.store.insert_classification(classification).await?;
        }
        Ok(classifications)
    }

    /// Sends one batch classify request, retrying transient provider failures
    /// up to `MAX_ATTEMPTS` times before giving up on the whole batch.
    async fn classify_batch_with_retry(&self, items: &[(String, Vec<String>)]) -> Result<Vec<ClassifyResult>> {
        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.gateway.classify_batch(&self.model, items).await.into_result() {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| crate::types::AppError::Internal("batch classification failed".into())))
    }

    /// A classification below the Stage-1 confidence floor is treated as
    /// unclassifiable rather than trusted at face value.
    fn apply_confidence_tiebreak(&self, chunk: &Chunk, workspace_id: &str, result: ClassifyResult) -> ChunkClassification {
        if result.confidence < self.thresholds.stage1_confidence {
            return ChunkClassification {
                id: uuid::Uuid::new_v4().to_string(),
                chunk_id: chunk.id.clone(),
                workspace_id: workspace_id.to_string(),
                content_type: ContentType::Other,
                confidence: result.confidence,
                reasoning: "confidence below stage-1 threshold".to_string(),
                model: self.model.clone(),
                created_at: chrono::Utc::now(),
            };
        }
        ChunkClassification {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk.id.clone(),
            workspace_id: workspace_id.to_string(),
            content_type: result.content_type,
            confidence: result.confidence,
            reasoning: String::new(),
            model: self.model.clone(),
            created_at: chrono::Utc::now(),
        }
    }
}

fn default_classification(chunk: &Chunk, workspace_id: &str, model: &str, reasoning: String) -> ChunkClassification {
    ChunkClassification {
        id: uuid::Uuid::new_v4().to_string(),
        chunk_id: chunk.id.clone(),
        workspace_id: workspace_id.to_string(),
        content_type: ContentType::Other,
        confidence: 0.0,
        reasoning,
        model: model.to_string(),
        created_at: chrono::Utc::now(),
    }
}

/// Up to `NEIGHBOR_WINDOW` chunks before and after `index`, giving the model
/// a little surrounding context without sending the whole document.
fn neighbor_texts(chunks: &[Chunk], index: usize) -> Vec<String> {
    let start = index.saturating_sub(NEIGHBOR_WINDOW);
    let end = (index + NEIGHBOR_WINDOW + 1).min(chunks.len());
    (start..end).filter(|&i| i != index).map(|i| chunks[i].content.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: u32, content: &str) -> Chunk {
        Chunk::new("doc-1", "ws-1", index, content.to_string(), vec![1])
    }

    #[test]
    fn neighbor_texts_excludes_self() {
        let chunks = vec![chunk(0, "a"), chunk(1, "b"), chunk(2, "c")];
        let neighbors = neighbor_texts(&chunks, 1);
        assert_eq!(neighbors, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn neighbor_texts_clamps_at_document_edges() {
        let chunks = vec![chunk(0, "a"), chunk(1, "b")];
        let neighbors = neighbor_texts(&chunks, 0);
        assert_eq!(neighbors, vec!["b".to_string()]);
    }

    #[test]
    fn keyword_prefilter_short_circuits_obvious_non_product_text() {
        let text = "All rights reserved. This document is copyrighted material.";
        assert!(matches_non_product_keyword(text).is_some());
    }

    #[test]
    fn default_classification_has_zero_confidence_and_other_type() {
        let c = chunk(0, "some text");
        let classification = default_classification(&c, "ws-1", "model-x", "boom".to_string());
        assert_eq!(classification.content_type, ContentType::Other);
        assert_eq!(classification.confidence, 0.0);
        assert_eq!(classification.reasoning, "boom");
    }

    #[tokio::test]
    async fn classify_document_sends_one_request_per_batch_of_ten() {
        use crate::ai_gateway::{AiGateway, ChatMessage, MockAiProvider};
        use crate::db::MockMetadataStore;
        use crate::utils::config::PipelineConfig;

        let mut provider = MockAiProvider::new();
        provider.expect_name().returning(|| "mock");
        provider.expect_chat().times(2).returning(|_model: &str, messages: &[ChatMessage]| {
            let user = messages.iter().find(|m| m.role == "user").unwrap();
            let count = user.content.matches("\nText:\n").count();
            let array: Vec<serde_json::Value> = (0..count).map(|_| serde_json::json!({"content_type": "other", "confidence": 0.9, "is_product_candidate": false})).collect();
            let body = serde_json::to_string(&array).unwrap();
            Box::pin(async move { Ok(body) })
        });

        let gateway = Arc::new(AiGateway::new(Box::new(provider), None, &PipelineConfig::default()));
        let mut store = MockMetadataStore::new();
        store.expect_insert_classification().returning(|_| Box::pin(async { Ok(()) }));

        let classifier = Classifier::new(gateway, Arc::new(store), "model-x", thresholds());
        let chunks: Vec<Chunk> = (0..12).map(|i| chunk(i, &format!("a fully assembled oak dining chair, variant {i}"))).collect();

        let classifications = classifier.classify_document("ws-1", &chunks).await.unwrap();
        assert_eq!(classifications.len(), 12);
        assert!(classifications.iter().all(|c| c.content_type == ContentType::Other));
    }

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig { stage1_confidence: 0.4, stage2_confidence: 0.4, relationship_min_relevance: 0.2 }
    }
}
