//! Stage-2 enrichment: turns product-candidate chunks into structured
//! `Product` records, post-validates the model's output against a handful
//! of sanity rules, and dedups candidates that resolve to the same
//! canonical name.

use crate::ai_gateway::{AiGateway, EnrichResult, EnrichedProduct};
use crate::db::MetadataStore;
use crate::types::{canonicalize_name, Chunk, ChunkProductRelationType, ChunkProductRelationship, Product, ProductSource, ProductStatus, Result};
use crate::utils::config::ThresholdConfig;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

const NEIGHBOR_WINDOW: usize = 2;
const MIN_DESCRIPTION_LEN: usize = 20;

pub struct Enricher {
    gateway: Arc<AiGateway>,
    store: Arc<dyn MetadataStore>,
    model: String,
    thresholds: ThresholdConfig,
}

/// Matches names that are really a designer/studio credit rather than a
/// product name, e.g. "Nordic Design Studio" or "Ane Halvorsen Atelier".
fn designer_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(studio|design|designs|atelier)\b\s*$").unwrap())
}

/// Matches descriptions that read as a biography, factory profile, or
/// sustainability statement rather than a description of the product itself,
/// e.g. "Founded in 1962, our family-run factory..." or "Made from 100%
/// FSC-certified sustainable timber, our commitment to the environment...".
fn description_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(founded in|our factory|our family|family-run|our commitment to|our mission|sustainably sourced|sustainability|carbon neutral|since \d{4})\b").unwrap())
}

/// Rejects outputs that look too thin, generic, or misattributed to ground a
/// product record: a short description under length, a quality label of
/// "low", a confidence below the Stage-2 floor, a name that reads like a
/// designer/studio credit, or a description that reads like a biography,
/// factory profile, or sustainability statement rather than product copy.
fn passes_validation(enriched: &EnrichedProduct, thresholds: &ThresholdConfig) -> Option<String> {
    if enriched.short_description.trim().len() < MIN_DESCRIPTION_LEN {
        return Some("short description too thin to ground a product record".to_string());
    }
    if enriched.quality.eq_ignore_ascii_case("low") {
        return Some("model self-reported low extraction quality".to_string());
    }
    if enriched.confidence < thresholds.stage2_confidence {
        return Some(format!("confidence {} below stage-2 threshold {}", enriched.confidence, thresholds.stage2_confidence));
    }
    if designer_pattern().is_match(&enriched.name) {
        return Some("product name reads like a designer or studio credit".to_string());
    }
    if description_pattern().is_match(&enriched.short_description) || description_pattern().is_match(&enriched.long_description) {
        return Some("description reads like a biography, factory, or sustainability statement".to_string());
    }
    None
}

impl Enricher {
    pub fn new(gateway: Arc<AiGateway>, store: Arc<dyn MetadataStore>, model: impl Into<String>, thresholds: ThresholdConfig) -> Self {
        Self { gateway, store, model: model.into(), thresholds }
    }

    /// Enriches every candidate chunk, persisting one `Product` per surviving,
    /// deduplicated candidate. Chunks that fail extraction or post-validation
    /// are simply skipped; they produce no product. When two candidates
    /// canonicalize to the same name, the lower-confidence one doesn't
    /// disappear: its source chunk becomes a `related` relationship against
    /// the winning product instead of a second, duplicate product record.
    pub async fn enrich_candidates(&self, workspace_id: &str, document_id: &str, candidates: &[Chunk], all_chunks: &[Chunk]) -> Result<Vec<Product>> {
        let mut winners: HashMap<String, (Product, String)> = HashMap::new();
        let mut all_accepted: Vec<(String, String)> = Vec::new();

        for candidate in candidates {
            let index = all_chunks.iter().position(|c| c.id == candidate.id).unwrap_or(0);
            let neighbors = neighbor_texts(all_chunks, index);

            let response = self.gateway.enrich(&self.model, &candidate.content, &neighbors).await;
            let Ok(result) = response.into_result() else { continue };

            let enriched = match result {
                EnrichResult::Rejected { .. } => continue,
                EnrichResult::Accepted(enriched) => enriched,
            };

            if passes_validation(&enriched, &self.thresholds).is_some() {
                continue;
            }

            let canonical = canonicalize_name(&enriched.name);
            let product = build_product(workspace_id, document_id, &enriched);
            all_accepted.push((canonical.clone(), candidate.id.clone()));

            match winners.get(&canonical) {
                Some((existing, _)) if existing.metadata.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) >= enriched.confidence as f64 => {
                    // lower-confidence duplicate: the higher-confidence one already wins this
                    // canonical name; its source chunk is related below instead of dropped
                }
                _ => {
                    winners.insert(canonical, (product, candidate.id.clone()));
                }
            }
        }

        let mut products: Vec<Product> = winners.values().map(|(product, _)| product.clone()).collect();
        for product in &products {
            self.store.create_product(product).await?;
        }

        for (canonical, chunk_id) in &all_accepted {
            let Some((product, winning_chunk_id)) = winners.get(canonical) else { continue };
            if chunk_id == winning_chunk_id {
                continue;
            }
            let relationship = ChunkProductRelationship {
                id: uuid::Uuid::new_v4().to_string(),
                chunk_id: chunk_id.clone(),
                product_id: product.id.clone(),
                workspace_id: workspace_id.to_string(),
                relationship_type: ChunkProductRelationType::Related,
                relevance_score: 1.0,
            };
            self.store.insert_chunk_product_relationship(&relationship).await?;
        }

        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }
}

fn build_product(workspace_id: &str, document_id: &str, enriched: &EnrichedProduct) -> Product {
    let properties = json_to_map(&enriched.properties);
    let specifications = json_to_map(&enriched.specifications);
    let mut metadata = json_to_map(&enriched.metadata);
    metadata.insert("confidence".to_string(), serde_json::json!(enriched.confidence));
    metadata.insert("extraction_quality".to_string(), serde_json::json!(enriched.quality));

    let now = chrono::Utc::now();
    Product {
        id: uuid::Uuid::new_v4().to_string(),
        workspace_id: workspace_id.to_string(),
        source_document_id: Some(document_id.to_string()),
        name: enriched.name.clone(),
        short_description: enriched.short_description.clone(),
        long_description: enriched.long_description.clone(),
        category_id: None,
        properties,
        specifications,
        metadata,
        status: ProductStatus::Draft,
        created_from_type: ProductSource::Pdf,
        created_by: None,
        created_at: now,
        updated_at: now,
    }
}

fn json_to_map(value: &serde_json::Value) -> HashMap<String, serde_json::Value> {
    value.as_object().map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default()
}

fn neighbor_texts(chunks: &[Chunk], index: usize) -> Vec<String> {
    let start = index.saturating_sub(NEIGHBOR_WINDOW);
    let end = (index + NEIGHBOR_WINDOW + 1).min(chunks.len());
    (start..end).filter(|&i| i != index).map(|i| chunks[i].content.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig { stage1_confidence: 0.4, stage2_confidence: 0.4, relationship_min_relevance: 0.2 }
    }

    fn sample(name: &str, description: &str, quality: &str, confidence: f32) -> EnrichedProduct {
        EnrichedProduct {
            name: name.to_string(),
            short_description: description.to_string(),
            long_description: description.to_string(),
            properties: serde_json::json!({}),
            specifications: serde_json::json!({}),
            metadata: serde_json::json!({}),
            quality: quality.to_string(),
            confidence,
        }
    }

    #[test]
    fn rejects_short_description() {
        let enriched = sample("Oslo Chair", "too short", "high", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn rejects_low_quality() {
        let enriched = sample("Oslo Chair", "A beautifully crafted oak dining chair", "low", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn rejects_low_confidence() {
        let enriched = sample("Oslo Chair", "A beautifully crafted oak dining chair", "high", 0.1);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn accepts_well_formed_candidate() {
        let enriched = sample("Oslo Chair", "A beautifully crafted oak dining chair", "high", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_none());
    }

    #[test]
    fn rejects_designer_studio_credit_as_a_name() {
        let enriched = sample("Nordic Design Studio", "A beautifully crafted oak dining chair", "high", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn rejects_description_that_reads_like_a_factory_biography() {
        let enriched = sample("Oslo Chair", "Founded in 1962, our family-run factory has crafted furniture for three generations", "high", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn rejects_description_that_reads_like_a_sustainability_statement() {
        let enriched = sample("Oslo Chair", "Our commitment to sustainability means every piece is carbon neutral from factory to doorstep", "high", 0.9);
        assert!(passes_validation(&enriched, &thresholds()).is_some());
    }

    #[test]
    fn build_product_carries_confidence_into_metadata() {
        let enriched = sample("Oslo Chair", "A beautifully crafted oak dining chair", "high", 0.87);
        let product = build_product("ws-1", "doc-1", &enriched);
        let stored_confidence = product.metadata.get("confidence").and_then(|v| v.as_f64()).unwrap();
        assert!((stored_confidence - 0.87).abs() < 1e-6);
        pretty_assertions::assert_eq!(product.status, ProductStatus::Draft);
    }

    #[test]
    fn neighbor_texts_excludes_self() {
        let chunks = vec![
            Chunk::new("doc-1", "ws-1", 0, "a".into(), vec![1]),
            Chunk::new("doc-1", "ws-1", 1, "b".into(), vec![1]),
            Chunk::new("doc-1", "ws-1", 2, "c".into(), vec![1]),
        ];
        let neighbors = neighbor_texts(&chunks, 1);
        assert_eq!(neighbors, vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_candidate_becomes_a_related_relationship_not_a_second_product() {
        use crate::ai_gateway::{AiGateway, ChatMessage, MockAiProvider};
        use crate::db::MockMetadataStore;
        use crate::utils::config::PipelineConfig;

        let mut provider = MockAiProvider::new();
        provider.expect_name().returning(|| "mock");
        provider.expect_chat().times(2).returning(|_model: &str, messages: &[ChatMessage]| {
            let user = messages.iter().find(|m| m.role == "user").unwrap();
            let confidence = if user.content.contains("strong-signal") { 0.95 } else { 0.5 };
            let body = serde_json::json!({
                "is_valid_product": true,
                "name": "Oslo Chair",
                "short_description": "A beautifully crafted oak dining chair",
                "long_description": "A beautifully crafted oak dining chair",
                "properties": {},
                "specifications": {},
                "metadata": {},
                "quality": "high",
                "confidence": confidence
            })
            .to_string();
            Box::pin(async move { Ok(body) })
        });

        let gateway = Arc::new(AiGateway::new(Box::new(provider), None, &PipelineConfig::default()));

        let mut store = MockMetadataStore::new();
        store.expect_create_product().times(1).returning(|_| Box::pin(async { Ok(()) }));
        store.expect_insert_chunk_product_relationship().times(1).returning(|rel: &ChunkProductRelationship| {
            assert_eq!(rel.relationship_type, ChunkProductRelationType::Related);
            Box::pin(async { Ok(()) })
        });

        let enricher = Enricher::new(gateway, Arc::new(store), "model-x", thresholds());

        let weak = Chunk::new("doc-1", "ws-1", 0, "weak-signal candidate chunk".into(), vec![1]);
        let strong = Chunk::new("doc-1", "ws-1", 1, "strong-signal candidate chunk".into(), vec![1]);
        let all_chunks = vec![weak, strong];

        let products = enricher.enrich_candidates("ws-1", "doc-1", &all_chunks, &all_chunks).await.unwrap();
        assert_eq!(products.len(), 1);
    }
}
