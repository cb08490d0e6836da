//! Attaches measurable quality signals to chunks, embeddings, retrieval
//! results, and RAG responses. None of these measurements gate the
//! pipeline; they are persisted for later analysis and tuning.

use crate::db::MetadataStore;
use crate::types::{
    BoundaryType, ChunkBoundary, ChunkQualityMetrics, ChunkValidation, EmbeddingStabilityMetrics, ResponseAssessment, ResponseQualityMetrics, Result,
    RetrievalQualityMetrics, ValidationStatus,
};
use std::sync::Arc;

const VALIDATED_THRESHOLD: f32 = 0.7;
const NEEDS_REVIEW_THRESHOLD: f32 = 0.4;

const BOUNDARY_QUALITY_WEIGHT: f32 = 0.30;
const SEMANTIC_COMPLETENESS_WEIGHT: f32 = 0.28;
const STRUCTURAL_INTEGRITY_WEIGHT: f32 = 0.20;
const CONTEXT_PRESERVATION_WEIGHT: f32 = 0.15;
const METADATA_RICHNESS_WEIGHT: f32 = 0.07;

const STRUCTURAL_SWEET_SPOT_MIN: usize = 200;
const STRUCTURAL_SWEET_SPOT_MAX: usize = 500;

const RELATIONAL_WORDS: &[&str] = &["however", "therefore", "because", "although", "furthermore", "additionally", "meanwhile", "consequently", "moreover", "similarly"];

pub struct QualityEngine {
    store: Arc<dyn MetadataStore>,
}

/// Penalizes a chunk that starts or ends mid-word or mid-sentence.
fn boundary_quality(content: &str) -> f32 {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let starts_clean = trimmed.chars().next().map(|c| c.is_uppercase() || c.is_numeric()).unwrap_or(false);
    let ends_clean = trimmed.ends_with(['.', '!', '?', ':', '"']);
    match (starts_clean, ends_clean) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.6,
        (false, false) => 0.3,
    }
}

/// Vocabulary-diversity heuristic: the fraction of distinct words among all
/// words, as a proxy for how much unique information the chunk carries.
fn semantic_completeness(content: &str) -> f32 {
    let words: Vec<String> = content.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<&String> = words.iter().collect();
    (unique.len() as f32 / words.len() as f32).min(1.0)
}

/// Rewards chunk sizes that fall inside the 200-500 character sweet spot.
fn structural_integrity(content: &str) -> f32 {
    let len = content.chars().count();
    if (STRUCTURAL_SWEET_SPOT_MIN..=STRUCTURAL_SWEET_SPOT_MAX).contains(&len) {
        1.0
    } else if len < STRUCTURAL_SWEET_SPOT_MIN {
        (len as f32 / STRUCTURAL_SWEET_SPOT_MIN as f32).clamp(0.0, 1.0)
    } else {
        (STRUCTURAL_SWEET_SPOT_MAX as f32 / len as f32).clamp(0.0, 1.0)
    }
}

/// Relational-word detection and diversity, as a proxy for how well the
/// chunk preserves its surrounding discourse context.
fn context_preservation(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let hits = RELATIONAL_WORDS.iter().filter(|w| lower.contains(*w)).count();
    (hits as f32 / 3.0).min(1.0)
}

fn metadata_richness(metadata_field_count: usize) -> f32 {
    (metadata_field_count as f32 / 5.0).min(1.0)
}

/// Rewards a chunk split that lands on a clean sentence end and a clean
/// sentence start, the same shape as `boundary_quality` but evaluated across
/// the pair rather than within one chunk.
fn boundary_transition_quality(left: &str, right: &str) -> f32 {
    let ends_clean = left.trim().ends_with(['.', '!', '?', ':', '"']);
    let starts_clean = right.trim().chars().next().map(|c| c.is_uppercase() || c.is_numeric()).unwrap_or(false);
    match (ends_clean, starts_clean) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.6,
        (false, false) => 0.3,
    }
}

impl QualityEngine {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Scores one chunk's boundary quality, semantic completeness,
    /// structural integrity, context preservation, and metadata richness,
    /// then persists the weighted overall score.
    pub async fn score_chunk(&self, workspace_id: &str, chunk_id: &str, content: &str, metadata_field_count: usize) -> Result<ChunkQualityMetrics> {
        let boundary = boundary_quality(content);
        let semantic = semantic_completeness(content);
        let structural = structural_integrity(content);
        let context = context_preservation(content);
        let metadata = metadata_richness(metadata_field_count);

        let overall = BOUNDARY_QUALITY_WEIGHT * boundary
            + SEMANTIC_COMPLETENESS_WEIGHT * semantic
            + STRUCTURAL_INTEGRITY_WEIGHT * structural
            + CONTEXT_PRESERVATION_WEIGHT * context
            + METADATA_RICHNESS_WEIGHT * metadata;

        let metrics = ChunkQualityMetrics {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            workspace_id: workspace_id.to_string(),
            semantic_completeness: semantic,
            boundary_quality: boundary,
            context_preservation: context,
            structural_integrity: structural,
            metadata_richness: metadata,
            overall,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_chunk_quality(&metrics).await?;
        Ok(metrics)
    }

    /// Computes and persists content-and-boundary validation signals for one
    /// chunk, independent of the metadata-field count `score_chunk` folds in.
    /// `validation_richness` lets a caller roll the result back into that count.
    pub async fn validate_chunk(&self, workspace_id: &str, chunk_id: &str, content: &str) -> Result<ChunkValidation> {
        let boundary = boundary_quality(content);
        let semantic = semantic_completeness(content);
        let structural = structural_integrity(content);
        let context = context_preservation(content);
        let content_quality = (semantic + context) / 2.0;
        let overall_score = (boundary + content_quality + structural) / 3.0;

        let status = if overall_score >= VALIDATED_THRESHOLD {
            ValidationStatus::Validated
        } else if overall_score >= NEEDS_REVIEW_THRESHOLD {
            ValidationStatus::NeedsReview
        } else {
            ValidationStatus::Rejected
        };

        let validation = ChunkValidation {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            workspace_id: workspace_id.to_string(),
            overall_score,
            status,
            content_quality,
            boundary_quality: boundary,
            semantic_coherence: semantic,
            completeness: structural,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_validation(&validation).await?;
        Ok(validation)
    }

    /// Scores the clean-break quality of the split between two adjacent
    /// chunks and persists it as a `ChunkBoundary`, so `only_product_boundaries`
    /// filtering and boundary-quality re-ranking have real rows to query.
    pub async fn score_boundary(&self, workspace_id: &str, chunk_id: &str, next_chunk_id: &str, left_content: &str, right_content: &str, is_product_boundary: bool) -> Result<ChunkBoundary> {
        let score = boundary_transition_quality(left_content, right_content);
        let boundary_type = if score >= 0.9 {
            BoundaryType::Paragraph
        } else if score >= 0.6 {
            BoundaryType::Sentence
        } else {
            BoundaryType::Weak
        };

        let boundary = ChunkBoundary {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            next_chunk_id: next_chunk_id.to_string(),
            workspace_id: workspace_id.to_string(),
            boundary_type,
            boundary_score: score,
            is_product_boundary,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_boundary(&boundary).await?;
        Ok(boundary)
    }

    /// Flags embeddings whose values stray far from the batch's own
    /// distribution: a dimension more than 3 standard deviations from the
    /// batch mean at that dimension trips the anomaly flag.
    pub async fn score_embedding_stability(&self, workspace_id: &str, chunk_id: &str, vector: &[f32], batch_vectors: &[Vec<f32>], batch_id: &str) -> Result<EmbeddingStabilityMetrics> {
        let variance = vector.iter().map(|v| (v - mean(vector)).powi(2)).sum::<f32>() / vector.len().max(1) as f32;
        let magnitude = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        let consistency = if (0.9..=1.1).contains(&magnitude) { 1.0 } else { 0.5 };

        let anomaly_flag = is_anomalous(vector, batch_vectors);
        let stability = if anomaly_flag { 0.2 } else { 1.0 - variance.min(1.0) };

        let metrics = EmbeddingStabilityMetrics {
            id: uuid::Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            workspace_id: workspace_id.to_string(),
            stability,
            variance,
            consistency,
            anomaly_flag,
            batch_id: batch_id.to_string(),
            created_at: chrono::Utc::now(),
        };
        self.store.insert_embedding_stability(&metrics).await?;
        Ok(metrics)
    }

    /// Computes precision/recall/MRR against a known or estimated
    /// ground-truth relevant set.
    pub async fn score_retrieval(&self, workspace_id: &str, query_id: &str, retrieved: &[String], relevant: &[String], latency_ms: u64) -> Result<RetrievalQualityMetrics> {
        let relevant_set: std::collections::HashSet<&String> = relevant.iter().collect();
        let retrieved_set: std::collections::HashSet<&String> = retrieved.iter().collect();
        let intersection = retrieved_set.intersection(&relevant_set).count();

        let precision = if retrieved.is_empty() { 0.0 } else { intersection as f32 / retrieved.len() as f32 };
        let recall = if relevant.is_empty() { 0.0 } else { intersection as f32 / relevant.len() as f32 };
        let mrr = retrieved
            .iter()
            .position(|id| relevant_set.contains(id))
            .map(|rank| 1.0 / (rank as f32 + 1.0))
            .unwrap_or(0.0);

        let metrics = RetrievalQualityMetrics {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            workspace_id: workspace_id.to_string(),
            precision,
            recall,
            mrr,
            latency_ms,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_retrieval_quality(&metrics).await?;
        Ok(metrics)
    }

    /// Combines LLM-judged coherence/factual-consistency with mechanically
    /// computed hallucination and source-attribution rates into an overall
    /// score and assessment label.
    pub async fn score_response(&self, workspace_id: &str, response_id: &str, coherence: f32, hallucination: f32, source_attribution: f32, factual_consistency: f32) -> Result<ResponseQualityMetrics> {
        let overall = (coherence + (1.0 - hallucination) + source_attribution + factual_consistency) / 4.0;
        let assessment = ResponseAssessment::from_overall(overall);

        let metrics = ResponseQualityMetrics {
            id: uuid::Uuid::new_v4().to_string(),
            response_id: response_id.to_string(),
            workspace_id: workspace_id.to_string(),
            coherence,
            hallucination,
            source_attribution,
            factual_consistency,
            overall,
            assessment,
            created_at: chrono::Utc::now(),
        };
        self.store.insert_response_quality(&metrics).await?;
        Ok(metrics)
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn is_anomalous(vector: &[f32], batch: &[Vec<f32>]) -> bool {
    if batch.len() < 2 {
        return false;
    }
    for dim in 0..vector.len() {
        let column: Vec<f32> = batch.iter().filter_map(|v| v.get(dim).copied()).collect();
        if column.len() < 2 {
            continue;
        }
        let m = mean(&column);
        let variance = column.iter().map(|v| (v - m).powi(2)).sum::<f32>() / column.len() as f32;
        let std_dev = variance.sqrt();
        if std_dev > f32::EPSILON && (vector[dim] - m).abs() > 3.0 * std_dev {
            return true;
        }
    }
    false
}

/// Counts how many post-validation rules `validation` satisfies, a rough
/// proxy the metadata-richness score can fold in alongside the chunk's own
/// field count.
pub fn validation_richness(validation: &ChunkValidation) -> usize {
    let mut count = 0;
    if validation.overall_score > 0.0 {
        count += 1;
    }
    if validation.boundary_quality > 0.0 {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_quality_rewards_clean_sentence() {
        assert_eq!(boundary_quality("This is a clean sentence."), 1.0);
    }

    #[test]
    fn boundary_quality_penalizes_midword_fragment() {
        assert!(boundary_quality("ence fragment without proper start") < 1.0);
    }

    #[test]
    fn structural_integrity_peaks_in_sweet_spot() {
        let content = "x".repeat(300);
        assert_eq!(structural_integrity(&content), 1.0);
    }

    #[test]
    fn structural_integrity_penalizes_too_short() {
        assert!(structural_integrity("short") < 1.0);
    }

    #[rstest::rstest]
    #[case(50, false)]
    #[case(200, true)]
    #[case(350, true)]
    #[case(500, true)]
    #[case(2000, false)]
    fn structural_integrity_sweet_spot_is_two_hundred_to_five_hundred_chars(#[case] char_count: usize, #[case] in_sweet_spot: bool) {
        let score = structural_integrity(&"x".repeat(char_count));
        if in_sweet_spot {
            assert_eq!(score, 1.0);
        } else {
            assert!(score < 1.0);
        }
    }

    #[test]
    fn context_preservation_detects_relational_words() {
        let content = "However, the material is durable. Therefore it lasts.";
        assert!(context_preservation(content) > 0.0);
    }

    #[test]
    fn semantic_completeness_rewards_diverse_vocabulary() {
        assert!(semantic_completeness("the quick brown fox jumps") > semantic_completeness("the the the the the"));
    }

    #[test]
    fn retrieval_precision_recall_and_mrr() {
        let retrieved = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let relevant = vec!["b".to_string(), "d".to_string()];
        let relevant_set: std::collections::HashSet<&String> = relevant.iter().collect();
        let retrieved_set: std::collections::HashSet<&String> = retrieved.iter().collect();
        let intersection = retrieved_set.intersection(&relevant_set).count();
        assert_eq!(intersection, 1);
        let precision = intersection as f32 / retrieved.len() as f32;
        let recall = intersection as f32 / relevant.len() as f32;
        assert!((precision - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(recall, 0.5);
    }

    #[test]
    fn anomaly_detection_flags_outlier_dimension() {
        let batch = vec![vec![0.1, 0.1], vec![0.11, 0.12], vec![0.09, 0.11]];
        let outlier = vec![5.0, 0.1];
        assert!(is_anomalous(&outlier, &batch));
        assert!(!is_anomalous(&vec![0.1, 0.1], &batch));
    }

    #[test]
    fn boundary_transition_quality_rewards_clean_split() {
        assert_eq!(boundary_transition_quality("This sentence ends cleanly.", "Next one starts clean."), 1.0);
    }

    #[test]
    fn boundary_transition_quality_penalizes_midsentence_split() {
        assert!(boundary_transition_quality("this trails off without", "a lowercase continuation") < 1.0);
    }

    #[test]
    fn validation_richness_counts_positive_signals() {
        let validation = ChunkValidation {
            id: "v1".into(),
            chunk_id: "c1".into(),
            workspace_id: "ws-1".into(),
            overall_score: 0.8,
            status: ValidationStatus::Validated,
            content_quality: 0.7,
            boundary_quality: 0.9,
            semantic_coherence: 0.6,
            completeness: 0.5,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(validation_richness(&validation), 2);
    }

    #[test]
    fn response_assessment_labels_match_thresholds() {
        assert_eq!(ResponseAssessment::from_overall(0.9), ResponseAssessment::Excellent);
        assert_eq!(ResponseAssessment::from_overall(0.75), ResponseAssessment::Good);
        assert_eq!(ResponseAssessment::from_overall(0.5), ResponseAssessment::Poor);
    }

    #[tokio::test]
    async fn validate_chunk_persists_a_validation_row() {
        use crate::db::MockMetadataStore;

        let mut store = MockMetadataStore::new();
        store.expect_insert_validation().times(1).returning(|v: &ChunkValidation| {
            assert!(v.overall_score > 0.0);
            Box::pin(async { Ok(()) })
        });

        let engine = QualityEngine::new(Arc::new(store));
        let validation = engine.validate_chunk("ws-1", "chunk-1", "A clean, well-formed sentence.").await.unwrap();
        assert_eq!(validation.status, ValidationStatus::Validated);
    }

    #[tokio::test]
    async fn score_boundary_flags_product_boundary() {
        use crate::db::MockMetadataStore;

        let mut store = MockMetadataStore::new();
        store.expect_insert_boundary().times(1).returning(|b: &ChunkBoundary| {
            assert!(b.is_product_boundary);
            Box::pin(async { Ok(()) })
        });

        let engine = QualityEngine::new(Arc::new(store));
        let boundary = engine.score_boundary("ws-1", "chunk-1", "chunk-2", "This chunk ends cleanly.", "The next one starts clean.", true).await.unwrap();
        assert_eq!(boundary.boundary_type, BoundaryType::Paragraph);
    }
}
