//! Core data model for the Document Intelligence & RAG pipeline.
//!
//! Every entity here is workspace-scoped: `workspace_id` is carried on the
//! struct and is a hard predicate on every store query. See `db::traits`
//! for the access layer that enforces this.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

// ============= Error Types =============

/// Error taxonomy for the pipeline.
///
/// `Transient` and `Permanent` map directly onto the Job Manager's retry
/// decision: transient errors are retried with backoff up to `max_retries`,
/// permanent errors fail the job immediately.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or invalid configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid workspace, malformed PDF, unknown id. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested resource was not found (scoped by workspace).
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider 5xx, network blip, rate limit. Retried with backoff.
    #[error("transient error: {0}")]
    Transient(String),

    /// Provider 4xx (non-rate-limit), unrecoverable parse failure.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The in-flight operation was cancelled cooperatively.
    #[error("cancelled")]
    Cancelled,

    /// Metadata store failure.
    #[error("database error: {0}")]
    Database(String),

    /// Object store failure.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error should be retried by a pipeline stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transient(_))
    }
}

/// Specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============= Document =============

/// Lifecycle status of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl DocumentStatus {
    /// A document is only eligible for retrieval once it reaches this state.
    pub fn is_searchable(&self) -> bool {
        matches!(self, DocumentStatus::Completed)
    }
}

/// One PDF ingest, the root of a document's chunk/image tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub workspace_id: String,
    pub source_uri: String,
    pub filename: String,
    pub page_count: u32,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_chunks: u32,
    pub total_images: u32,
    pub total_products: u32,
    pub error: Option<String>,
}

impl Document {
    pub fn new(workspace_id: impl Into<String>, source_uri: impl Into<String>, filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            workspace_id: workspace_id.into(),
            source_uri: source_uri.into(),
            filename: filename.into(),
            page_count: 0,
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
            total_chunks: 0,
            total_images: 0,
            total_products: 0,
            error: None,
        }
    }
}

// ============= Chunk =============

/// An ordered text slice of a document; the atomic unit for embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub workspace_id: String,
    /// Dense, non-negative order within the document: 0..N.
    pub chunk_index: u32,
    pub content: String,
    pub page_numbers: Vec<u32>,
    pub char_count: u32,
    pub word_count: u32,
    pub created_at: DateTime<Utc>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Chunk {
    pub fn new(document_id: impl Into<String>, workspace_id: impl Into<String>, chunk_index: u32, content: String, page_numbers: Vec<u32>) -> Self {
        let char_count = content.chars().count() as u32;
        let word_count = content.split_whitespace().count() as u32;
        Self {
            id: new_id(),
            document_id: document_id.into(),
            workspace_id: workspace_id.into(),
            chunk_index,
            content,
            page_numbers,
            char_count,
            word_count,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

// ============= Extraction =============

/// One ordered slice of the markdown stream the PDF Extractor produces.
///
/// A segment never spans a table row or code block; it may span more than
/// one page, in which case `pages` lists every page it touches in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkdownSegment {
    pub markdown: String,
    pub pages: Vec<u32>,
    pub is_heading: bool,
    pub is_table_or_code: bool,
}

impl MarkdownSegment {
    pub fn new(markdown: impl Into<String>, pages: Vec<u32>) -> Self {
        Self { markdown: markdown.into(), pages, is_heading: false, is_table_or_code: false }
    }
}

// ============= Image =============

/// One raster extracted from a document page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub document_id: String,
    pub workspace_id: String,
    pub page_number: u32,
    pub storage_uri: String,
    pub public_uri: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    pub metadata: ImageMetadata,
}

/// Free-form detection metadata captured alongside an extracted image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub detection_confidence: Option<f32>,
    pub bbox: Option<BoundingBox>,
    pub caption: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

// ============= Embedding =============

/// The kind of entity an embedding vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Chunk,
    Product,
    Image,
    Query,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Chunk => "chunk",
            EntityType::Product => "product",
            EntityType::Image => "image",
            EntityType::Query => "query",
        }
    }
}

/// A vector attached to an entity. Unique on `(entity_id, entity_type, model)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub workspace_id: String,
    pub model: String,
    pub dimensions: u32,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(entity_id: impl Into<String>, entity_type: EntityType, workspace_id: impl Into<String>, model: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: new_id(),
            entity_id: entity_id.into(),
            entity_type,
            workspace_id: workspace_id.into(),
            model: model.into(),
            dimensions: vector.len() as u32,
            vector,
            created_at: Utc::now(),
        }
    }

    /// L2-normalizes the vector in place (written this way on persist).
    pub fn l2_normalize(&mut self) {
        let norm: f32 = self.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in self.vector.iter_mut() {
                *v /= norm;
            }
        }
    }
}

/// Cosine similarity between two equal-length vectors, assumed L2-normalized.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

// ============= Product =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSource {
    Pdf,
    Manual,
    Import,
}

/// A materialized product record, either extracted from a document or entered manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub workspace_id: String,
    pub source_document_id: Option<String>,
    pub name: String,
    pub short_description: String,
    pub long_description: String,
    pub category_id: Option<String>,
    pub properties: HashMap<String, serde_json::Value>,
    pub specifications: HashMap<String, serde_json::Value>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub status: ProductStatus,
    pub created_from_type: ProductSource,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonicalizes a product name for dedup comparisons (lowercase, trimmed, collapsed whitespace).
pub fn canonicalize_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ============= Chunk analysis =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Product,
    Specification,
    Introduction,
    LegalDisclaimer,
    TechnicalDetail,
    Marketing,
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Product => "product",
            ContentType::Specification => "specification",
            ContentType::Introduction => "introduction",
            ContentType::LegalDisclaimer => "legal_disclaimer",
            ContentType::TechnicalDetail => "technical_detail",
            ContentType::Marketing => "marketing",
            ContentType::Other => "other",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "product" => Ok(ContentType::Product),
            "specification" => Ok(ContentType::Specification),
            "introduction" => Ok(ContentType::Introduction),
            "legal_disclaimer" => Ok(ContentType::LegalDisclaimer),
            "technical_detail" => Ok(ContentType::TechnicalDetail),
            "marketing" => Ok(ContentType::Marketing),
            _ => Ok(ContentType::Other),
        }
    }
}

/// Stage-1 classifier output for a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkClassification {
    pub id: String,
    pub chunk_id: String,
    pub workspace_id: String,
    pub content_type: ContentType,
    pub confidence: f32,
    pub reasoning: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    Sentence,
    Paragraph,
    Section,
    Semantic,
    Weak,
}

/// Records the quality of the split between two adjacent chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkBoundary {
    pub id: String,
    pub chunk_id: String,
    pub next_chunk_id: String,
    pub workspace_id: String,
    pub boundary_type: BoundaryType,
    pub boundary_score: f32,
    pub is_product_boundary: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    NeedsReview,
    Rejected,
}

/// The Quality Engine's verdict on a single chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkValidation {
    pub id: String,
    pub chunk_id: String,
    pub workspace_id: String,
    pub overall_score: f32,
    pub status: ValidationStatus,
    pub content_quality: f32,
    pub boundary_quality: f32,
    pub semantic_coherence: f32,
    pub completeness: f32,
    pub created_at: DateTime<Utc>,
}

// ============= Relationships =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkProductRelationType {
    Source,
    Related,
    Component,
    Alternative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkProductRelationship {
    pub id: String,
    pub chunk_id: String,
    pub product_id: String,
    pub workspace_id: String,
    pub relationship_type: ChunkProductRelationType,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductImageRelationType {
    Depicts,
    Illustrates,
    Variant,
    Related,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductImageRelationship {
    pub id: String,
    pub product_id: String,
    pub image_id: String,
    pub workspace_id: String,
    pub relationship_type: ProductImageRelationType,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkImageRelationType {
    Illustrates,
    Depicts,
    Related,
    Example,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkImageRelationship {
    pub id: String,
    pub chunk_id: String,
    pub image_id: String,
    pub workspace_id: String,
    pub relationship_type: ChunkImageRelationType,
    pub relevance_score: f32,
}

/// The minimum relevance a relationship must clear to be persisted (tunable via config).
pub const DEFAULT_RELATIONSHIP_MIN_RELEVANCE: f32 = 0.2;

// ============= Quality metrics =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkQualityMetrics {
    pub id: String,
    pub chunk_id: String,
    pub workspace_id: String,
    pub semantic_completeness: f32,
    pub boundary_quality: f32,
    pub context_preservation: f32,
    pub structural_integrity: f32,
    pub metadata_richness: f32,
    pub overall: f32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingStabilityMetrics {
    pub id: String,
    pub chunk_id: String,
    pub workspace_id: String,
    pub stability: f32,
    pub variance: f32,
    pub consistency: f32,
    pub anomaly_flag: bool,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQualityMetrics {
    pub id: String,
    pub query_id: String,
    pub workspace_id: String,
    pub precision: f32,
    pub recall: f32,
    pub mrr: f32,
    pub latency_ms: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAssessment {
    Excellent,
    Good,
    Poor,
}

impl ResponseAssessment {
    /// Assessment labels: excellent >= 0.85, good >= 0.70, else poor.
    pub fn from_overall(overall: f32) -> Self {
        if overall >= 0.85 {
            ResponseAssessment::Excellent
        } else if overall >= 0.70 {
            ResponseAssessment::Good
        } else {
            ResponseAssessment::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseQualityMetrics {
    pub id: String,
    pub response_id: String,
    pub workspace_id: String,
    pub coherence: f32,
    pub hallucination: f32,
    pub source_attribution: f32,
    pub factual_consistency: f32,
    pub overall: f32,
    pub assessment: ResponseAssessment,
    pub created_at: DateTime<Utc>,
}

// ============= Job =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    IngestPdf,
    IngestBulk,
    CreateProductsFromChunks,
}

/// A durable unit of orchestrated work. See `pipeline::job_manager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub workspace_id: String,
    pub payload: serde_json::Value,
    pub progress_percent: f32,
    pub current_step: String,
    pub total_steps: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, workspace_id: impl Into<String>, payload: serde_json::Value, priority: JobPriority, max_retries: u32) -> Self {
        Self {
            id: new_id(),
            job_type,
            status: JobStatus::Queued,
            priority,
            workspace_id: workspace_id.into(),
            payload,
            progress_percent: 0.0,
            current_step: "queued".to_string(),
            total_steps: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            retry_count: 0,
            max_retries,
            last_heartbeat: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

/// One `{current_step, total_steps, percent, step_name}` event in a job's progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgressEvent {
    pub current_step: u32,
    pub total_steps: u32,
    pub percent: f32,
    pub step_name: String,
    pub status: JobStatus,
}

/// Aggregate job counts and durations for a workspace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStatistics {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub avg_duration_ms: f64,
}

/// Paged listing used by bulk-read operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

// ============= Retrieval / RAG =============

/// Search mode accepted by the Retriever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Semantic,
    Hybrid,
    Vector,
    Similarity,
}

/// Post-filters applied to the candidate set after the nearest-neighbor fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub content_types: Option<HashSet<ContentType>>,
    pub validation_status: Option<ValidationStatus>,
    pub min_confidence: Option<f32>,
    pub min_validation_score: Option<f32>,
    pub only_product_boundaries: bool,
}

/// A ranked chunk with all the scoring signals a caller needs to explain the rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity_score: f32,
    pub boundary_score: Option<f32>,
    pub validation_score: Option<f32>,
    pub combined_score: f32,
    pub content_type: Option<ContentType>,
    pub validation_status: Option<ValidationStatus>,
}

/// A cited source in a RAG answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: String,
    pub score: f32,
    pub page_numbers: Vec<u32>,
}

/// Output of the RAG Responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub response_id: String,
    pub answer: String,
    pub sources: Vec<Source>,
    pub context_nodes_used: u32,
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let v = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_similarity_orthogonal_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn cosine_similarity_is_always_in_unit_range(
            a in proptest::collection::vec(-1000.0f32..1000.0, 1..16),
            b in proptest::collection::vec(-1000.0f32..1000.0, 1..16),
        ) {
            let len = a.len().min(b.len());
            let score = cosine_similarity(&a[..len], &b[..len]);
            proptest::prop_assert!(score >= -1.0 - 1e-4 && score <= 1.0 + 1e-4);
        }

        #[test]
        fn cosine_similarity_is_symmetric(
            a in proptest::collection::vec(-100.0f32..100.0, 2..8),
            b in proptest::collection::vec(-100.0f32..100.0, 2..8),
        ) {
            let len = a.len().min(b.len());
            let forward = cosine_similarity(&a[..len], &b[..len]);
            let backward = cosine_similarity(&b[..len], &a[..len]);
            proptest::prop_assert!((forward - backward).abs() < 1e-4);
        }
    }

    #[test]
    fn l2_normalize_unit_length() {
        let mut e = Embedding::new("c1", EntityType::Chunk, "ws1", "m", vec![3.0, 4.0]);
        e.l2_normalize();
        let norm: f32 = e.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn canonicalize_name_collapses_whitespace_and_case() {
        assert_eq!(canonicalize_name("  NOVA   Sofa "), "nova sofa");
    }

    #[test]
    fn assessment_thresholds() {
        assert_eq!(ResponseAssessment::from_overall(0.9), ResponseAssessment::Excellent);
        assert_eq!(ResponseAssessment::from_overall(0.7), ResponseAssessment::Good);
        assert_eq!(ResponseAssessment::from_overall(0.5), ResponseAssessment::Poor);
    }

    #[test]
    fn document_status_searchable_only_when_completed() {
        assert!(DocumentStatus::Completed.is_searchable());
        assert!(!DocumentStatus::Processing.is_searchable());
    }

    #[test]
    fn job_terminal_states() {
        let mut job = Job::new(JobType::IngestPdf, "ws1", serde_json::json!({}), JobPriority::Normal, 3);
        assert!(!job.is_terminal());
        job.status = JobStatus::Completed;
        assert!(job.is_terminal());
    }
}
