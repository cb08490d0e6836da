//! `MetadataStore`: the relational access layer over documents, chunks, images,
//! embeddings, products, classifications, relationships, quality metrics and jobs.
//!
//! Every method takes (or is scoped by) a `workspace_id`; implementations must
//! carry it as a hard `WHERE` predicate on every query touching workspace-owned
//! rows; cross-workspace leakage is the cardinal invariant violation for this
//! layer.

use crate::types::*;
use async_trait::async_trait;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ---- documents ----
    async fn create_document(&self, document: &Document) -> Result<()>;
    async fn get_document(&self, workspace_id: &str, document_id: &str) -> Result<Document>;
    async fn update_document_status(&self, workspace_id: &str, document_id: &str, status: DocumentStatus, error: Option<&str>) -> Result<()>;
    async fn update_document_counts(&self, workspace_id: &str, document_id: &str, page_count: u32, total_chunks: u32, total_images: u32) -> Result<()>;
    async fn list_documents(&self, workspace_id: &str, page: u32, page_size: u32) -> Result<Page<Document>>;

    // ---- chunks ----
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()>;
    async fn get_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Chunk>;
    async fn list_chunks_for_document(&self, workspace_id: &str, document_id: &str) -> Result<Vec<Chunk>>;
    async fn count_chunks_for_document(&self, workspace_id: &str, document_id: &str) -> Result<u32>;

    // ---- images ----
    async fn insert_images(&self, images: &[Image]) -> Result<()>;
    async fn get_image(&self, workspace_id: &str, image_id: &str) -> Result<Image>;
    async fn list_images_for_document(&self, workspace_id: &str, document_id: &str) -> Result<Vec<Image>>;
    async fn find_image_by_content_hash(&self, workspace_id: &str, content_hash: &str) -> Result<Option<Image>>;

    // ---- embeddings (relational side-table; vectors themselves live in EmbeddingIndex) ----
    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()>;
    async fn get_embedding(&self, workspace_id: &str, entity_id: &str, entity_type: EntityType, model: &str) -> Result<Option<Embedding>>;

    // ---- products ----
    async fn create_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn get_product(&self, workspace_id: &str, product_id: &str) -> Result<Product>;
    async fn find_product_by_canonical_name(&self, workspace_id: &str, canonical_name: &str) -> Result<Option<Product>>;
    async fn list_products(&self, workspace_id: &str, page: u32, page_size: u32) -> Result<Page<Product>>;

    // ---- chunk analysis ----
    async fn insert_classification(&self, classification: &ChunkClassification) -> Result<()>;
    async fn get_classification_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkClassification>>;
    async fn insert_boundary(&self, boundary: &ChunkBoundary) -> Result<()>;
    async fn get_boundary_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkBoundary>>;
    async fn insert_validation(&self, validation: &ChunkValidation) -> Result<()>;
    async fn get_validation_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkValidation>>;

    // ---- relationships ----
    async fn insert_chunk_product_relationship(&self, rel: &ChunkProductRelationship) -> Result<()>;
    async fn insert_product_image_relationship(&self, rel: &ProductImageRelationship) -> Result<()>;
    async fn insert_chunk_image_relationship(&self, rel: &ChunkImageRelationship) -> Result<()>;
    async fn list_products_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Vec<ChunkProductRelationship>>;
    async fn list_images_for_product(&self, workspace_id: &str, product_id: &str) -> Result<Vec<ProductImageRelationship>>;

    // ---- quality metrics ----
    async fn insert_chunk_quality(&self, metrics: &ChunkQualityMetrics) -> Result<()>;
    async fn insert_embedding_stability(&self, metrics: &EmbeddingStabilityMetrics) -> Result<()>;
    async fn insert_retrieval_quality(&self, metrics: &RetrievalQualityMetrics) -> Result<()>;
    async fn insert_response_quality(&self, metrics: &ResponseQualityMetrics) -> Result<()>;

    // ---- jobs ----
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_job(&self, workspace_id: &str, job_id: &str) -> Result<Job>;
    /// Atomically claims the next queued job (highest priority, oldest first) and
    /// marks it `Running` with a fresh lease. Returns `None` if nothing is queued.
    async fn claim_next_job(&self, lease_seconds: u64) -> Result<Option<Job>>;
    async fn heartbeat_job(&self, job_id: &str) -> Result<()>;
    async fn update_job_progress(&self, job_id: &str, current_step: &str, progress_percent: f32) -> Result<()>;
    async fn complete_job(&self, job_id: &str) -> Result<()>;
    async fn fail_job(&self, job_id: &str, error: &str, retry: bool) -> Result<()>;
    async fn cancel_job(&self, workspace_id: &str, job_id: &str) -> Result<()>;
    async fn list_jobs(&self, workspace_id: &str, status: Option<JobStatus>, page: u32, page_size: u32) -> Result<Page<Job>>;
    async fn job_statistics(&self, workspace_id: &str) -> Result<JobStatistics>;
    /// Requeues jobs whose lease has expired while still `Running` (a crashed or stalled worker).
    async fn reclaim_expired_leases(&self, lease_seconds: u64) -> Result<u32>;

    /// Creates every table this store needs, idempotently.
    async fn initialize_schema(&self) -> Result<()>;
}
