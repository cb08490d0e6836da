//! Durable job orchestration: a configurable worker pool pulls queued jobs
//! off the `MetadataStore`, drives each through the ingestion pipeline with
//! cooperative cancellation at every step boundary, and coalesces progress
//! writes so a busy job never spams the store more than once a second.

use crate::db::{EmbeddingIndex, MetadataStore, ObjectStore};
use crate::pipeline::chunker::{self, ChunkerOptions};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::embedder::Embedder;
use crate::pipeline::enricher::Enricher;
use crate::pipeline::entity_linker::EntityLinker;
use crate::pipeline::extractor::{ExtractionOptions, Extractor};
use crate::pipeline::quality::QualityEngine;
use crate::types::{AppError, Document, DocumentStatus, Job, JobStatus, JobStatistics, JobType, Page, Result};
use crate::utils::config::PipelineConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_COALESCE_INTERVAL: Duration = Duration::from_secs(1);

pub struct JobManager {
    store: Arc<dyn MetadataStore>,
    object_store: Arc<dyn ObjectStore>,
    embedding_index: Arc<EmbeddingIndex>,
    extractor: Arc<Extractor>,
    classifier: Arc<Classifier>,
    enricher: Arc<Enricher>,
    embedder: Arc<Embedder>,
    entity_linker: Arc<EntityLinker>,
    quality: Arc<QualityEngine>,
    config: PipelineConfig,
}

/// Throttles progress writes to at most once per `PROGRESS_COALESCE_INTERVAL`.
struct ProgressWriter<'a> {
    store: &'a dyn MetadataStore,
    job_id: String,
    last_write: Instant,
}

impl<'a> ProgressWriter<'a> {
    fn new(store: &'a dyn MetadataStore, job_id: impl Into<String>) -> Self {
        Self { store, job_id: job_id.into(), last_write: Instant::now() - PROGRESS_COALESCE_INTERVAL }
    }

    async fn report(&mut self, step: &str, percent: f32) -> Result<()> {
        if self.last_write.elapsed() < PROGRESS_COALESCE_INTERVAL {
            return Ok(());
        }
        self.last_write = Instant::now();
        self.store.update_job_progress(&self.job_id, step, percent).await?;
        self.store.heartbeat_job(&self.job_id).await
    }
}

impl JobManager {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        object_store: Arc<dyn ObjectStore>,
        embedding_index: Arc<EmbeddingIndex>,
        extractor: Arc<Extractor>,
        classifier: Arc<Classifier>,
        enricher: Arc<Enricher>,
        embedder: Arc<Embedder>,
        entity_linker: Arc<EntityLinker>,
        quality: Arc<QualityEngine>,
        config: PipelineConfig,
    ) -> Self {
        Self { store, object_store, embedding_index, extractor, classifier, enricher, embedder, entity_linker, quality, config }
    }

    pub async fn enqueue(&self, job_type: JobType, payload: serde_json::Value, workspace_id: &str, priority: crate::types::JobPriority, max_retries: u32) -> Result<String> {
        let job = Job::new(job_type, workspace_id, payload, priority, max_retries);
        let job_id = job.id.clone();
        self.store.create_job(&job).await?;
        Ok(job_id)
    }

    pub async fn get(&self, workspace_id: &str, job_id: &str) -> Result<Job> {
        self.store.get_job(workspace_id, job_id).await
    }

    pub async fn list(&self, workspace_id: &str, status: Option<JobStatus>, page: u32, page_size: u32) -> Result<Page<Job>> {
        self.store.list_jobs(workspace_id, status, page, page_size).await
    }

    pub async fn cancel(&self, workspace_id: &str, job_id: &str) -> Result<()> {
        self.store.cancel_job(workspace_id, job_id).await
    }

    pub async fn statistics(&self, workspace_id: &str) -> Result<JobStatistics> {
        self.store.job_statistics(workspace_id).await
    }

    /// Runs `worker_pool_size` cooperative worker loops until `shutdown`
    /// fires, then gives in-flight workers up to `shutdown_grace_seconds`
    /// to persist progress and exit before returning.
    pub async fn run_worker_pool(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::new();
        for worker_id in 0..self.config.jobs.worker_pool_size {
            let manager = Arc::clone(&self);
            let mut worker_shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                manager.worker_loop(worker_id, &mut worker_shutdown).await;
            }));
        }

        let _ = shutdown.changed().await;
        let grace = Duration::from_secs(self.config.jobs.shutdown_grace_seconds);
        let _ = tokio::time::timeout(grace, join_all_handles(handles)).await;
    }

    async fn worker_loop(&self, worker_id: usize, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                tracing::info!(worker_id, "worker shutting down");
                return;
            }

            match self.store.claim_next_job(self.config.jobs.lease_seconds).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.run_job(job, shutdown).await {
                        tracing::warn!(worker_id, error = %e, "job run failed");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = sleep(POLL_INTERVAL) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "failed to claim job");
                    sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn run_job(&self, job: Job, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let job_id = job.id.clone();
        let result = match job.job_type {
            JobType::IngestPdf => self.run_ingest_pdf(&job, shutdown).await,
            JobType::IngestBulk => self.run_ingest_bulk(&job, shutdown).await,
            JobType::CreateProductsFromChunks => self.run_create_products_from_chunks(&job, shutdown).await,
        };

        match result {
            // A job can run to completion after `cancel()` flipped its row mid-flight
            // (the last cooperative check point already passed). Re-check before
            // declaring victory so a cancelled job never gets resurrected as completed.
            Ok(()) if self.check_cancelled(shutdown, &job.workspace_id, &job_id).await.is_err() => {
                self.store.cancel_job(&job.workspace_id, &job_id).await
            }
            Ok(()) => self.store.complete_job(&job_id).await,
            Err(AppError::Cancelled) => self.store.cancel_job(&job.workspace_id, &job_id).await,
            Err(AppError::Transient(msg)) => self.store.fail_job(&job_id, &msg, true).await,
            Err(e) => self.store.fail_job(&job_id, &e.to_string(), false).await,
        }
    }

    /// Cooperative cancellation check point. The worker-pool shutdown flag covers
    /// process-wide termination; the job's own row in the store covers an
    /// individually cancelled job. Reading the row (rather than a process-local
    /// flag) keeps cancellation durable across worker restarts, matching a job
    /// cancelled while claimed by a different process.
    async fn check_cancelled(&self, shutdown: &watch::Receiver<bool>, workspace_id: &str, job_id: &str) -> Result<()> {
        if *shutdown.borrow() {
            return Err(AppError::Cancelled);
        }
        let job = self.store.get_job(workspace_id, job_id).await?;
        if job.status == JobStatus::Cancelled {
            return Err(AppError::Cancelled);
        }
        Ok(())
    }

    async fn run_ingest_pdf(&self, job: &Job, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let mut progress = ProgressWriter::new(self.store.as_ref(), &job.id);
        let workspace_id = job.workspace_id.clone();

        let document_id = job.payload.get("document_id").and_then(|v| v.as_str()).ok_or_else(|| AppError::InvalidInput("ingest_pdf job missing document_id".into()))?.to_string();
        let document = self.store.get_document(&workspace_id, &document_id).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("extracting", 0.05).await?;
        let pdf_bytes = self.object_store.get(&document.source_uri).await?;
        let outcome = self.extractor.extract(&workspace_id, &document_id, &pdf_bytes, &ExtractionOptions::default()).await?;
        self.store.insert_images(&outcome.images).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("chunking", 0.20).await?;
        let options = ChunkerOptions::from(&self.config.chunking);
        let chunks = chunker::chunk_document(&document_id, &workspace_id, &outcome.segments, &options);
        self.store.insert_chunks(&chunks).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("classifying", 0.35).await?;
        let classifications = self.classifier.classify_document(&workspace_id, &chunks).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("enriching", 0.50).await?;
        let candidates: Vec<_> = chunks
            .iter()
            .zip(classifications.iter())
            .filter(|(_, c)| c.content_type == crate::types::ContentType::Product && c.confidence >= self.config.thresholds.stage1_confidence)
            .map(|(chunk, _)| chunk.clone())
            .collect();
        let products = self.enricher.enrich_candidates(&workspace_id, &document_id, &candidates, &chunks).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("embedding", 0.65).await?;
        let chunk_texts: Vec<(String, String)> = chunks.iter().map(|c| (c.id.clone(), c.content.clone())).collect();
        self.embedder.embed_chunks(&workspace_id, &chunk_texts).await?;
        for image in &outcome.images {
            let bytes = self.object_store.get(&image.storage_uri).await?;
            self.embedder.embed_image(&workspace_id, &image.id, bytes).await?;
        }

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("linking", 0.80).await?;
        for product in &products {
            let product_page = chunks.first().and_then(|c| c.page_numbers.first().copied()).unwrap_or(1);
            for chunk in &chunks {
                let _ = self.entity_linker.link_chunk_to_product(&workspace_id, chunk, product, product_page).await?;
            }
            for image in &outcome.images {
                let _ = self.entity_linker.link_product_to_image(&workspace_id, product, product_page, image).await?;
            }
        }
        for chunk in &chunks {
            for image in &outcome.images {
                let _ = self.entity_linker.link_chunk_to_image(&workspace_id, chunk, image).await?;
            }
        }

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        progress.report("scoring_quality", 0.92).await?;
        let is_product: std::collections::HashMap<&str, bool> =
            classifications.iter().map(|c| (c.chunk_id.as_str(), c.content_type == crate::types::ContentType::Product)).collect();
        for chunk in &chunks {
            let validation = self.quality.validate_chunk(&workspace_id, &chunk.id, &chunk.content).await?;
            let richness = crate::pipeline::quality::validation_richness(&validation);
            self.quality.score_chunk(&workspace_id, &chunk.id, &chunk.content, chunk.metadata.len() + richness).await?;
        }
        for pair in chunks.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            let is_product_boundary = *is_product.get(left.id.as_str()).unwrap_or(&false) || *is_product.get(right.id.as_str()).unwrap_or(&false);
            self.quality.score_boundary(&workspace_id, &left.id, &right.id, &left.content, &right.content, is_product_boundary).await?;
        }

        self.store
            .update_document_counts(&workspace_id, &document_id, document.page_count, chunks.len() as u32, outcome.images.len() as u32)
            .await?;
        self.store.update_document_status(&workspace_id, &document_id, DocumentStatus::Completed, None).await?;
        progress.report("completed", 1.0).await?;
        Ok(())
    }

    async fn run_ingest_bulk(&self, job: &Job, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let document_ids: Vec<String> = job
            .payload
            .get("document_ids")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let semaphore = Arc::new(Semaphore::new(self.config.jobs.per_job_concurrency));
        let mut progress = ProgressWriter::new(self.store.as_ref(), &job.id);
        let total = document_ids.len().max(1);

        for (index, document_id) in document_ids.iter().enumerate() {
            self.check_cancelled(shutdown, &job.workspace_id, &job.id).await?;
            let _permit = semaphore.acquire().await.map_err(|_| AppError::Internal("semaphore closed".into()))?;
            let sub_job = Job::new(JobType::IngestPdf, job.workspace_id.clone(), serde_json::json!({ "document_id": document_id }), job.priority, job.max_retries);
            self.run_job(sub_job, shutdown).await?;
            progress.report("bulk_ingest", (index + 1) as f32 / total as f32).await?;
        }
        Ok(())
    }

    async fn run_create_products_from_chunks(&self, job: &Job, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let document_id = job.payload.get("document_id").and_then(|v| v.as_str()).ok_or_else(|| AppError::InvalidInput("create_products_from_chunks job missing document_id".into()))?;
        let workspace_id = job.workspace_id.clone();
        let chunks = self.store.list_chunks_for_document(&workspace_id, document_id).await?;

        self.check_cancelled(shutdown, &workspace_id, &job.id).await?;
        let classifications = self.classifier.classify_document(&workspace_id, &chunks).await?;
        let candidates: Vec<_> = chunks
            .iter()
            .zip(classifications.iter())
            .filter(|(_, c)| c.content_type == crate::types::ContentType::Product)
            .map(|(chunk, _)| chunk.clone())
            .collect();
        self.enricher.enrich_candidates(&workspace_id, document_id, &candidates, &chunks).await?;
        Ok(())
    }

    /// Requeues jobs abandoned by a crashed or stalled worker.
    pub async fn reclaim_expired_leases(&self) -> Result<u32> {
        self.store.reclaim_expired_leases(self.config.jobs.lease_seconds).await
    }
}

async fn join_all_handles(handles: Vec<tokio::task::JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Registers a new document record and enqueues its ingestion job in one step.
pub async fn submit_document(manager: &JobManager, store: &dyn MetadataStore, workspace_id: &str, source_uri: &str, filename: &str) -> Result<(String, String)> {
    let document = Document::new(workspace_id, source_uri, filename);
    store.create_document(&document).await?;
    let job_id = manager.enqueue(JobType::IngestPdf, serde_json::json!({ "document_id": document.id }), workspace_id, crate::types::JobPriority::Normal, 3).await?;
    Ok((document.id, job_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MockMetadataStore;

    #[tokio::test]
    async fn progress_writer_suppresses_rapid_successive_calls() {
        let mut mock = MockMetadataStore::new();
        mock.expect_update_job_progress().times(1).returning(|_, _, _| Box::pin(async { Ok(()) }));
        mock.expect_heartbeat_job().times(1).returning(|_| Box::pin(async { Ok(()) }));

        let mut writer = ProgressWriter::new(&mock, "job-1");
        writer.report("extracting", 0.1).await.unwrap();
        writer.report("chunking", 0.2).await.unwrap();
    }

    #[tokio::test]
    async fn progress_writer_writes_again_after_the_coalesce_window() {
        let mut mock = MockMetadataStore::new();
        mock.expect_update_job_progress().times(2).returning(|_, _, _| Box::pin(async { Ok(()) }));
        mock.expect_heartbeat_job().times(2).returning(|_| Box::pin(async { Ok(()) }));

        let mut writer = ProgressWriter::new(&mock, "job-1");
        writer.report("extracting", 0.1).await.unwrap();
        writer.last_write -= PROGRESS_COALESCE_INTERVAL * 2;
        writer.report("chunking", 0.2).await.unwrap();
    }
}
