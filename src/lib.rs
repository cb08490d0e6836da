//! # Material Kai Document Intelligence & RAG Pipeline
//!
//! Ingests PDFs, decomposes them into semantically coherent chunks and
//! images, classifies and links those pieces into product records,
//! generates multi-modal embeddings, and serves retrieval-augmented
//! queries with measured quality.
//!
//! ## Modules
//!
//! - [`ai_gateway`] - single outbound surface to LLM/embedding providers
//! - [`db`] - metadata store, vector index, and object store abstractions
//! - [`pipeline`] - the ingestion and retrieval stages themselves
//! - [`types`] - shared domain types and error handling
//! - [`utils`] - configuration and the non-product keyword table
//!
//! ## Architecture
//!
//! Ingestion is a pipeline of loosely coupled stages driven by a
//! persistent job queue: extraction, chunking, classification,
//! enrichment, embedding, entity linking, and quality scoring, all
//! orchestrated by the [`pipeline::job_manager::JobManager`]. Query
//! serving is a separate, synchronous path through
//! [`pipeline::retriever::Retriever`] and
//! [`pipeline::rag_responder::RagResponder`].

/// The AI Gateway: single outbound surface to LLM/embedding providers.
pub mod ai_gateway;
/// Metadata store, vector index, and object store abstractions.
pub mod db;
/// Ingestion and retrieval pipeline stages.
pub mod pipeline;
/// Shared domain types and error handling.
pub mod types;
/// Configuration and the non-product keyword table.
pub mod utils;

pub use types::{AppError, Result};
pub use utils::PipelineConfig;

use ai_gateway::{AiGateway, AiProvider, OllamaProvider, OpenAiProvider};
use db::{EmbeddingIndex, LibsqlStore, LocalObjectStore, MetadataStore, ObjectStore};
use pipeline::{Classifier, Embedder, Enricher, EntityLinker, Extractor, JobManager, QualityEngine, RagResponder, Retriever};
use std::sync::Arc;

/// Every collaborator a running pipeline needs, wired once at startup and
/// shared across jobs and query handlers alike.
#[derive(Clone)]
pub struct AppState {
    pub config: PipelineConfig,
    pub store: Arc<dyn MetadataStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub embedding_index: Arc<EmbeddingIndex>,
    pub gateway: Arc<AiGateway>,
    pub job_manager: Arc<JobManager>,
    pub retriever: Arc<Retriever>,
    pub rag_responder: Arc<RagResponder>,
}

fn build_primary_provider(config: &PipelineConfig) -> Result<Box<dyn AiProvider>> {
    match &config.openai_api_key {
        Some(key) => Ok(Box::new(OpenAiProvider::new(key.clone()))),
        None => Ok(Box::new(OllamaProvider::new(&config.ollama_base_url)?)),
    }
}

fn build_fallback_provider(config: &PipelineConfig) -> Option<Box<dyn AiProvider>> {
    if config.openai_api_key.is_some() {
        OllamaProvider::new(&config.ollama_base_url).ok().map(|p| Box::new(p) as Box<dyn AiProvider>)
    } else {
        None
    }
}

impl AppState {
    /// Opens every backing store, wires the AI Gateway to the configured
    /// provider(s), and assembles the pipeline stages on top of them.
    pub async fn build(config: PipelineConfig) -> Result<Self> {
        let store: Arc<dyn MetadataStore> = match &config.database.auth_token {
            Some(token) => Arc::new(LibsqlStore::open_remote(config.database.url.clone(), token.clone()).await?),
            None => Arc::new(LibsqlStore::open_local(&config.database.url).await?),
        };
        let object_store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(
            config.object_store.base_path.clone(),
            config.object_store.bucket.clone(),
            config.object_store.public_base_url.clone(),
        ));
        let embedding_index = Arc::new(EmbeddingIndex::open(config.vector_index.data_dir.clone()).await?);

        let primary = build_primary_provider(&config)?;
        let fallback = build_fallback_provider(&config);
        let gateway = Arc::new(AiGateway::new(primary, fallback, &config));

        let extractor = Arc::new(Extractor::new(Arc::clone(&store), Arc::clone(&object_store)));
        let classifier = Arc::new(Classifier::new(Arc::clone(&gateway), Arc::clone(&store), config.models.classifier_model.clone(), config.thresholds.clone()));
        let enricher = Arc::new(Enricher::new(Arc::clone(&gateway), Arc::clone(&store), config.models.enricher_model.clone(), config.thresholds.clone()));
        let quality = Arc::new(QualityEngine::new(Arc::clone(&store)));
        let embedder = Arc::new(Embedder::new(Arc::clone(&gateway), Arc::clone(&store), Arc::clone(&embedding_index), Arc::clone(&quality)));
        let entity_linker = Arc::new(EntityLinker::new(Arc::clone(&store), config.thresholds.relationship_min_relevance));
        let retriever = Arc::new(Retriever::new(Arc::clone(&store), Arc::clone(&embedding_index), Arc::clone(&embedder), Arc::clone(&quality)));
        let rag_responder = Arc::new(RagResponder::new(Arc::clone(&gateway), Arc::clone(&retriever), Arc::clone(&quality), config.models.rag_model.clone()));

        let job_manager = Arc::new(JobManager::new(
            Arc::clone(&store),
            Arc::clone(&object_store),
            Arc::clone(&embedding_index),
            extractor,
            classifier,
            enricher,
            embedder,
            entity_linker,
            quality,
            config.clone(),
        ));

        Ok(Self { config, store, object_store, embedding_index, gateway, job_manager, retriever, rag_responder })
    }
}
