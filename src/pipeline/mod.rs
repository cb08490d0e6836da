//! Pipeline stages: extraction, chunking, embedding, classification,
//! enrichment, entity linking, quality scoring, retrieval, RAG answering,
//! and the job manager that orchestrates them end to end.

pub mod chunker;
pub mod classifier;
pub mod embedder;
pub mod enricher;
pub mod entity_linker;
pub mod extractor;
pub mod job_manager;
pub mod quality;
pub mod rag_responder;
pub mod retriever;

pub use chunker::{chunk_document, ChunkerOptions};
pub use classifier::Classifier;
pub use embedder::Embedder;
pub use enricher::Enricher;
pub use entity_linker::EntityLinker;
pub use extractor::{ExtractionOptions, Extractor};
pub use job_manager::JobManager;
pub use quality::QualityEngine;
pub use rag_responder::RagResponder;
pub use retriever::Retriever;
