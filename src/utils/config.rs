//! Environment-driven configuration for the pipeline binary and library facade.

use crate::types::{AppError, Result};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Local file path, `:memory:`, or a `libsql://` remote URL.
    pub url: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Root directory for the local-filesystem object store backend.
    pub base_path: String,
    pub bucket: String,
    pub public_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub data_dir: String,
    pub text_dimensions: u32,
    pub image_dimensions: u32,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub classifier_model: String,
    pub enricher_model: String,
    pub rag_model: String,
    pub embedding_text_model: String,
    pub embedding_image_model: String,
}

#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub stage1_confidence: f32,
    pub stage2_confidence: f32,
    pub relationship_min_relevance: f32,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub worker_pool_size: usize,
    pub lease_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub max_retries: u32,
    pub per_job_concurrency: usize,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    pub chunk_size_tokens: usize,
    pub chunk_overlap_tokens: usize,
}

/// Per-provider rate limit, expressed as requests allowed per minute.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: HashMap<String, u32>,
    pub default_requests_per_minute: u32,
}

impl RateLimitConfig {
    pub fn for_provider(&self, provider: &str) -> u32 {
        self.requests_per_minute
            .get(provider)
            .copied()
            .unwrap_or(self.default_requests_per_minute)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    pub vector_index: VectorIndexConfig,
    pub models: ModelConfig,
    pub thresholds: ThresholdConfig,
    pub jobs: JobConfig,
    pub chunking: ChunkingConfig,
    pub rate_limits: RateLimitConfig,
    pub openai_api_key: Option<String>,
    pub ollama_base_url: String,
    pub max_pdf_bytes: u64,
    pub request_timeout: Duration,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_var(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{key} is not a valid value: {raw}"))),
        None => Ok(default),
    }
}

impl PipelineConfig {
    /// Loads configuration from environment variables, falling back to `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut requests_per_minute = HashMap::new();
        for (key, value) in env::vars() {
            if let Some(provider) = key
                .strip_prefix("RATE_LIMIT_")
                .and_then(|rest| rest.strip_suffix("_REQUESTS_PER_MINUTE"))
            {
                let parsed: u32 = value.parse().map_err(|_| {
                    AppError::Config(format!("{key} is not a valid integer: {value}"))
                })?;
                requests_per_minute.insert(provider.to_lowercase(), parsed);
            }
        }

        Ok(Self {
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "./data/pipeline.db"),
                auth_token: env_var("DATABASE_AUTH_TOKEN"),
            },
            object_store: ObjectStoreConfig {
                base_path: env_or("OBJECT_STORE_PATH", "./data/objects"),
                bucket: env_or("OBJECT_STORE_BUCKET", "material-kai"),
                public_base_url: env_var("OBJECT_STORE_PUBLIC_BASE_URL"),
            },
            vector_index: VectorIndexConfig {
                data_dir: env_or("VECTOR_INDEX_PATH", "./data/vectors"),
                text_dimensions: env_parse("EMBEDDING_TEXT_DIMENSIONS", 1536)?,
                image_dimensions: env_parse("EMBEDDING_IMAGE_DIMENSIONS", 512)?,
            },
            models: ModelConfig {
                classifier_model: env_or("CLASSIFIER_MODEL", "gpt-4o-mini"),
                enricher_model: env_or("ENRICHER_MODEL", "gpt-4o-mini"),
                rag_model: env_or("RAG_MODEL", "gpt-4o"),
                embedding_text_model: env_or("EMBEDDING_TEXT_MODEL", "text-embedding-3-small"),
                embedding_image_model: env_or("EMBEDDING_IMAGE_MODEL", "clip-vit-base-patch32"),
            },
            thresholds: ThresholdConfig {
                stage1_confidence: env_parse("STAGE1_CONFIDENCE_THRESHOLD", 0.4)?,
                stage2_confidence: env_parse("STAGE2_CONFIDENCE_THRESHOLD", 0.4)?,
                relationship_min_relevance: env_parse("RELATIONSHIP_MIN_RELEVANCE", 0.2)?,
            },
            jobs: JobConfig {
                worker_pool_size: env_parse("WORKER_POOL_SIZE", 4)?,
                lease_seconds: env_parse("JOB_LEASE_SECONDS", 300)?,
                heartbeat_interval_seconds: env_parse("JOB_HEARTBEAT_SECONDS", 30)?,
                max_retries: env_parse("JOB_MAX_RETRIES", 3)?,
                per_job_concurrency: env_parse("JOB_PER_JOB_CONCURRENCY", 10)?,
                shutdown_grace_seconds: env_parse("JOB_SHUTDOWN_GRACE_SECONDS", 30)?,
            },
            chunking: ChunkingConfig {
                chunk_size_tokens: env_parse("CHUNK_SIZE_TOKENS", 1000)?,
                chunk_overlap_tokens: env_parse("CHUNK_OVERLAP_TOKENS", 100)?,
            },
            rate_limits: RateLimitConfig {
                requests_per_minute,
                default_requests_per_minute: env_parse("RATE_LIMIT_DEFAULT_REQUESTS_PER_MINUTE", 60)?,
            },
            openai_api_key: env_var("OPENAI_API_KEY"),
            ollama_base_url: env_or("OLLAMA_URL", "http://localhost:11434"),
            max_pdf_bytes: env_parse("MAX_PDF_BYTES", 100 * 1024 * 1024)?,
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECONDS", 60)?),
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "./data/pipeline.db".to_string(),
                auth_token: None,
            },
            object_store: ObjectStoreConfig {
                base_path: "./data/objects".to_string(),
                bucket: "material-kai".to_string(),
                public_base_url: None,
            },
            vector_index: VectorIndexConfig {
                data_dir: "./data/vectors".to_string(),
                text_dimensions: 1536,
                image_dimensions: 512,
            },
            models: ModelConfig {
                classifier_model: "gpt-4o-mini".to_string(),
                enricher_model: "gpt-4o-mini".to_string(),
                rag_model: "gpt-4o".to_string(),
                embedding_text_model: "text-embedding-3-small".to_string(),
                embedding_image_model: "clip-vit-base-patch32".to_string(),
            },
            thresholds: ThresholdConfig {
                stage1_confidence: 0.4,
                stage2_confidence: 0.4,
                relationship_min_relevance: 0.2,
            },
            jobs: JobConfig {
                worker_pool_size: 4,
                lease_seconds: 300,
                heartbeat_interval_seconds: 30,
                max_retries: 3,
                per_job_concurrency: 10,
                shutdown_grace_seconds: 30,
            },
            chunking: ChunkingConfig {
                chunk_size_tokens: 1000,
                chunk_overlap_tokens: 100,
            },
            rate_limits: RateLimitConfig {
                requests_per_minute: HashMap::new(),
                default_requests_per_minute: 60,
            },
            openai_api_key: None,
            ollama_base_url: "http://localhost:11434".to_string(),
            max_pdf_bytes: 100 * 1024 * 1024,
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_match_documented_defaults() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.thresholds.stage1_confidence, 0.4);
        assert_eq!(cfg.thresholds.stage2_confidence, 0.4);
        assert_eq!(cfg.thresholds.relationship_min_relevance, 0.2);
    }

    #[test]
    fn rate_limit_falls_back_to_default() {
        let cfg = RateLimitConfig {
            requests_per_minute: HashMap::from([("openai".to_string(), 120)]),
            default_requests_per_minute: 60,
        };
        assert_eq!(cfg.for_provider("openai"), 120);
        assert_eq!(cfg.for_provider("ollama"), 60);
    }

    #[test]
    fn default_chunking_matches_thousand_token_chunks() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.chunking.chunk_size_tokens, 1000);
        assert_eq!(cfg.chunking.chunk_overlap_tokens, 100);
    }
}
