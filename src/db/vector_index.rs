//! Embedded HNSW nearest-neighbor index over `mk_vector_store`.
//!
//! Vectors are namespaced per `(workspace_id, entity_type, model)` so that a text
//! embedding space and an image embedding space never collide, and so one
//! workspace's ids can never be returned for another workspace's query.

use crate::types::{AppError, EntityType, Result};
use mk_vector_store::{Config, DistanceMetric, VectorDb};
use std::path::PathBuf;

/// One nearest-neighbor hit: the entity id and its similarity score.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub entity_id: String,
    pub score: f32,
}

fn namespace(workspace_id: &str, entity_type: EntityType, model: &str) -> String {
    format!("{workspace_id}:{}:{model}", entity_type.as_str())
}

/// Thin wrapper over an embedded HNSW index that adds workspace/model namespacing
/// and the `EntityType` vocabulary this pipeline uses.
pub struct EmbeddingIndex {
    db: VectorDb,
}

impl EmbeddingIndex {
    /// Opens (or creates) a persistent index rooted at `data_dir`.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let config = Config::persistent(data_dir.into().to_string_lossy().to_string());
        let db = VectorDb::open(config)
            .await
            .map_err(|e| AppError::Internal(format!("failed to open vector index: {e}")))?;
        Ok(Self { db })
    }

    /// Opens an ephemeral in-memory index, used in tests.
    pub async fn open_in_memory() -> Result<Self> {
        let db = VectorDb::open(Config::memory())
            .await
            .map_err(|e| AppError::Internal(format!("failed to open in-memory vector index: {e}")))?;
        Ok(Self { db })
    }

    async fn ensure_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        if !self.db.list_collections().contains(&name.to_string()) {
            self.db
                .create_collection(name, dimensions, DistanceMetric::Cosine)
                .await
                .map_err(|e| AppError::Internal(format!("failed to create collection {name}: {e}")))?;
        }
        Ok(())
    }

    /// Inserts or overwrites the vector for `entity_id` in its namespace.
    pub async fn upsert(&self, workspace_id: &str, entity_type: EntityType, model: &str, entity_id: &str, vector: &[f32]) -> Result<()> {
        let ns = namespace(workspace_id, entity_type, model);
        self.ensure_collection(&ns, vector.len()).await?;
        self.db
            .insert(&ns, entity_id, vector, None)
            .await
            .map_err(|e| AppError::Internal(format!("failed to upsert vector: {e}")))?;
        Ok(())
    }

    /// Returns the `limit` nearest neighbors to `vector` within one workspace/entity/model namespace.
    pub async fn search(&self, workspace_id: &str, entity_type: EntityType, model: &str, vector: &[f32], limit: usize) -> Result<Vec<IndexHit>> {
        let ns = namespace(workspace_id, entity_type, model);
        if !self.db.list_collections().contains(&ns.to_string()) {
            return Ok(Vec::new());
        }
        let hits = self
            .db
            .search(&ns, vector, limit)
            .await
            .map_err(|e| AppError::Internal(format!("vector search failed: {e}")))?;
        Ok(hits
            .into_iter()
            .map(|h| IndexHit { entity_id: h.id, score: h.score })
            .collect())
    }

    /// Removes an entity's vector from its namespace. No-op if absent.
    pub async fn delete(&self, workspace_id: &str, entity_type: EntityType, model: &str, entity_id: &str) -> Result<()> {
        let ns = namespace(workspace_id, entity_type, model);
        let _ = self.db.delete(&ns, entity_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_then_search_returns_nearest_neighbor() {
        let index = EmbeddingIndex::open_in_memory().await.unwrap();
        index.upsert("ws1", EntityType::Chunk, "text-embedding-3-small", "c1", &[1.0, 0.0, 0.0]).await.unwrap();
        index.upsert("ws1", EntityType::Chunk, "text-embedding-3-small", "c2", &[0.0, 1.0, 0.0]).await.unwrap();

        let hits = index.search("ws1", EntityType::Chunk, "text-embedding-3-small", &[0.9, 0.1, 0.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, "c1");
    }

    #[tokio::test]
    async fn namespaces_isolate_workspaces() {
        let index = EmbeddingIndex::open_in_memory().await.unwrap();
        index.upsert("ws1", EntityType::Chunk, "m", "c1", &[1.0, 0.0]).await.unwrap();

        let hits = index.search("ws2", EntityType::Chunk, "m", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn namespaces_isolate_entity_types() {
        let index = EmbeddingIndex::open_in_memory().await.unwrap();
        index.upsert("ws1", EntityType::Chunk, "m", "c1", &[1.0, 0.0]).await.unwrap();

        let hits = index.search("ws1", EntityType::Product, "m", &[1.0, 0.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_against_unknown_namespace_returns_empty() {
        let index = EmbeddingIndex::open_in_memory().await.unwrap();
        let hits = index.search("ws1", EntityType::Chunk, "nope", &[1.0], 5).await.unwrap();
        assert!(hits.is_empty());
    }
}
