//! libsql-backed `MetadataStore`: a local file (or remote Turso replica) holding
//! every workspace-scoped relational table in the data model.

use super::schema::SCHEMA_STATEMENTS;
use super::traits::MetadataStore;
use crate::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Row};

pub struct LibsqlStore {
    db: Database,
}

fn db_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(e.to_string())
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("malformed timestamp {s}: {e}")))
}

impl LibsqlStore {
    /// Opens a local file (or `:memory:`) database and creates the schema.
    pub async fn open_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(db_err)?;
        let store = Self { db };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Opens a remote Turso-compatible database.
    pub async fn open_remote(url: String, auth_token: String) -> Result<Self> {
        let db = Builder::new_remote(url, auth_token).build().await.map_err(db_err)?;
        let store = Self { db };
        store.initialize_schema().await?;
        Ok(store)
    }

    fn connection(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    async fn query_one<T>(&self, sql: &str, params: impl libsql::params::IntoParams, map: impl FnOnce(&Row) -> Result<T>) -> Result<Option<T>> {
        let conn = self.connection()?;
        let mut rows = conn.query(sql, params).await.map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(map(&row)?)),
            None => Ok(None),
        }
    }

    async fn query_many<T>(&self, sql: &str, params: impl libsql::params::IntoParams, map: impl Fn(&Row) -> Result<T>) -> Result<Vec<T>> {
        let conn = self.connection()?;
        let mut rows = conn.query(sql, params).await.map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(map(&row)?);
        }
        Ok(out)
    }
}

// ---- row mappers ----

fn row_document(row: &Row) -> Result<Document> {
    Ok(Document {
        id: row.get(0).map_err(db_err)?,
        workspace_id: row.get(1).map_err(db_err)?,
        source_uri: row.get(2).map_err(db_err)?,
        filename: row.get(3).map_err(db_err)?,
        page_count: row.get::<i64>(4).map_err(db_err)? as u32,
        status: serde_json::from_str(&format!("\"{}\"", row.get::<String>(5).map_err(db_err)?)).map_err(|e| AppError::Internal(e.to_string()))?,
        created_at: parse_rfc3339(&row.get::<String>(6).map_err(db_err)?)?,
        updated_at: parse_rfc3339(&row.get::<String>(7).map_err(db_err)?)?,
        total_chunks: row.get::<i64>(8).map_err(db_err)? as u32,
        total_images: row.get::<i64>(9).map_err(db_err)? as u32,
        total_products: row.get::<i64>(10).map_err(db_err)? as u32,
        error: row.get(11).map_err(db_err)?,
    })
}

fn row_chunk(row: &Row) -> Result<Chunk> {
    let page_numbers: Vec<u32> = serde_json::from_str(&row.get::<String>(5).map_err(db_err)?).unwrap_or_default();
    let metadata = serde_json::from_str(&row.get::<String>(8).map_err(db_err)?).unwrap_or_default();
    Ok(Chunk {
        id: row.get(0).map_err(db_err)?,
        document_id: row.get(1).map_err(db_err)?,
        workspace_id: row.get(2).map_err(db_err)?,
        chunk_index: row.get::<i64>(3).map_err(db_err)? as u32,
        content: row.get(4).map_err(db_err)?,
        page_numbers,
        char_count: row.get::<i64>(6).map_err(db_err)? as u32,
        word_count: row.get::<i64>(7).map_err(db_err)? as u32,
        created_at: parse_rfc3339(&row.get::<String>(9).map_err(db_err)?)?,
        metadata,
    })
}

fn row_job(row: &Row) -> Result<Job> {
    Ok(Job {
        id: row.get(0).map_err(db_err)?,
        job_type: serde_json::from_str(&format!("\"{}\"", row.get::<String>(1).map_err(db_err)?)).map_err(|e| AppError::Internal(e.to_string()))?,
        status: serde_json::from_str(&format!("\"{}\"", row.get::<String>(2).map_err(db_err)?)).map_err(|e| AppError::Internal(e.to_string()))?,
        priority: serde_json::from_str(&format!("\"{}\"", row.get::<String>(3).map_err(db_err)?)).map_err(|e| AppError::Internal(e.to_string()))?,
        workspace_id: row.get(4).map_err(db_err)?,
        payload: serde_json::from_str(&row.get::<String>(5).map_err(db_err)?).unwrap_or(serde_json::json!({})),
        progress_percent: row.get::<f64>(6).map_err(db_err)? as f32,
        current_step: row.get(7).map_err(db_err)?,
        total_steps: row.get::<i64>(8).map_err(db_err)? as u32,
        created_at: parse_rfc3339(&row.get::<String>(9).map_err(db_err)?)?,
        started_at: row.get::<Option<String>>(10).map_err(db_err)?.map(|s| parse_rfc3339(&s)).transpose()?,
        completed_at: row.get::<Option<String>>(11).map_err(db_err)?.map(|s| parse_rfc3339(&s)).transpose()?,
        error: row.get(12).map_err(db_err)?,
        retry_count: row.get::<i64>(13).map_err(db_err)? as u32,
        max_retries: row.get::<i64>(14).map_err(db_err)? as u32,
        last_heartbeat: row.get::<Option<String>>(15).map_err(db_err)?.map(|s| parse_rfc3339(&s)).transpose()?,
    })
}

fn status_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processing => "processing",
        DocumentStatus::Completed => "completed",
        DocumentStatus::Failed => "failed",
        DocumentStatus::Cancelled => "cancelled",
    }
}

fn job_status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

#[async_trait]
impl MetadataStore for LibsqlStore {
    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;
        for stmt in SCHEMA_STATEMENTS {
            conn.execute(stmt, ()).await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn create_document(&self, document: &Document) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO documents (id, workspace_id, source_uri, filename, page_count, status, created_at, updated_at, total_chunks, total_images, total_products, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                document.id.as_str(),
                document.workspace_id.as_str(),
                document.source_uri.as_str(),
                document.filename.as_str(),
                document.page_count as i64,
                status_str(document.status),
                document.created_at.to_rfc3339(),
                document.updated_at.to_rfc3339(),
                document.total_chunks as i64,
                document.total_images as i64,
                document.total_products as i64,
                document.error.clone(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_document(&self, workspace_id: &str, document_id: &str) -> Result<Document> {
        self.query_one(
            "SELECT id, workspace_id, source_uri, filename, page_count, status, created_at, updated_at, total_chunks, total_images, total_products, error
             FROM documents WHERE workspace_id = ? AND id = ?",
            (workspace_id, document_id),
            row_document,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {document_id} not found in workspace {workspace_id}")))
    }

    async fn update_document_status(&self, workspace_id: &str, document_id: &str, status: DocumentStatus, error: Option<&str>) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE workspace_id = ? AND id = ?",
            (status_str(status), error, Utc::now().to_rfc3339(), workspace_id, document_id),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_document_counts(&self, workspace_id: &str, document_id: &str, page_count: u32, total_chunks: u32, total_images: u32) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE documents SET page_count = ?, total_chunks = ?, total_images = ?, updated_at = ? WHERE workspace_id = ? AND id = ?",
            (page_count as i64, total_chunks as i64, total_images as i64, Utc::now().to_rfc3339(), workspace_id, document_id),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_documents(&self, workspace_id: &str, page: u32, page_size: u32) -> Result<Page<Document>> {
        let offset = (page.saturating_sub(1)) as i64 * page_size as i64;
        let items = self
            .query_many(
                "SELECT id, workspace_id, source_uri, filename, page_count, status, created_at, updated_at, total_chunks, total_images, total_products, error
                 FROM documents WHERE workspace_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                (workspace_id, page_size as i64, offset),
                row_document,
            )
            .await?;
        let total = self
            .query_one("SELECT COUNT(*) FROM documents WHERE workspace_id = ?", [workspace_id], |row| {
                Ok(row.get::<i64>(0).map_err(db_err)? as u64)
            })
            .await?
            .unwrap_or(0);
        Ok(Page { items, total, page, page_size })
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let conn = self.connection()?;
        for chunk in chunks {
            conn.execute(
                "INSERT INTO chunks (id, document_id, workspace_id, chunk_index, content, page_numbers, char_count, word_count, created_at, metadata)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    chunk.id.as_str(),
                    chunk.document_id.as_str(),
                    chunk.workspace_id.as_str(),
                    chunk.chunk_index as i64,
                    chunk.content.as_str(),
                    serde_json::to_string(&chunk.page_numbers).unwrap_or_default(),
                    chunk.char_count as i64,
                    chunk.word_count as i64,
                    chunk.created_at.to_rfc3339(),
                    serde_json::to_string(&chunk.metadata).unwrap_or_default(),
                ),
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Chunk> {
        self.query_one(
            "SELECT id, document_id, workspace_id, chunk_index, content, page_numbers, char_count, word_count, created_at, metadata
             FROM chunks WHERE workspace_id = ? AND id = ?",
            (workspace_id, chunk_id),
            row_chunk,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("chunk {chunk_id} not found")))
    }

    async fn list_chunks_for_document(&self, workspace_id: &str, document_id: &str) -> Result<Vec<Chunk>> {
        self.query_many(
            "SELECT id, document_id, workspace_id, chunk_index, content, page_numbers, char_count, word_count, created_at, metadata
             FROM chunks WHERE workspace_id = ? AND document_id = ? ORDER BY chunk_index ASC",
            (workspace_id, document_id),
            row_chunk,
        )
        .await
    }

    async fn count_chunks_for_document(&self, workspace_id: &str, document_id: &str) -> Result<u32> {
        Ok(self
            .query_one(
                "SELECT COUNT(*) FROM chunks WHERE workspace_id = ? AND document_id = ?",
                (workspace_id, document_id),
                |row| Ok(row.get::<i64>(0).map_err(db_err)? as u32),
            )
            .await?
            .unwrap_or(0))
    }

    async fn insert_images(&self, images: &[Image]) -> Result<()> {
        let conn = self.connection()?;
        for image in images {
            let bbox = image.metadata.bbox;
            conn.execute(
                "INSERT INTO images (id, document_id, workspace_id, page_number, storage_uri, public_uri, format, width, height, size_bytes, content_hash, detection_confidence, bbox_x, bbox_y, bbox_width, bbox_height, caption)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    image.id.as_str(),
                    image.document_id.as_str(),
                    image.workspace_id.as_str(),
                    image.page_number as i64,
                    image.storage_uri.as_str(),
                    image.public_uri.as_str(),
                    image.format.as_str(),
                    image.width as i64,
                    image.height as i64,
                    image.size_bytes as i64,
                    image.metadata.content_hash.as_str(),
                    image.metadata.detection_confidence.map(|v| v as f64),
                    bbox.map(|b| b.x as f64),
                    bbox.map(|b| b.y as f64),
                    bbox.map(|b| b.width as f64),
                    bbox.map(|b| b.height as f64),
                    image.metadata.caption.clone(),
                ),
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_image(&self, workspace_id: &str, image_id: &str) -> Result<Image> {
        self.query_one(
            "SELECT id, document_id, workspace_id, page_number, storage_uri, public_uri, format, width, height, size_bytes, content_hash, detection_confidence, bbox_x, bbox_y, bbox_width, bbox_height, caption
             FROM images WHERE workspace_id = ? AND id = ?",
            (workspace_id, image_id),
            row_image,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image {image_id} not found")))
    }

    async fn list_images_for_document(&self, workspace_id: &str, document_id: &str) -> Result<Vec<Image>> {
        self.query_many(
            "SELECT id, document_id, workspace_id, page_number, storage_uri, public_uri, format, width, height, size_bytes, content_hash, detection_confidence, bbox_x, bbox_y, bbox_width, bbox_height, caption
             FROM images WHERE workspace_id = ? AND document_id = ? ORDER BY page_number ASC",
            (workspace_id, document_id),
            row_image,
        )
        .await
    }

    async fn find_image_by_content_hash(&self, workspace_id: &str, content_hash: &str) -> Result<Option<Image>> {
        self.query_one(
            "SELECT id, document_id, workspace_id, page_number, storage_uri, public_uri, format, width, height, size_bytes, content_hash, detection_confidence, bbox_x, bbox_y, bbox_width, bbox_height, caption
             FROM images WHERE workspace_id = ? AND content_hash = ? LIMIT 1",
            (workspace_id, content_hash),
            row_image,
        )
        .await
    }

    async fn upsert_embedding(&self, embedding: &Embedding) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO embeddings (id, entity_id, entity_type, workspace_id, model, dimensions, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(entity_id, entity_type, model) DO UPDATE SET dimensions = excluded.dimensions, created_at = excluded.created_at",
            (
                embedding.id.as_str(),
                embedding.entity_id.as_str(),
                embedding.entity_type.as_str(),
                embedding.workspace_id.as_str(),
                embedding.model.as_str(),
                embedding.dimensions as i64,
                embedding.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_embedding(&self, workspace_id: &str, entity_id: &str, entity_type: EntityType, model: &str) -> Result<Option<Embedding>> {
        self.query_one(
            "SELECT id, entity_id, entity_type, workspace_id, model, dimensions, created_at
             FROM embeddings WHERE workspace_id = ? AND entity_id = ? AND entity_type = ? AND model = ?",
            (workspace_id, entity_id, entity_type.as_str(), model),
            |row| {
                Ok(Embedding {
                    id: row.get(0).map_err(db_err)?,
                    entity_id: row.get(1).map_err(db_err)?,
                    entity_type,
                    workspace_id: row.get(3).map_err(db_err)?,
                    model: row.get(4).map_err(db_err)?,
                    dimensions: row.get::<i64>(5).map_err(db_err)? as u32,
                    vector: Vec::new(),
                    created_at: parse_rfc3339(&row.get::<String>(6).map_err(db_err)?)?,
                })
            },
        )
        .await
    }

    async fn create_product(&self, product: &Product) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO products (id, workspace_id, source_document_id, name, canonical_name, short_description, long_description, category_id, properties, specifications, metadata, status, created_from_type, created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                product.id.as_str(),
                product.workspace_id.as_str(),
                product.source_document_id.clone(),
                product.name.as_str(),
                canonicalize_name(&product.name),
                product.short_description.as_str(),
                product.long_description.as_str(),
                product.category_id.clone(),
                serde_json::to_string(&product.properties).unwrap_or_default(),
                serde_json::to_string(&product.specifications).unwrap_or_default(),
                serde_json::to_string(&product.metadata).unwrap_or_default(),
                product_status_str(product.status),
                product_source_str(product.created_from_type),
                product.created_by.clone(),
                product.created_at.to_rfc3339(),
                product.updated_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE products SET name = ?, canonical_name = ?, short_description = ?, long_description = ?, category_id = ?, properties = ?, specifications = ?, metadata = ?, status = ?, updated_at = ?
             WHERE workspace_id = ? AND id = ?",
            (
                product.name.as_str(),
                canonicalize_name(&product.name),
                product.short_description.as_str(),
                product.long_description.as_str(),
                product.category_id.clone(),
                serde_json::to_string(&product.properties).unwrap_or_default(),
                serde_json::to_string(&product.specifications).unwrap_or_default(),
                serde_json::to_string(&product.metadata).unwrap_or_default(),
                product_status_str(product.status),
                Utc::now().to_rfc3339(),
                product.workspace_id.as_str(),
                product.id.as_str(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_product(&self, workspace_id: &str, product_id: &str) -> Result<Product> {
        self.query_one(
            "SELECT id, workspace_id, source_document_id, name, short_description, long_description, category_id, properties, specifications, metadata, status, created_from_type, created_by, created_at, updated_at
             FROM products WHERE workspace_id = ? AND id = ?",
            (workspace_id, product_id),
            row_product,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product {product_id} not found")))
    }

    async fn find_product_by_canonical_name(&self, workspace_id: &str, canonical_name: &str) -> Result<Option<Product>> {
        self.query_one(
            "SELECT id, workspace_id, source_document_id, name, short_description, long_description, category_id, properties, specifications, metadata, status, created_from_type, created_by, created_at, updated_at
             FROM products WHERE workspace_id = ? AND canonical_name = ? LIMIT 1",
            (workspace_id, canonical_name),
            row_product,
        )
        .await
    }

    async fn list_products(&self, workspace_id: &str, page: u32, page_size: u32) -> Result<Page<Product>> {
        let offset = (page.saturating_sub(1)) as i64 * page_size as i64;
        let items = self
            .query_many(
                "SELECT id, workspace_id, source_document_id, name, short_description, long_description, category_id, properties, specifications, metadata, status, created_from_type, created_by, created_at, updated_at
                 FROM products WHERE workspace_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                (workspace_id, page_size as i64, offset),
                row_product,
            )
            .await?;
        let total = self
            .query_one("SELECT COUNT(*) FROM products WHERE workspace_id = ?", [workspace_id], |row| {
                Ok(row.get::<i64>(0).map_err(db_err)? as u64)
            })
            .await?
            .unwrap_or(0);
        Ok(Page { items, total, page, page_size })
    }

    async fn insert_classification(&self, classification: &ChunkClassification) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_classifications (id, chunk_id, workspace_id, content_type, confidence, reasoning, model, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                classification.id.as_str(),
                classification.chunk_id.as_str(),
                classification.workspace_id.as_str(),
                classification.content_type.as_str(),
                classification.confidence as f64,
                classification.reasoning.as_str(),
                classification.model.as_str(),
                classification.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_classification_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkClassification>> {
        self.query_one(
            "SELECT id, chunk_id, workspace_id, content_type, confidence, reasoning, model, created_at
             FROM chunk_classifications WHERE workspace_id = ? AND chunk_id = ? ORDER BY created_at DESC LIMIT 1",
            (workspace_id, chunk_id),
            |row| {
                Ok(ChunkClassification {
                    id: row.get(0).map_err(db_err)?,
                    chunk_id: row.get(1).map_err(db_err)?,
                    workspace_id: row.get(2).map_err(db_err)?,
                    content_type: row.get::<String>(3).map_err(db_err)?.parse().unwrap_or(ContentType::Other),
                    confidence: row.get::<f64>(4).map_err(db_err)? as f32,
                    reasoning: row.get(5).map_err(db_err)?,
                    model: row.get(6).map_err(db_err)?,
                    created_at: parse_rfc3339(&row.get::<String>(7).map_err(db_err)?)?,
                })
            },
        )
        .await
    }

    async fn insert_boundary(&self, boundary: &ChunkBoundary) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_boundaries (id, chunk_id, next_chunk_id, workspace_id, boundary_type, boundary_score, is_product_boundary, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                boundary.id.as_str(),
                boundary.chunk_id.as_str(),
                boundary.next_chunk_id.as_str(),
                boundary.workspace_id.as_str(),
                format!("{:?}", boundary.boundary_type),
                boundary.boundary_score as f64,
                boundary.is_product_boundary as i64,
                boundary.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_boundary_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkBoundary>> {
        self.query_one(
            "SELECT id, chunk_id, next_chunk_id, workspace_id, boundary_type, boundary_score, is_product_boundary, created_at
             FROM chunk_boundaries WHERE workspace_id = ? AND chunk_id = ? ORDER BY created_at DESC LIMIT 1",
            (workspace_id, chunk_id),
            |row| {
                let boundary_type_raw: String = row.get(4).map_err(db_err)?;
                Ok(ChunkBoundary {
                    id: row.get(0).map_err(db_err)?,
                    chunk_id: row.get(1).map_err(db_err)?,
                    next_chunk_id: row.get(2).map_err(db_err)?,
                    workspace_id: row.get(3).map_err(db_err)?,
                    boundary_type: parse_boundary_type(&boundary_type_raw),
                    boundary_score: row.get::<f64>(5).map_err(db_err)? as f32,
                    is_product_boundary: row.get::<i64>(6).map_err(db_err)? != 0,
                    created_at: parse_rfc3339(&row.get::<String>(7).map_err(db_err)?)?,
                })
            },
        )
        .await
    }

    async fn insert_validation(&self, validation: &ChunkValidation) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_validations (id, chunk_id, workspace_id, overall_score, status, content_quality, boundary_quality, semantic_coherence, completeness, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                validation.id.as_str(),
                validation.chunk_id.as_str(),
                validation.workspace_id.as_str(),
                validation.overall_score as f64,
                format!("{:?}", validation.status),
                validation.content_quality as f64,
                validation.boundary_quality as f64,
                validation.semantic_coherence as f64,
                validation.completeness as f64,
                validation.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_validation_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Option<ChunkValidation>> {
        self.query_one(
            "SELECT id, chunk_id, workspace_id, overall_score, status, content_quality, boundary_quality, semantic_coherence, completeness, created_at
             FROM chunk_validations WHERE workspace_id = ? AND chunk_id = ? ORDER BY created_at DESC LIMIT 1",
            (workspace_id, chunk_id),
            |row| {
                let status_raw: String = row.get(4).map_err(db_err)?;
                Ok(ChunkValidation {
                    id: row.get(0).map_err(db_err)?,
                    chunk_id: row.get(1).map_err(db_err)?,
                    workspace_id: row.get(2).map_err(db_err)?,
                    overall_score: row.get::<f64>(3).map_err(db_err)? as f32,
                    status: parse_validation_status(&status_raw),
                    content_quality: row.get::<f64>(5).map_err(db_err)? as f32,
                    boundary_quality: row.get::<f64>(6).map_err(db_err)? as f32,
                    semantic_coherence: row.get::<f64>(7).map_err(db_err)? as f32,
                    completeness: row.get::<f64>(8).map_err(db_err)? as f32,
                    created_at: parse_rfc3339(&row.get::<String>(9).map_err(db_err)?)?,
                })
            },
        )
        .await
    }

    async fn insert_chunk_product_relationship(&self, rel: &ChunkProductRelationship) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_product_relationships (id, chunk_id, product_id, workspace_id, relationship_type, relevance_score) VALUES (?, ?, ?, ?, ?, ?)",
            (rel.id.as_str(), rel.chunk_id.as_str(), rel.product_id.as_str(), rel.workspace_id.as_str(), format!("{:?}", rel.relationship_type), rel.relevance_score as f64),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_product_image_relationship(&self, rel: &ProductImageRelationship) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO product_image_relationships (id, product_id, image_id, workspace_id, relationship_type, relevance_score) VALUES (?, ?, ?, ?, ?, ?)",
            (rel.id.as_str(), rel.product_id.as_str(), rel.image_id.as_str(), rel.workspace_id.as_str(), format!("{:?}", rel.relationship_type), rel.relevance_score as f64),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_chunk_image_relationship(&self, rel: &ChunkImageRelationship) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_image_relationships (id, chunk_id, image_id, workspace_id, relationship_type, relevance_score) VALUES (?, ?, ?, ?, ?, ?)",
            (rel.id.as_str(), rel.chunk_id.as_str(), rel.image_id.as_str(), rel.workspace_id.as_str(), format!("{:?}", rel.relationship_type), rel.relevance_score as f64),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_products_for_chunk(&self, workspace_id: &str, chunk_id: &str) -> Result<Vec<ChunkProductRelationship>> {
        self.query_many(
            "SELECT id, chunk_id, product_id, workspace_id, relationship_type, relevance_score FROM chunk_product_relationships WHERE workspace_id = ? AND chunk_id = ?",
            (workspace_id, chunk_id),
            |row| {
                Ok(ChunkProductRelationship {
                    id: row.get(0).map_err(db_err)?,
                    chunk_id: row.get(1).map_err(db_err)?,
                    product_id: row.get(2).map_err(db_err)?,
                    workspace_id: row.get(3).map_err(db_err)?,
                    relationship_type: parse_chunk_product_relation(&row.get::<String>(4).map_err(db_err)?),
                    relevance_score: row.get::<f64>(5).map_err(db_err)? as f32,
                })
            },
        )
        .await
    }

    async fn list_images_for_product(&self, workspace_id: &str, product_id: &str) -> Result<Vec<ProductImageRelationship>> {
        self.query_many(
            "SELECT id, product_id, image_id, workspace_id, relationship_type, relevance_score FROM product_image_relationships WHERE workspace_id = ? AND product_id = ?",
            (workspace_id, product_id),
            |row| {
                Ok(ProductImageRelationship {
                    id: row.get(0).map_err(db_err)?,
                    product_id: row.get(1).map_err(db_err)?,
                    image_id: row.get(2).map_err(db_err)?,
                    workspace_id: row.get(3).map_err(db_err)?,
                    relationship_type: parse_product_image_relation(&row.get::<String>(4).map_err(db_err)?),
                    relevance_score: row.get::<f64>(5).map_err(db_err)? as f32,
                })
            },
        )
        .await
    }

    async fn insert_chunk_quality(&self, metrics: &ChunkQualityMetrics) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO chunk_quality_metrics (id, chunk_id, workspace_id, semantic_completeness, boundary_quality, context_preservation, structural_integrity, metadata_richness, overall, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                metrics.id.as_str(), metrics.chunk_id.as_str(), metrics.workspace_id.as_str(),
                metrics.semantic_completeness as f64, metrics.boundary_quality as f64, metrics.context_preservation as f64,
                metrics.structural_integrity as f64, metrics.metadata_richness as f64, metrics.overall as f64,
                metrics.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_embedding_stability(&self, metrics: &EmbeddingStabilityMetrics) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO embedding_stability_metrics (id, chunk_id, workspace_id, stability, variance, consistency, anomaly_flag, batch_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                metrics.id.as_str(), metrics.chunk_id.as_str(), metrics.workspace_id.as_str(),
                metrics.stability as f64, metrics.variance as f64, metrics.consistency as f64,
                metrics.anomaly_flag as i64, metrics.batch_id.as_str(), metrics.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_retrieval_quality(&self, metrics: &RetrievalQualityMetrics) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO retrieval_quality_metrics (id, query_id, workspace_id, precision, recall, mrr, latency_ms, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                metrics.id.as_str(), metrics.query_id.as_str(), metrics.workspace_id.as_str(),
                metrics.precision as f64, metrics.recall as f64, metrics.mrr as f64,
                metrics.latency_ms as i64, metrics.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_response_quality(&self, metrics: &ResponseQualityMetrics) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO response_quality_metrics (id, response_id, workspace_id, coherence, hallucination, source_attribution, factual_consistency, overall, assessment, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                metrics.id.as_str(), metrics.response_id.as_str(), metrics.workspace_id.as_str(),
                metrics.coherence as f64, metrics.hallucination as f64, metrics.source_attribution as f64,
                metrics.factual_consistency as f64, metrics.overall as f64, format!("{:?}", metrics.assessment),
                metrics.created_at.to_rfc3339(),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO jobs (id, job_type, status, priority, workspace_id, payload, progress_percent, current_step, total_steps, created_at, started_at, completed_at, error, retry_count, max_retries, last_heartbeat)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                job.id.as_str(),
                format!("{:?}", job.job_type),
                job_status_str(job.status),
                format!("{:?}", job.priority),
                job.workspace_id.as_str(),
                job.payload.to_string(),
                job.progress_percent as f64,
                job.current_step.as_str(),
                job.total_steps as i64,
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.completed_at.map(|t| t.to_rfc3339()),
                job.error.clone(),
                job.retry_count as i64,
                job.max_retries as i64,
                job.last_heartbeat.map(|t| t.to_rfc3339()),
            ),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_job(&self, workspace_id: &str, job_id: &str) -> Result<Job> {
        self.query_one(
            "SELECT id, job_type, status, priority, workspace_id, payload, progress_percent, current_step, total_steps, created_at, started_at, completed_at, error, retry_count, max_retries, last_heartbeat
             FROM jobs WHERE workspace_id = ? AND id = ?",
            (workspace_id, job_id),
            row_job,
        )
        .await?
        .ok_or_else(|| AppError::NotFound(format!("job {job_id} not found")))
    }

    async fn claim_next_job(&self, lease_seconds: u64) -> Result<Option<Job>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT id FROM jobs WHERE status = 'queued' ORDER BY priority DESC, created_at ASC LIMIT 1",
                (),
            )
            .await
            .map_err(db_err)?;
        let job_id: String = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get(0).map_err(db_err)?,
            None => return Ok(None),
        };
        let now = Utc::now();
        conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?, last_heartbeat = ? WHERE id = ? AND status = 'queued'",
            (now.to_rfc3339(), now.to_rfc3339(), job_id.as_str()),
        )
        .await
        .map_err(db_err)?;
        let _ = lease_seconds;
        self.query_one(
            "SELECT id, job_type, status, priority, workspace_id, payload, progress_percent, current_step, total_steps, created_at, started_at, completed_at, error, retry_count, max_retries, last_heartbeat
             FROM jobs WHERE id = ?",
            [job_id.as_str()],
            row_job,
        )
        .await
    }

    async fn heartbeat_job(&self, job_id: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute("UPDATE jobs SET last_heartbeat = ? WHERE id = ?", (Utc::now().to_rfc3339(), job_id)).await.map_err(db_err)?;
        Ok(())
    }

    async fn update_job_progress(&self, job_id: &str, current_step: &str, progress_percent: f32) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE jobs SET current_step = ?, progress_percent = ?, last_heartbeat = ? WHERE id = ?",
            (current_step, progress_percent as f64, Utc::now().to_rfc3339(), job_id),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn complete_job(&self, job_id: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE jobs SET status = 'completed', progress_percent = 100, completed_at = ? WHERE id = ?",
            (Utc::now().to_rfc3339(), job_id),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: &str, retry: bool) -> Result<()> {
        let conn = self.connection()?;
        if retry {
            conn.execute(
                "UPDATE jobs SET status = 'queued', error = ?, retry_count = retry_count + 1, started_at = NULL WHERE id = ?",
                (error, job_id),
            )
            .await
            .map_err(db_err)?;
        } else {
            conn.execute(
                "UPDATE jobs SET status = 'failed', error = ?, completed_at = ? WHERE id = ?",
                (error, Utc::now().to_rfc3339(), job_id),
            )
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn cancel_job(&self, workspace_id: &str, job_id: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE jobs SET status = 'cancelled', completed_at = ? WHERE workspace_id = ? AND id = ? AND status IN ('queued', 'running')",
            (Utc::now().to_rfc3339(), workspace_id, job_id),
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_jobs(&self, workspace_id: &str, status: Option<JobStatus>, page: u32, page_size: u32) -> Result<Page<Job>> {
        let offset = (page.saturating_sub(1)) as i64 * page_size as i64;
        let items = match status {
            Some(s) => {
                self.query_many(
                    "SELECT id, job_type, status, priority, workspace_id, payload, progress_percent, current_step, total_steps, created_at, started_at, completed_at, error, retry_count, max_retries, last_heartbeat
                     FROM jobs WHERE workspace_id = ? AND status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    (workspace_id, job_status_str(s), page_size as i64, offset),
                    row_job,
                )
                .await?
            }
            None => {
                self.query_many(
                    "SELECT id, job_type, status, priority, workspace_id, payload, progress_percent, current_step, total_steps, created_at, started_at, completed_at, error, retry_count, max_retries, last_heartbeat
                     FROM jobs WHERE workspace_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
                    (workspace_id, page_size as i64, offset),
                    row_job,
                )
                .await?
            }
        };
        let total = self
            .query_one("SELECT COUNT(*) FROM jobs WHERE workspace_id = ?", [workspace_id], |row| Ok(row.get::<i64>(0).map_err(db_err)? as u64))
            .await?
            .unwrap_or(0);
        Ok(Page { items, total, page, page_size })
    }

    async fn job_statistics(&self, workspace_id: &str) -> Result<JobStatistics> {
        let conn = self.connection()?;
        let mut stats = JobStatistics::default();
        let mut rows = conn
            .query("SELECT status, COUNT(*) FROM jobs WHERE workspace_id = ? GROUP BY status", [workspace_id])
            .await
            .map_err(db_err)?;
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let status: String = row.get(0).map_err(db_err)?;
            let count: i64 = row.get(1).map_err(db_err)?;
            stats.total += count as u64;
            match status.as_str() {
                "queued" => stats.queued = count as u64,
                "running" => stats.running = count as u64,
                "completed" => stats.completed = count as u64,
                "failed" => stats.failed = count as u64,
                "cancelled" => stats.cancelled = count as u64,
                _ => {}
            }
        }
        Ok(stats)
    }

    async fn reclaim_expired_leases(&self, lease_seconds: u64) -> Result<u32> {
        let conn = self.connection()?;
        let cutoff = Utc::now() - chrono::Duration::seconds(lease_seconds as i64);
        let affected = conn
            .execute(
                "UPDATE jobs SET status = 'queued', started_at = NULL WHERE status = 'running' AND (last_heartbeat IS NULL OR last_heartbeat < ?)",
                [cutoff.to_rfc3339()],
            )
            .await
            .map_err(db_err)?;
        Ok(affected as u32)
    }
}

fn row_image(row: &Row) -> Result<Image> {
    let bbox = match (
        row.get::<Option<f64>>(12).map_err(db_err)?,
        row.get::<Option<f64>>(13).map_err(db_err)?,
        row.get::<Option<f64>>(14).map_err(db_err)?,
        row.get::<Option<f64>>(15).map_err(db_err)?,
    ) {
        (Some(x), Some(y), Some(width), Some(height)) => Some(BoundingBox { x: x as f32, y: y as f32, width: width as f32, height: height as f32 }),
        _ => None,
    };
    Ok(Image {
        id: row.get(0).map_err(db_err)?,
        document_id: row.get(1).map_err(db_err)?,
        workspace_id: row.get(2).map_err(db_err)?,
        page_number: row.get::<i64>(3).map_err(db_err)? as u32,
        storage_uri: row.get(4).map_err(db_err)?,
        public_uri: row.get(5).map_err(db_err)?,
        format: row.get(6).map_err(db_err)?,
        width: row.get::<i64>(7).map_err(db_err)? as u32,
        height: row.get::<i64>(8).map_err(db_err)? as u32,
        size_bytes: row.get::<i64>(9).map_err(db_err)? as u64,
        metadata: ImageMetadata {
            detection_confidence: row.get::<Option<f64>>(11).map_err(db_err)?.map(|v| v as f32),
            bbox,
            caption: row.get(16).map_err(db_err)?,
            content_hash: row.get(10).map_err(db_err)?,
        },
    })
}

fn row_product(row: &Row) -> Result<Product> {
    Ok(Product {
        id: row.get(0).map_err(db_err)?,
        workspace_id: row.get(1).map_err(db_err)?,
        source_document_id: row.get(2).map_err(db_err)?,
        name: row.get(3).map_err(db_err)?,
        short_description: row.get(4).map_err(db_err)?,
        long_description: row.get(5).map_err(db_err)?,
        category_id: row.get(6).map_err(db_err)?,
        properties: serde_json::from_str(&row.get::<String>(7).map_err(db_err)?).unwrap_or_default(),
        specifications: serde_json::from_str(&row.get::<String>(8).map_err(db_err)?).unwrap_or_default(),
        metadata: serde_json::from_str(&row.get::<String>(9).map_err(db_err)?).unwrap_or_default(),
        status: parse_product_status(&row.get::<String>(10).map_err(db_err)?),
        created_from_type: parse_product_source(&row.get::<String>(11).map_err(db_err)?),
        created_by: row.get(12).map_err(db_err)?,
        created_at: parse_rfc3339(&row.get::<String>(13).map_err(db_err)?)?,
        updated_at: parse_rfc3339(&row.get::<String>(14).map_err(db_err)?)?,
    })
}

fn product_status_str(status: ProductStatus) -> &'static str {
    match status {
        ProductStatus::Draft => "Draft",
        ProductStatus::Published => "Published",
        ProductStatus::Archived => "Archived",
    }
}

fn parse_product_status(s: &str) -> ProductStatus {
    match s {
        "Published" => ProductStatus::Published,
        "Archived" => ProductStatus::Archived,
        _ => ProductStatus::Draft,
    }
}

fn product_source_str(source: ProductSource) -> &'static str {
    match source {
        ProductSource::Pdf => "Pdf",
        ProductSource::Manual => "Manual",
        ProductSource::Import => "Import",
    }
}

fn parse_product_source(s: &str) -> ProductSource {
    match s {
        "Manual" => ProductSource::Manual,
        "Import" => ProductSource::Import,
        _ => ProductSource::Pdf,
    }
}

fn parse_boundary_type(s: &str) -> BoundaryType {
    match s {
        "Paragraph" => BoundaryType::Paragraph,
        "Section" => BoundaryType::Section,
        "Semantic" => BoundaryType::Semantic,
        "Weak" => BoundaryType::Weak,
        _ => BoundaryType::Sentence,
    }
}

fn parse_validation_status(s: &str) -> ValidationStatus {
    match s {
        "Validated" => ValidationStatus::Validated,
        "NeedsReview" => ValidationStatus::NeedsReview,
        "Rejected" => ValidationStatus::Rejected,
        _ => ValidationStatus::Pending,
    }
}

fn parse_chunk_product_relation(s: &str) -> ChunkProductRelationType {
    match s {
        "Related" => ChunkProductRelationType::Related,
        "Component" => ChunkProductRelationType::Component,
        "Alternative" => ChunkProductRelationType::Alternative,
        _ => ChunkProductRelationType::Source,
    }
}

fn parse_product_image_relation(s: &str) -> ProductImageRelationType {
    match s {
        "Illustrates" => ProductImageRelationType::Illustrates,
        "Variant" => ProductImageRelationType::Variant,
        "Related" => ProductImageRelationType::Related,
        _ => ProductImageRelationType::Depicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> LibsqlStore {
        LibsqlStore::open_local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_and_get_document_round_trips() {
        let store = store().await;
        let doc = Document::new("ws1", "s3://bucket/a.pdf", "a.pdf");
        store.create_document(&doc).await.unwrap();
        let fetched = store.get_document("ws1", &doc.id).await.unwrap();
        assert_eq!(fetched.filename, "a.pdf");
        assert_eq!(fetched.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn get_document_wrong_workspace_is_not_found() {
        let store = store().await;
        let doc = Document::new("ws1", "uri", "a.pdf");
        store.create_document(&doc).await.unwrap();
        let err = store.get_document("ws2", &doc.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn chunk_index_is_preserved_in_order() {
        let store = store().await;
        let doc = Document::new("ws1", "uri", "a.pdf");
        store.create_document(&doc).await.unwrap();
        let chunks = vec![
            Chunk::new(&doc.id, "ws1", 1, "second".into(), vec![1]),
            Chunk::new(&doc.id, "ws1", 0, "first".into(), vec![1]),
        ];
        store.insert_chunks(&chunks).await.unwrap();
        let listed = store.list_chunks_for_document("ws1", &doc.id).await.unwrap();
        assert_eq!(listed[0].content, "first");
        assert_eq!(listed[1].content, "second");
    }

    #[tokio::test]
    async fn job_lifecycle_claim_complete() {
        let store = store().await;
        let job = Job::new(JobType::IngestPdf, "ws1", serde_json::json!({"k": "v"}), JobPriority::Normal, 3);
        store.create_job(&job).await.unwrap();

        let claimed = store.claim_next_job(300).await.unwrap().expect("job should be claimable");
        assert_eq!(claimed.id, job.id);
        assert_eq!(claimed.status, JobStatus::Running);

        assert!(store.claim_next_job(300).await.unwrap().is_none());

        store.complete_job(&job.id).await.unwrap();
        let fetched = store.get_job("ws1", &job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn failed_job_with_retry_requeues() {
        let store = store().await;
        let job = Job::new(JobType::IngestPdf, "ws1", serde_json::json!({}), JobPriority::Normal, 3);
        store.create_job(&job).await.unwrap();
        store.claim_next_job(300).await.unwrap();
        store.fail_job(&job.id, "boom", true).await.unwrap();
        let fetched = store.get_job("ws1", &job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.retry_count, 1);
    }

    #[tokio::test]
    async fn product_lookup_by_canonical_name() {
        let store = store().await;
        let now = Utc::now();
        let product = Product {
            id: "p1".into(),
            workspace_id: "ws1".into(),
            source_document_id: None,
            name: "  Nova   Sofa ".into(),
            short_description: String::new(),
            long_description: String::new(),
            category_id: None,
            properties: Default::default(),
            specifications: Default::default(),
            metadata: Default::default(),
            status: ProductStatus::Draft,
            created_from_type: ProductSource::Manual,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        store.create_product(&product).await.unwrap();
        let found = store.find_product_by_canonical_name("ws1", "nova sofa").await.unwrap();
        assert!(found.is_some());
    }
}
