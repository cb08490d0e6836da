//! `CREATE TABLE IF NOT EXISTS` statements for every entity in the data model.
//! Kept separate from `client.rs` so the schema can be read (and diffed) on its own.

pub const SCHEMA_STATEMENTS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        source_uri TEXT NOT NULL,
        filename TEXT NOT NULL,
        page_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        total_chunks INTEGER NOT NULL DEFAULT 0,
        total_images INTEGER NOT NULL DEFAULT 0,
        total_products INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id)",
    r#"CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        content TEXT NOT NULL,
        page_numbers TEXT NOT NULL,
        char_count INTEGER NOT NULL,
        word_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        metadata TEXT NOT NULL,
        UNIQUE(document_id, chunk_index)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_workspace_document ON chunks(workspace_id, document_id)",
    r#"CREATE TABLE IF NOT EXISTS images (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        page_number INTEGER NOT NULL,
        storage_uri TEXT NOT NULL,
        public_uri TEXT NOT NULL,
        format TEXT NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        size_bytes INTEGER NOT NULL,
        content_hash TEXT NOT NULL,
        detection_confidence REAL,
        bbox_x REAL, bbox_y REAL, bbox_width REAL, bbox_height REAL,
        caption TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_images_workspace_document ON images(workspace_id, document_id)",
    "CREATE INDEX IF NOT EXISTS idx_images_content_hash ON images(workspace_id, content_hash)",
    r#"CREATE TABLE IF NOT EXISTS embeddings (
        id TEXT PRIMARY KEY,
        entity_id TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        model TEXT NOT NULL,
        dimensions INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(entity_id, entity_type, model)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_embeddings_workspace_entity ON embeddings(workspace_id, entity_type)",
    r#"CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        workspace_id TEXT NOT NULL,
        source_document_id TEXT,
        name TEXT NOT NULL,
        canonical_name TEXT NOT NULL,
        short_description TEXT NOT NULL,
        long_description TEXT NOT NULL,
        category_id TEXT,
        properties TEXT NOT NULL,
        specifications TEXT NOT NULL,
        metadata TEXT NOT NULL,
        status TEXT NOT NULL,
        created_from_type TEXT NOT NULL,
        created_by TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_products_workspace_canonical ON products(workspace_id, canonical_name)",
    r#"CREATE TABLE IF NOT EXISTS chunk_classifications (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        content_type TEXT NOT NULL,
        confidence REAL NOT NULL,
        reasoning TEXT NOT NULL,
        model TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_classifications_workspace_chunk ON chunk_classifications(workspace_id, chunk_id)",
    r#"CREATE TABLE IF NOT EXISTS chunk_boundaries (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        next_chunk_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        boundary_type TEXT NOT NULL,
        boundary_score REAL NOT NULL,
        is_product_boundary INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS chunk_validations (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        overall_score REAL NOT NULL,
        status TEXT NOT NULL,
        content_quality REAL NOT NULL,
        boundary_quality REAL NOT NULL,
        semantic_coherence REAL NOT NULL,
        completeness REAL NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_validations_workspace_chunk ON chunk_validations(workspace_id, chunk_id)",
    r#"CREATE TABLE IF NOT EXISTS chunk_product_relationships (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        product_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        relevance_score REAL NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_cpr_workspace_chunk ON chunk_product_relationships(workspace_id, chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_cpr_workspace_product ON chunk_product_relationships(workspace_id, product_id)",
    r#"CREATE TABLE IF NOT EXISTS product_image_relationships (
        id TEXT PRIMARY KEY,
        product_id TEXT NOT NULL,
        image_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        relevance_score REAL NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_pir_workspace_product ON product_image_relationships(workspace_id, product_id)",
    r#"CREATE TABLE IF NOT EXISTS chunk_image_relationships (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        image_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        relevance_score REAL NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_cir_workspace_chunk ON chunk_image_relationships(workspace_id, chunk_id)",
    r#"CREATE TABLE IF NOT EXISTS chunk_quality_metrics (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        semantic_completeness REAL NOT NULL,
        boundary_quality REAL NOT NULL,
        context_preservation REAL NOT NULL,
        structural_integrity REAL NOT NULL,
        metadata_richness REAL NOT NULL,
        overall REAL NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS embedding_stability_metrics (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        stability REAL NOT NULL,
        variance REAL NOT NULL,
        consistency REAL NOT NULL,
        anomaly_flag INTEGER NOT NULL,
        batch_id TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS retrieval_quality_metrics (
        id TEXT PRIMARY KEY,
        query_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        precision REAL NOT NULL,
        recall REAL NOT NULL,
        mrr REAL NOT NULL,
        latency_ms INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS response_quality_metrics (
        id TEXT PRIMARY KEY,
        response_id TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        coherence REAL NOT NULL,
        hallucination REAL NOT NULL,
        source_attribution REAL NOT NULL,
        factual_consistency REAL NOT NULL,
        overall REAL NOT NULL,
        assessment TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        job_type TEXT NOT NULL,
        status TEXT NOT NULL,
        priority TEXT NOT NULL,
        workspace_id TEXT NOT NULL,
        payload TEXT NOT NULL,
        progress_percent REAL NOT NULL DEFAULT 0,
        current_step TEXT NOT NULL,
        total_steps INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT,
        error TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        max_retries INTEGER NOT NULL DEFAULT 0,
        last_heartbeat TEXT
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_jobs_workspace_status ON jobs(workspace_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority, created_at)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_statement_is_idempotent_ddl() {
        for stmt in SCHEMA_STATEMENTS {
            assert!(stmt.contains("IF NOT EXISTS"), "statement missing IF NOT EXISTS: {stmt}");
        }
    }
}
