use anyhow::Result;
use sqlx::SqlitePool;

/// Create the full schema if it does not exist. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Documents table. project_id is nullable; the unique indexes below use
    // COALESCE so that NULL projects still collide with each other.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            source TEXT NOT NULL,
            uri TEXT,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            last_ingested INTEGER NOT NULL,
            ingestion_count INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_project_hash
         ON documents(COALESCE(project_id, ''), content_hash)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_project_source
         ON documents(COALESCE(project_id, ''), source)",
    )
    .execute(pool)
    .await?;

    // Chunks table; embedding is a little-endian f32 BLOB.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Entity mentions; one row per mention, not deduplicated.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_name TEXT NOT NULL,
            mention_text TEXT NOT NULL,
            method TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Typed document-to-document relation edges.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relations (
            id TEXT PRIMARY KEY,
            source_document_id TEXT NOT NULL,
            target_document_id TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            confidence REAL NOT NULL,
            reasoning TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(source_document_id, target_document_id, relation_type),
            CHECK(source_document_id != target_document_id),
            FOREIGN KEY (source_document_id) REFERENCES documents(id) ON DELETE CASCADE,
            FOREIGN KEY (target_document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Corpus-level key/value metadata (embedding dimensions, model name).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table over chunk text.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_document_id ON entities(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(entity_name)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_document_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// CLI entry point for `dgx init`.
pub async fn run_init(config: &crate::config::Config) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;
    run_migrations(&pool).await?;
    println!("initialized database at {}", config.db.path.display());
    pool.close().await;
    Ok(())
}
