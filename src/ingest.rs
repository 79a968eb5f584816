//! Document ingestion pipeline.
//!
//! One document flows through: content hashing → idempotency check →
//! chunking → embedding → transactional write of the document row, its
//! chunks (with vectors and FTS entries), and its entity mentions.
//!
//! Idempotency is keyed on `(project, content hash)`:
//! - identical content seen again is **skipped** (counters bumped),
//! - the same source path with new content is **updated** (chunk and entity
//!   sets rebuilt),
//! - anything else is **created**.
//!
//! Directory ingestion walks for supported text files and isolates
//! per-document failures: one bad file is reported and the batch continues.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::{ChunkingConfig, Config};
use crate::embedding::{self, Embedder};
use crate::entities::extract_entities;
use crate::error::DocgraphError;
use crate::models::{DocumentReport, IngestOutcome, IngestStatus};

/// File extensions picked up by directory ingestion.
const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt"];

/// A document ready to ingest, before hashing and chunking.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Stable identifier within the project, e.g. a relative file path.
    pub source: String,
    /// Full location, e.g. an absolute path.
    pub uri: Option<String>,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

impl DocumentInput {
    /// Read a text file into an input: title from the first `# ` heading or
    /// the file stem, plus basic file metadata. Invalid UTF-8 is replaced,
    /// not rejected.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let body = String::from_utf8_lossy(&raw).into_owned();

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let title = title_from_body(&body).unwrap_or(stem);

        let size_bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let metadata = serde_json::json!({
            "file_name": path.file_name().map(|s| s.to_string_lossy().to_string()),
            "extension": path.extension().map(|s| s.to_string_lossy().to_string()),
            "size_bytes": size_bytes,
        });

        Ok(Self {
            source: path.display().to_string(),
            uri: std::fs::canonicalize(path)
                .ok()
                .map(|p| p.display().to_string()),
            title,
            body,
            metadata,
        })
    }
}

/// First `# ` heading line, if any.
fn title_from_body(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with("# "))
        .map(|line| line.trim_start_matches("# ").trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Check (or record) the corpus embedding dimensionality.
///
/// A corpus embedded with one dimensionality must not be extended with
/// another; mixed vectors would make every cosine comparison silently zero.
pub async fn ensure_embedding_dims(pool: &SqlitePool, dims: usize, model: &str) -> Result<()> {
    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_dims'")
        .fetch_optional(pool)
        .await?;

    match stored {
        Some(value) => {
            let stored_dims: usize = value.parse().unwrap_or(0);
            if stored_dims != dims {
                return Err(anyhow::Error::new(DocgraphError::Config(format!(
                    "corpus was embedded with {} dimensions but the configured model produces {}",
                    stored_dims, dims
                ))));
            }
        }
        None => {
            sqlx::query("INSERT INTO meta (key, value) VALUES ('embedding_dims', ?)")
                .bind(dims.to_string())
                .execute(pool)
                .await?;
            sqlx::query(
                "INSERT INTO meta (key, value) VALUES ('embedding_model', ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(model)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

/// Ingest a single document.
pub async fn ingest_document(
    pool: &SqlitePool,
    embedder: &Embedder,
    chunking: &ChunkingConfig,
    project: Option<&str>,
    input: &DocumentInput,
) -> Result<IngestOutcome> {
    if input.body.trim().is_empty() {
        return Err(anyhow::Error::new(DocgraphError::Document(format!(
            "{}: document has no text content",
            input.source
        ))));
    }

    let content_hash = sha256_hex(&input.body);
    let now = chrono::Utc::now().timestamp();

    // Identical content already ingested: bump counters and stop.
    let existing_by_hash = sqlx::query(
        "SELECT id, title FROM documents
         WHERE COALESCE(project_id, '') = COALESCE(?, '') AND content_hash = ?",
    )
    .bind(project)
    .bind(&content_hash)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = existing_by_hash {
        let document_id: String = row.get("id");
        let title: String = row.get("title");

        sqlx::query(
            "UPDATE documents SET ingestion_count = ingestion_count + 1, last_ingested = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(&document_id)
        .execute(pool)
        .await?;

        let chunk_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                .bind(&document_id)
                .fetch_one(pool)
                .await?;
        let entity_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE document_id = ?")
                .bind(&document_id)
                .fetch_one(pool)
                .await?;

        return Ok(IngestOutcome {
            document_id,
            title,
            status: IngestStatus::Skipped,
            chunk_count: chunk_count as usize,
            entity_count: entity_count as usize,
        });
    }

    // Same source, new content: rebuild in place.
    let existing_by_source: Option<String> = sqlx::query_scalar(
        "SELECT id FROM documents
         WHERE COALESCE(project_id, '') = COALESCE(?, '') AND source = ?",
    )
    .bind(project)
    .bind(&input.source)
    .fetch_optional(pool)
    .await?;

    let (document_id, status) = match existing_by_source {
        Some(id) => (id, IngestStatus::Updated),
        None => (Uuid::new_v4().to_string(), IngestStatus::Created),
    };

    // Chunk and embed before opening the transaction; the embedding call is
    // the slow part and must not hold a write lock.
    let chunks = chunk_text(
        &document_id,
        &input.body,
        chunking.max_tokens,
        chunking.overlap_tokens,
    );
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embedder.embed_texts(&texts).await?;
    let mentions = extract_entities(&input.body);

    let metadata_json = input.metadata.to_string();

    let mut tx = pool.begin().await?;

    match status {
        IngestStatus::Updated => {
            sqlx::query(
                "UPDATE documents
                 SET title = ?, uri = ?, body = ?, content_hash = ?, metadata_json = ?,
                     last_ingested = ?, ingestion_count = ingestion_count + 1
                 WHERE id = ?",
            )
            .bind(&input.title)
            .bind(&input.uri)
            .bind(&input.body)
            .bind(&content_hash)
            .bind(&metadata_json)
            .bind(now)
            .bind(&document_id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
                .bind(&document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunks WHERE document_id = ?")
                .bind(&document_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM entities WHERE document_id = ?")
                .bind(&document_id)
                .execute(&mut *tx)
                .await?;
        }
        IngestStatus::Created => {
            let inserted = sqlx::query(
                "INSERT INTO documents
                 (id, project_id, source, uri, title, body, content_hash, metadata_json,
                  created_at, last_ingested, ingestion_count)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
            )
            .bind(&document_id)
            .bind(project)
            .bind(&input.source)
            .bind(&input.uri)
            .bind(&input.title)
            .bind(&input.body)
            .bind(&content_hash)
            .bind(&metadata_json)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(e) = inserted {
                if is_unique_violation(&e) {
                    return Err(anyhow::Error::new(DocgraphError::Conflict(format!(
                        "{}: a concurrent ingest already wrote this content",
                        input.source
                    ))));
                }
                return Err(e.into());
            }
        }
        IngestStatus::Skipped => unreachable!("skip is handled before chunking"),
    }

    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, token_count, hash, embedding)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(chunk.token_count)
        .bind(&chunk.hash)
        .bind(embedding::vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    for mention in &mentions {
        sqlx::query(
            "INSERT INTO entities
             (id, document_id, entity_type, entity_name, mention_text, method, metadata_json)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&document_id)
        .bind(mention.entity_type.as_str())
        .bind(&mention.name)
        .bind(&mention.mention_text)
        .bind(mention.method.as_str())
        .bind(mention.metadata.to_string())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(IngestOutcome {
        document_id,
        title: input.title.clone(),
        status,
        chunk_count: chunks.len(),
        entity_count: mentions.len(),
    })
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ingest a file or a directory tree.
///
/// Directories are walked for supported text files (sorted for determinism,
/// optionally truncated to `limit`). Each file is ingested independently; a
/// failure is recorded in that file's [`DocumentReport`] and the batch
/// continues.
pub async fn ingest_path(
    pool: &SqlitePool,
    embedder: &Embedder,
    chunking: &ChunkingConfig,
    path: &Path,
    project: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<DocumentReport>> {
    ensure_embedding_dims(pool, embedder.dims(), &embedder.model_name()).await?;

    let mut files: Vec<std::path::PathBuf> = if path.is_dir() {
        let mut found: Vec<_> = WalkDir::new(path)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        found.sort();
        found
    } else {
        vec![path.to_path_buf()]
    };

    if let Some(lim) = limit {
        files.truncate(lim);
    }

    let mut reports = Vec::with_capacity(files.len());

    for file in &files {
        let source = file.display().to_string();
        let result = match DocumentInput::from_file(file) {
            Ok(input) => ingest_document(pool, embedder, chunking, project, &input).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    source = %source,
                    status = outcome.status.as_str(),
                    chunks = outcome.chunk_count,
                    entities = outcome.entity_count,
                    "ingested document"
                );
                reports.push(DocumentReport {
                    source,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "document failed; continuing");
                reports.push(DocumentReport {
                    source,
                    outcome: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    Ok(reports)
}

/// CLI entry point for `dgx ingest`.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    project: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;

    let client = embedding::create_client(&config.embedding)?;
    let embedder = Embedder::new(client, &config.embedding);

    let reports = ingest_path(
        &pool,
        &embedder,
        &config.chunking,
        path,
        project,
        limit,
    )
    .await?;

    let mut created = 0usize;
    let mut updated = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    let mut chunks_written = 0usize;

    for report in &reports {
        match &report.outcome {
            Some(outcome) => {
                match outcome.status {
                    IngestStatus::Created => created += 1,
                    IngestStatus::Updated => updated += 1,
                    IngestStatus::Skipped => skipped += 1,
                }
                if outcome.status != IngestStatus::Skipped {
                    chunks_written += outcome.chunk_count;
                }
            }
            None => failed += 1,
        }
    }

    println!("ingest {}", path.display());
    println!("  files:          {}", reports.len());
    println!("  created:        {}", created);
    println!("  updated:        {}", updated);
    println!("  skipped:        {}", skipped);
    println!("  failed:         {}", failed);
    println!("  chunks written: {}", chunks_written);
    for report in &reports {
        if let Some(err) = &report.error {
            println!("  error: {}: {}", report.source, err);
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_heading() {
        assert_eq!(
            title_from_body("# Master Agreement\n\nbody text"),
            Some("Master Agreement".to_string())
        );
        assert_eq!(title_from_body("no heading here"), None);
        assert_eq!(title_from_body("## subheading only"), None);
    }

    #[test]
    fn test_sha256_hex_stable() {
        assert_eq!(sha256_hex("abc"), sha256_hex("abc"));
        assert_ne!(sha256_hex("abc"), sha256_hex("abd"));
        assert_eq!(sha256_hex("abc").len(), 64);
    }
}
