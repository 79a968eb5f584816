//! Document retrieval and deletion by ID.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;

/// Full document response: row fields plus chunks and entity mentions.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub project_id: Option<String>,
    pub source: String,
    pub uri: Option<String>,
    pub title: String,
    pub body: String,
    pub content_hash: String,
    pub metadata: serde_json::Value,
    pub created_at: String, // ISO8601
    pub last_ingested: String,
    pub ingestion_count: i64,
    pub chunks: Vec<ChunkResponse>,
    pub entities: Vec<EntityResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub text: String,
    pub token_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityResponse {
    pub entity_type: String,
    pub entity_name: String,
    pub method: String,
}

/// Fetch a document with its chunks and entities.
pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<DocumentResponse> {
    let doc_row = sqlx::query(
        "SELECT id, project_id, source, uri, title, body, content_hash, metadata_json,
                created_at, last_ingested, ingestion_count
         FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let doc_row = match doc_row {
        Some(row) => row,
        None => bail!("document not found: {}", id),
    };

    let created_at: i64 = doc_row.get("created_at");
    let last_ingested: i64 = doc_row.get("last_ingested");
    let metadata_json: String = doc_row.get("metadata_json");
    let metadata: serde_json::Value =
        serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

    let chunk_rows = sqlx::query(
        "SELECT chunk_index, text, token_count FROM chunks
         WHERE document_id = ? ORDER BY chunk_index ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let chunks: Vec<ChunkResponse> = chunk_rows
        .iter()
        .map(|row| ChunkResponse {
            index: row.get("chunk_index"),
            text: row.get("text"),
            token_count: row.get("token_count"),
        })
        .collect();

    let entity_rows = sqlx::query(
        "SELECT entity_type, entity_name, method FROM entities
         WHERE document_id = ? ORDER BY entity_type, entity_name",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let entities: Vec<EntityResponse> = entity_rows
        .iter()
        .map(|row| EntityResponse {
            entity_type: row.get("entity_type"),
            entity_name: row.get("entity_name"),
            method: row.get("method"),
        })
        .collect();

    Ok(DocumentResponse {
        id: doc_row.get("id"),
        project_id: doc_row.get("project_id"),
        source: doc_row.get("source"),
        uri: doc_row.get("uri"),
        title: doc_row.get("title"),
        body: doc_row.get("body"),
        content_hash: doc_row.get("content_hash"),
        metadata,
        created_at: format_ts_iso(created_at),
        last_ingested: format_ts_iso(last_ingested),
        ingestion_count: doc_row.get("ingestion_count"),
        chunks,
        entities,
    })
}

/// Delete a document. Chunks, entities, and relations touching it cascade
/// away with it. Returns false when the document does not exist.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;

    // The FTS table is outside the foreign-key graph, so clear it
    // explicitly before the cascading delete.
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}

/// CLI entry point for `dgx get`.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;
    let doc = get_document(&pool, id).await?;
    let related = crate::graph::find_related_documents(&pool, id).await?;
    pool.close().await;

    println!("--- Document ---");
    println!("id:              {}", doc.id);
    println!("title:           {}", doc.title);
    if let Some(ref project) = doc.project_id {
        println!("project:         {}", project);
    }
    println!("source:          {}", doc.source);
    if let Some(ref uri) = doc.uri {
        println!("uri:             {}", uri);
    }
    println!("content_hash:    {}", doc.content_hash);
    println!("created_at:      {}", doc.created_at);
    println!("last_ingested:   {}", doc.last_ingested);
    println!("ingestion_count: {}", doc.ingestion_count);
    println!("metadata:        {}", doc.metadata);
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        println!("[chunk {} | {} tokens]", chunk.index, chunk.token_count);
        println!("{}", chunk.text);
        println!();
    }

    println!("--- Entities ({}) ---", doc.entities.len());
    for entity in &doc.entities {
        println!(
            "{:<8} {} ({})",
            entity.entity_type, entity.entity_name, entity.method
        );
    }

    if !related.is_empty() {
        println!();
        println!("--- Relations ({}) ---", related.len());
        for r in &related {
            let arrow = match r.direction {
                crate::models::RelationDirection::Outgoing => "->",
                crate::models::RelationDirection::Incoming => "<-",
            };
            println!(
                "{} {} [{:.2}] {} ({})",
                arrow, r.relation_type, r.confidence, r.title, r.source
            );
        }
    }

    Ok(())
}

/// CLI entry point for `dgx delete`.
pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;
    let deleted = delete_document(&pool, id).await?;
    pool.close().await;

    if deleted {
        println!("deleted {}", id);
    } else {
        bail!("document not found: {}", id);
    }
    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
