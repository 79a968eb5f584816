//! Corpus statistics and health overview.
//!
//! A quick summary of what's indexed: document, chunk, entity, and relation
//! counts, plus per-project breakdowns. Used by `dgx stats` to give
//! confidence that ingestion and extraction are working as expected.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

/// Per-project breakdown of corpus counts.
struct ProjectStats {
    project: String,
    doc_count: i64,
    chunk_count: i64,
    entity_count: i64,
    last_ingested: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let total_entities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(&pool)
        .await?;

    let total_relations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relations")
        .fetch_one(&pool)
        .await?;

    let embedding_dims: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_dims'")
            .fetch_optional(&pool)
            .await?;
    let embedding_model: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_model'")
            .fetch_optional(&pool)
            .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docgraph — Corpus Stats");
    println!("=======================");
    println!();
    println!("  Database:   {}", config.db.path.display());
    println!("  Size:       {}", format_bytes(db_size));
    if let Some(dims) = embedding_dims {
        println!(
            "  Embeddings: {} dims ({})",
            dims,
            embedding_model.as_deref().unwrap_or("unknown model")
        );
    }
    println!();
    println!("  Documents:  {}", total_docs);
    println!("  Chunks:     {}", total_chunks);
    println!("  Entities:   {}", total_entities);
    println!("  Relations:  {}", total_relations);

    if total_relations > 0 {
        let relation_rows = sqlx::query(
            "SELECT relation_type, COUNT(*) AS n FROM relations
             GROUP BY relation_type ORDER BY n DESC",
        )
        .fetch_all(&pool)
        .await?;

        println!();
        println!("  By relation type:");
        for row in &relation_rows {
            println!(
                "  {:<16} {:>6}",
                row.get::<String, _>("relation_type"),
                row.get::<i64, _>("n")
            );
        }
    }

    // Per-project breakdown
    let project_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(d.project_id, '(none)') AS project,
            COUNT(DISTINCT d.id) AS doc_count,
            COUNT(DISTINCT c.id) AS chunk_count,
            COUNT(DISTINCT e.id) AS entity_count,
            MAX(d.last_ingested) AS last_ingested
        FROM documents d
        LEFT JOIN chunks c ON c.document_id = d.id
        LEFT JOIN entities e ON e.document_id = d.id
        GROUP BY d.project_id
        ORDER BY doc_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let project_stats: Vec<ProjectStats> = project_rows
        .iter()
        .map(|row| ProjectStats {
            project: row.get("project"),
            doc_count: row.get("doc_count"),
            chunk_count: row.get("chunk_count"),
            entity_count: row.get("entity_count"),
            last_ingested: row.get("last_ingested"),
        })
        .collect();

    if !project_stats.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}   {}",
            "PROJECT", "DOCS", "CHUNKS", "ENTITIES", "LAST INGEST"
        );
        println!("  {}", "-".repeat(76));

        for s in &project_stats {
            let ingest_display = match s.last_ingested {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>8} {:>10}   {}",
                s.project, s.doc_count, s.chunk_count, s.entity_count, ingest_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
