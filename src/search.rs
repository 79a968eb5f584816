//! Hybrid search: vector and lexical candidates fused by reciprocal rank.
//!
//! The two legs run independently:
//! - **vector**: full scan of stored embeddings with cosine similarity,
//! - **lexical**: FTS5 `MATCH` over chunk text, ordered by BM25 rank.
//!
//! Each leg is truncated to `2 × limit` candidates before fusion. Fusion
//! uses reciprocal rank with the standard constant of 60: a chunk at
//! 1-based rank `r` in a leg contributes `1 / (60 + r)`. Raw scores never
//! cross legs; they only break ties and are reported for display.
//!
//! Search is best-effort: if one leg fails (for example the query embedding
//! cannot be produced), results come from the other leg alone. Only when
//! both legs fail does the search error.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::embedding::{self, blob_to_vec, cosine_similarity, Embedder};
use crate::error::DocgraphError;
use crate::models::SearchHit;

/// Reciprocal rank fusion constant. Fixed by convention, not configuration.
const RRF_K: f64 = 60.0;

/// A candidate chunk from one search leg, with that leg's raw score.
#[derive(Debug, Clone)]
pub struct LegCandidate {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub document_source: String,
    pub text: String,
    /// Cosine similarity for the vector leg; negated BM25 rank for the
    /// lexical leg. Comparable only within a leg.
    pub score: f64,
}

/// Fuse ranked candidate lists from both legs.
///
/// Input lists must already be ordered best-first; ranks are their 1-based
/// positions. Ties on the fused score are broken by vector similarity
/// (descending, chunks absent from the vector leg last), then by chunk id.
pub fn fuse_candidates(
    vector: &[LegCandidate],
    lexical: &[LegCandidate],
    limit: usize,
) -> Vec<SearchHit> {
    let vector_ranks: HashMap<&str, (usize, f64)> = vector
        .iter()
        .enumerate()
        .map(|(i, c)| (c.chunk_id.as_str(), (i + 1, c.score)))
        .collect();
    let lexical_ranks: HashMap<&str, (usize, f64)> = lexical
        .iter()
        .enumerate()
        .map(|(i, c)| (c.chunk_id.as_str(), (i + 1, c.score)))
        .collect();

    let mut hits: Vec<SearchHit> = Vec::new();
    let mut seen: HashMap<&str, ()> = HashMap::new();

    for candidate in vector.iter().chain(lexical.iter()) {
        if seen.insert(candidate.chunk_id.as_str(), ()).is_some() {
            continue;
        }

        let vector_entry = vector_ranks.get(candidate.chunk_id.as_str());
        let lexical_entry = lexical_ranks.get(candidate.chunk_id.as_str());

        let mut combined = 0.0;
        if let Some((rank, _)) = vector_entry {
            combined += 1.0 / (RRF_K + *rank as f64);
        }
        if let Some((rank, _)) = lexical_entry {
            combined += 1.0 / (RRF_K + *rank as f64);
        }

        hits.push(SearchHit {
            chunk_id: candidate.chunk_id.clone(),
            document_id: candidate.document_id.clone(),
            document_title: candidate.document_title.clone(),
            document_source: candidate.document_source.clone(),
            text: candidate.text.clone(),
            combined_score: combined,
            vector_score: vector_entry.map(|(_, s)| *s),
            lexical_score: lexical_entry.map(|(_, s)| *s),
        });
    }

    hits.sort_by(|a, b| {
        b.combined_score
            .partial_cmp(&a.combined_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let av = a.vector_score.unwrap_or(f64::NEG_INFINITY);
                let bv = b.vector_score.unwrap_or(f64::NEG_INFINITY);
                bv.partial_cmp(&av).unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    hits.truncate(limit);
    hits
}

/// Vector leg: scan all embedded chunks, rank by cosine similarity.
pub async fn fetch_vector_candidates(
    pool: &SqlitePool,
    query_vec: &[f32],
    k: usize,
    project: Option<&str>,
) -> Result<Vec<LegCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.document_id, c.text, c.embedding, d.title, d.source
        FROM chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE c.embedding IS NOT NULL
          AND (? IS NULL OR d.project_id = ?)
        "#,
    )
    .bind(project)
    .bind(project)
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<LegCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob));
            LegCandidate {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                document_source: row.get("source"),
                text: row.get("text"),
                score: similarity as f64,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(k);

    Ok(candidates)
}

/// Lexical leg: FTS5 match, best BM25 rank first.
pub async fn fetch_lexical_candidates(
    pool: &SqlitePool,
    query: &str,
    k: usize,
    project: Option<&str>,
) -> Result<Vec<LegCandidate>> {
    let match_query = match build_match_query(query) {
        Some(q) => q,
        None => return Ok(Vec::new()),
    };

    let rows = sqlx::query(
        r#"
        SELECT chunks_fts.chunk_id, chunks_fts.document_id, c.text, d.title, d.source,
               chunks_fts.rank AS rank
        FROM chunks_fts
        JOIN chunks c ON c.id = chunks_fts.chunk_id
        JOIN documents d ON d.id = chunks_fts.document_id
        WHERE chunks_fts MATCH ?
          AND (? IS NULL OR d.project_id = ?)
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(&match_query)
    .bind(project)
    .bind(project)
    .bind(k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            LegCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                document_source: row.get("source"),
                text: row.get("text"),
                // BM25 rank is more negative for better matches.
                score: -rank,
            }
        })
        .collect())
}

/// Turn free text into a safe FTS5 query: quoted terms joined with OR.
///
/// Raw user input can be FTS5 syntax errors (`"`, `-`, unbalanced quotes);
/// stripping down to alphanumeric terms keeps MATCH total.
fn build_match_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Reject a query embedder whose dimensionality disagrees with the corpus.
///
/// A mismatched query vector makes every cosine comparison zero, so the
/// vector leg would rank chunks arbitrarily instead of failing.
async fn check_embedding_dims(pool: &SqlitePool, dims: usize) -> Result<()> {
    let stored: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_dims'")
            .fetch_optional(pool)
            .await?;

    if let Some(value) = stored {
        let stored_dims: usize = value.parse().unwrap_or(0);
        if stored_dims != dims {
            return Err(anyhow::Error::new(DocgraphError::Config(format!(
                "corpus was embedded with {} dimensions but the configured model produces {}",
                stored_dims, dims
            ))));
        }
    }

    Ok(())
}

/// Run hybrid search over the corpus.
///
/// `limit == 0` returns no hits without touching either leg.
pub async fn hybrid_search(
    pool: &SqlitePool,
    embedder: &Embedder,
    query: &str,
    project: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchHit>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    check_embedding_dims(pool, embedder.dims()).await?;

    let k = limit * 2;

    let vector_leg = match embedder.embed_query(query).await {
        Ok(query_vec) => match fetch_vector_candidates(pool, &query_vec, k, project).await {
            Ok(candidates) => Ok(candidates),
            Err(e) => Err(e),
        },
        Err(e) => Err(e),
    };

    let lexical_leg = fetch_lexical_candidates(pool, query, k, project).await;

    let (vector, lexical) = match (vector_leg, lexical_leg) {
        (Ok(v), Ok(l)) => (v, l),
        (Ok(v), Err(e)) => {
            tracing::warn!(error = %e, "lexical leg failed; returning vector results only");
            (v, Vec::new())
        }
        (Err(e), Ok(l)) => {
            tracing::warn!(error = %e, "vector leg failed; returning lexical results only");
            (Vec::new(), l)
        }
        (Err(ve), Err(le)) => {
            bail!("search failed on both legs: vector: {}; lexical: {}", ve, le)
        }
    };

    Ok(fuse_candidates(&vector, &lexical, limit))
}

/// CLI entry point for `dgx search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    project: Option<&str>,
    limit: Option<usize>,
) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;

    let client = embedding::create_client(&config.embedding)?;
    let embedder = Embedder::new(client, &config.embedding);

    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let hits = hybrid_search(&pool, &embedder, query, project, limit).await?;

    if hits.is_empty() {
        println!("no results");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            hit.combined_score,
            hit.document_title,
            hit.document_source
        );
        if let Some(v) = hit.vector_score {
            print!("   vector: {:.4}", v);
        } else {
            print!("   vector: -");
        }
        if let Some(l) = hit.lexical_score {
            println!("  lexical: {:.4}", l);
        } else {
            println!("  lexical: -");
        }
        let preview: String = hit.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
        println!();
    }

    pool.close().await;
    Ok(())
}
