//! End-to-end pipeline tests against temporary databases.
//!
//! Capability clients are replaced with deterministic mocks so the full
//! ingest → extract → relate → query flow runs without network access.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

use docgraph::config::{ChunkingConfig, EmbeddingConfig, ReasoningConfig};
use docgraph::db;
use docgraph::embedding::{Embedder, EmbeddingClient};
use docgraph::error::DocgraphError;
use docgraph::get::{delete_document, get_document};
use docgraph::graph::{find_related_documents, search_by_entity};
use docgraph::ingest::{ensure_embedding_dims, ingest_document, ingest_path, DocumentInput};
use docgraph::migrate::run_migrations;
use docgraph::models::{EntityType, IngestStatus, RelationType};
use docgraph::relations::{
    PairContext, ReasoningClient, RelationExtractor, RelationJudgement,
};
use docgraph::search::hybrid_search;

/// Deterministic embedding client: a text always maps to the same unit
/// vector.
struct HashEmbeddingClient {
    dims: usize,
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_vector(t, self.dims)).collect())
    }
    fn model_name(&self) -> &str {
        "mock-embed"
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

fn hash_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for (i, b) in text.bytes().enumerate() {
        v[(i + b as usize) % dims] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Reasoning client that always answers the same judgement.
struct FixedReasoningClient {
    judgement: Option<RelationJudgement>,
}

#[async_trait]
impl ReasoningClient for FixedReasoningClient {
    async fn classify(&self, _pair: &PairContext) -> Result<Option<RelationJudgement>> {
        Ok(self.judgement.clone())
    }
}

/// Reasoning client that always fails.
struct FailingReasoningClient;

#[async_trait]
impl ReasoningClient for FailingReasoningClient {
    async fn classify(&self, _pair: &PairContext) -> Result<Option<RelationJudgement>> {
        Err(anyhow::Error::new(DocgraphError::Capability(
            "endpoint unreachable".to_string(),
        )))
    }
}

async fn setup() -> (TempDir, SqlitePool, Embedder) {
    let dir = TempDir::new().unwrap();
    let pool = db::connect(&dir.path().join("test.db")).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let cfg = EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("mock-embed".to_string()),
        dims: Some(8),
        batch_size: 16,
        ..Default::default()
    };
    let embedder = Embedder::new(Arc::new(HashEmbeddingClient { dims: 8 }), &cfg);

    (dir, pool, embedder)
}

fn chunking() -> ChunkingConfig {
    ChunkingConfig::default()
}

fn reasoning_config() -> ReasoningConfig {
    ReasoningConfig {
        provider: "openai".to_string(),
        model: Some("mock-judge".to_string()),
        confidence_threshold: 0.5,
        max_pairs: 50,
        ..Default::default()
    }
}

fn doc(source: &str, title: &str, body: &str) -> DocumentInput {
    DocumentInput {
        source: source.to_string(),
        uri: None,
        title: title.to_string(),
        body: body.to_string(),
        metadata: serde_json::json!({}),
    }
}

const CONTRACT_BODY: &str = "# Contract C-100\n\nThis agreement is made between Acme Corp \
and Beta Industries Ltd for freight services.\n\nPayment of $50,000 is due by 2024-01-15 \
as confirmed by Dr. Elena Ruiz.";

const INVOICE_BODY: &str = "# Invoice INV-9\n\nInvoice issued to Acme Corp for services \
rendered under Contract No. C-100.\n\nTotal amount: 5,000 USD payable on 01/02/2024.";

#[tokio::test]
async fn ingest_is_idempotent_by_content_hash() {
    let (_dir, pool, embedder) = setup().await;

    let input = doc("contracts/c100.md", "Contract C-100", CONTRACT_BODY);
    let first = ingest_document(&pool, &embedder, &chunking(), None, &input)
        .await
        .unwrap();
    assert_eq!(first.status, IngestStatus::Created);
    assert!(first.chunk_count >= 1);
    assert!(first.entity_count > 0);

    let second = ingest_document(&pool, &embedder, &chunking(), None, &input)
        .await
        .unwrap();
    assert_eq!(second.status, IngestStatus::Skipped);
    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.chunk_count, first.chunk_count);

    let fetched = get_document(&pool, &first.document_id).await.unwrap();
    assert_eq!(fetched.ingestion_count, 2);

    let doc_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(doc_count, 1);
}

#[tokio::test]
async fn updated_source_rebuilds_chunks_and_entities() {
    let (_dir, pool, embedder) = setup().await;

    let v1 = doc("notes/deal.md", "Deal", CONTRACT_BODY);
    let first = ingest_document(&pool, &embedder, &chunking(), None, &v1)
        .await
        .unwrap();

    let v2 = doc(
        "notes/deal.md",
        "Deal",
        "# Deal\n\nNow the counterparty is Gamma Holdings LLC and nothing else matters.",
    );
    let second = ingest_document(&pool, &embedder, &chunking(), None, &v2)
        .await
        .unwrap();
    assert_eq!(second.status, IngestStatus::Updated);
    assert_eq!(second.document_id, first.document_id);

    let fetched = get_document(&pool, &first.document_id).await.unwrap();
    assert!(fetched.body.contains("Gamma Holdings"));
    assert!(fetched
        .entities
        .iter()
        .any(|e| e.entity_name.contains("Gamma Holdings")));
    assert!(!fetched
        .entities
        .iter()
        .any(|e| e.entity_name.contains("Beta Industries")));
}

#[tokio::test]
async fn chunk_indices_are_contiguous_after_ingest() {
    let (_dir, pool, embedder) = setup().await;

    let body = (0..40)
        .map(|i| format!("Paragraph number {} with some padding text to fill the budget.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let chunking = ChunkingConfig {
        max_tokens: 30,
        overlap_tokens: 5,
    };

    let outcome = ingest_document(
        &pool,
        &embedder,
        &chunking,
        None,
        &doc("big.md", "Big", &body),
    )
    .await
    .unwrap();
    assert!(outcome.chunk_count > 1);

    let fetched = get_document(&pool, &outcome.document_id).await.unwrap();
    for (i, chunk) in fetched.chunks.iter().enumerate() {
        assert_eq!(chunk.index, i as i64);
    }
}

#[tokio::test]
async fn empty_document_is_rejected() {
    let (_dir, pool, embedder) = setup().await;

    let err = ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("empty.md", "Empty", "   \n\n  "),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DocgraphError>(),
        Some(DocgraphError::Document(_))
    ));
}

#[tokio::test]
async fn embedding_dims_mismatch_is_a_config_error() {
    let (_dir, pool, _embedder) = setup().await;

    ensure_embedding_dims(&pool, 8, "mock-embed").await.unwrap();
    ensure_embedding_dims(&pool, 8, "mock-embed").await.unwrap();

    let err = ensure_embedding_dims(&pool, 16, "other-model")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DocgraphError>(),
        Some(DocgraphError::Config(_))
    ));
}

#[tokio::test]
async fn directory_ingest_isolates_failures() {
    let (_dir, pool, embedder) = setup().await;

    let docs_dir = TempDir::new().unwrap();
    std::fs::write(docs_dir.path().join("good.md"), CONTRACT_BODY).unwrap();
    std::fs::write(docs_dir.path().join("bad.md"), "   ").unwrap();
    std::fs::write(docs_dir.path().join("ignored.pdf"), "binary").unwrap();

    let reports = ingest_path(&pool, &embedder, &chunking(), docs_dir.path(), None, None)
        .await
        .unwrap();
    assert_eq!(reports.len(), 2);

    let good = reports.iter().find(|r| r.source.ends_with("good.md")).unwrap();
    assert!(good.error.is_none());
    assert_eq!(
        good.outcome.as_ref().unwrap().status,
        IngestStatus::Created
    );

    let bad = reports.iter().find(|r| r.source.ends_with("bad.md")).unwrap();
    assert!(bad.outcome.is_none());
    assert!(bad.error.as_deref().unwrap().contains("no text content"));
}

#[tokio::test]
async fn entity_search_matches_across_documents() {
    let (_dir, pool, embedder) = setup().await;

    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        Some("deals"),
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        Some("deals"),
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let matches = search_by_entity(&pool, "acme", Some(EntityType::Organization), Some("deals"))
        .await
        .unwrap();
    let docs: std::collections::HashSet<_> =
        matches.iter().map(|m| m.document_id.clone()).collect();
    assert_eq!(docs.len(), 2);
    assert!(matches.iter().all(|m| m.entity_type == "ORG"));
    assert!(matches.iter().all(|m| m.mentions >= 1));

    // Wrong type: nothing.
    let people = search_by_entity(&pool, "acme", Some(EntityType::Person), Some("deals"))
        .await
        .unwrap();
    assert!(people.is_empty());

    // Wrong project: nothing.
    let elsewhere = search_by_entity(&pool, "acme", None, Some("other"))
        .await
        .unwrap();
    assert!(elsewhere.is_empty());
}

#[tokio::test]
async fn relation_extraction_upserts_per_pair() {
    let (_dir, pool, embedder) = setup().await;

    let a = ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    let b = ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let client = Arc::new(FixedReasoningClient {
        judgement: Some(RelationJudgement {
            relation_type: RelationType::PaysFor,
            confidence: 0.9,
            reasoning: "invoice pays for the contract".to_string(),
        }),
    });
    let extractor = RelationExtractor::new(client, &reasoning_config());

    let summary = extractor.extract_relations(&pool, None).await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.created, 1);

    // A second run replaces rather than duplicates.
    let summary = extractor.extract_relations(&pool, None).await.unwrap();
    assert_eq!(summary.created, 1);

    let relation_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(relation_count, 1);

    // Visible from both ends with opposite directions.
    let from_a = find_related_documents(&pool, &a.document_id).await.unwrap();
    assert_eq!(from_a.len(), 1);
    assert_eq!(from_a[0].document_id, b.document_id);
    assert_eq!(from_a[0].relation_type, "PAYS_FOR");

    let from_b = find_related_documents(&pool, &b.document_id).await.unwrap();
    assert_eq!(from_b.len(), 1);
    assert_ne!(from_a[0].direction, from_b[0].direction);
}

#[tokio::test]
async fn low_confidence_judgements_are_skipped() {
    let (_dir, pool, embedder) = setup().await;

    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let client = Arc::new(FixedReasoningClient {
        judgement: Some(RelationJudgement {
            relation_type: RelationType::References,
            confidence: 0.2,
            reasoning: "weak hunch".to_string(),
        }),
    });
    let extractor = RelationExtractor::new(client, &reasoning_config());

    let summary = extractor.extract_relations(&pool, None).await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.created, 0);
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn relation_batch_fails_only_when_every_pair_fails() {
    let (_dir, pool, embedder) = setup().await;

    // No documents: empty batch is a success.
    let extractor = RelationExtractor::new(Arc::new(FailingReasoningClient), &reasoning_config());
    let summary = extractor.extract_relations(&pool, None).await.unwrap();
    assert_eq!(summary.attempted, 0);

    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let err = extractor.extract_relations(&pool, None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DocgraphError>(),
        Some(DocgraphError::Capability(_))
    ));
}

#[tokio::test]
async fn hybrid_search_boundaries_and_basic_results() {
    let (_dir, pool, embedder) = setup().await;

    // Limit zero short-circuits.
    let hits = hybrid_search(&pool, &embedder, "anything", None, 0)
        .await
        .unwrap();
    assert!(hits.is_empty());

    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        Some("deals"),
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        Some("deals"),
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let hits = hybrid_search(&pool, &embedder, "payment freight services", Some("deals"), 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    for hit in &hits {
        assert!(hit.combined_score > 0.0);
        assert!(!hit.document_title.is_empty());
        assert!(!hit.text.is_empty());
        // At least one leg contributed.
        assert!(hit.vector_score.is_some() || hit.lexical_score.is_some());
    }

    // Scores are non-increasing.
    for pair in hits.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }

    // Unknown project sees nothing.
    let hits = hybrid_search(&pool, &embedder, "payment", Some("nowhere"), 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn search_rejects_embedder_with_wrong_dimensions() {
    let (_dir, pool, embedder) = setup().await;

    ensure_embedding_dims(&pool, 8, "mock-embed").await.unwrap();
    ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();

    let cfg = EmbeddingConfig {
        provider: "openai".to_string(),
        model: Some("other-model".to_string()),
        dims: Some(4),
        ..Default::default()
    };
    let narrow = Embedder::new(Arc::new(HashEmbeddingClient { dims: 4 }), &cfg);

    // A mismatched query embedder must fail loudly, not rank on zeroed
    // cosine scores.
    let err = hybrid_search(&pool, &narrow, "payment", None, 5)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DocgraphError>(),
        Some(DocgraphError::Config(_))
    ));

    // The matching embedder still searches the same corpus.
    let hits = hybrid_search(&pool, &embedder, "payment", None, 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
}

#[tokio::test]
async fn delete_cascades_to_everything_attached() {
    let (_dir, pool, embedder) = setup().await;

    let a = ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("a.md", "Contract", CONTRACT_BODY),
    )
    .await
    .unwrap();
    let b = ingest_document(
        &pool,
        &embedder,
        &chunking(),
        None,
        &doc("b.md", "Invoice", INVOICE_BODY),
    )
    .await
    .unwrap();

    let client = Arc::new(FixedReasoningClient {
        judgement: Some(RelationJudgement {
            relation_type: RelationType::PaysFor,
            confidence: 0.9,
            reasoning: String::new(),
        }),
    });
    let extractor = RelationExtractor::new(client, &reasoning_config());
    extractor.extract_relations(&pool, None).await.unwrap();

    assert!(delete_document(&pool, &a.document_id).await.unwrap());
    assert!(get_document(&pool, &a.document_id).await.is_err());

    let orphan_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(&a.document_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(orphan_chunks, 0);

    let orphan_entities: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE document_id = ?")
            .bind(&a.document_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(orphan_entities, 0);

    let relations_left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(relations_left, 0);

    // The other document is untouched.
    let other = get_document(&pool, &b.document_id).await.unwrap();
    assert!(!other.chunks.is_empty());

    // Deleting again reports not-found.
    assert!(!delete_document(&pool, &a.document_id).await.unwrap());
}
