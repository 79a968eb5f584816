//! Relation extraction between documents.
//!
//! Candidate document pairs are proposed from shared entity names, then each
//! pair is judged by a [`ReasoningClient`] (a chat-completions model) which
//! answers with a relation type from the closed vocabulary, a confidence,
//! and a short justification. Accepted judgements are written one pair per
//! transaction so an interrupted batch leaves a usable graph.
//!
//! The model response is expected to contain a JSON object; when it does
//! not, a keyword scan over the raw text is used as a fallback before the
//! pair is given up on.

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use uuid::Uuid;

use crate::config::ReasoningConfig;
use crate::error::DocgraphError;
use crate::models::RelationType;

/// A judged relation between two documents.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationJudgement {
    pub relation_type: RelationType,
    pub confidence: f64,
    pub reasoning: String,
}

/// Everything the judge sees about one candidate pair.
#[derive(Debug, Clone)]
pub struct PairContext {
    pub source_title: String,
    pub source_entities: Vec<String>,
    pub target_title: String,
    pub target_entities: Vec<String>,
}

/// Judges whether (and how) two documents are related.
///
/// `Ok(None)` means the judge answered "no relation"; errors mean the
/// capability itself failed.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn classify(&self, pair: &PairContext) -> Result<Option<RelationJudgement>>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiReasoningClient {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiReasoningClient {
    pub fn new(
        model: String,
        url: String,
        api_key: String,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url,
            api_key,
            max_retries,
            client,
        })
    }

    /// Build from config, reading `OPENAI_API_KEY` from the environment.
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reasoning.model required for openai provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string());
        Self::new(model, url, api_key, config.timeout_secs, config.max_retries)
    }
}

#[async_trait]
impl ReasoningClient for OpenAiReasoningClient {
    async fn classify(&self, pair: &PairContext) -> Result<Option<RelationJudgement>> {
        let prompt = build_prompt(pair);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.0,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let content = json
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("message"))
                            .and_then(|m| m.get("content"))
                            .and_then(|c| c.as_str())
                            .ok_or_else(|| {
                                anyhow::anyhow!("invalid chat response: missing message content")
                            })?;
                        return Ok(parse_judgement(content));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(format!("reasoning API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("reasoning API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(anyhow::Error::new(DocgraphError::Capability(
            last_err.unwrap_or_else(|| "reasoning failed after retries".to_string()),
        )))
    }
}

const SYSTEM_PROMPT: &str = "You classify the relationship between two business documents. \
Answer with a single JSON object: {\"relation_type\": \"AMENDS|REFERENCES|IS_PARTY_TO|PAYS_FOR|DELIVERS_TO|NONE\", \
\"confidence\": 0.0-1.0, \"reasoning\": \"one sentence\"}. \
Use NONE when the documents merely mention similar things without a direct relationship.";

fn build_prompt(pair: &PairContext) -> String {
    format!(
        "Document A: {}\nEntities in A: {}\n\nDocument B: {}\nEntities in B: {}\n\n\
         How is document A related to document B?",
        pair.source_title,
        pair.source_entities.join(", "),
        pair.target_title,
        pair.target_entities.join(", "),
    )
}

static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// Extract a judgement from raw model output.
///
/// Tries the first JSON object in the text; falls back to scanning for a
/// bare relation keyword. Returns `None` for an explicit NONE answer or
/// when nothing usable is found.
pub fn parse_judgement(content: &str) -> Option<RelationJudgement> {
    if let Some(m) = JSON_OBJECT_RE.find(content) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(m.as_str()) {
            let label = value
                .get("relation_type")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let relation_type = RelationType::parse(label)?;
            let confidence = value
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            let reasoning = value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            return Some(RelationJudgement {
                relation_type,
                confidence,
                reasoning,
            });
        }
    }

    // Fallback: a bare keyword somewhere in the answer.
    let upper = content.to_ascii_uppercase();
    for ty in [
        RelationType::Amends,
        RelationType::IsPartyTo,
        RelationType::PaysFor,
        RelationType::DeliversTo,
        RelationType::References,
    ] {
        if upper.contains(ty.as_str()) {
            return Some(RelationJudgement {
                relation_type: ty,
                confidence: 0.6,
                reasoning: "keyword match in model output".to_string(),
            });
        }
    }

    None
}

/// Build the configured [`ReasoningClient`].
pub fn create_client(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningClient>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiReasoningClient::from_config(config)?)),
        "disabled" => bail!("reasoning provider is disabled; relation extraction requires one"),
        other => bail!("unknown reasoning provider: {}", other),
    }
}

/// Summary of one relation extraction batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelationBatchSummary {
    /// Candidate pairs that were judged (or attempted).
    pub attempted: usize,
    /// Relations written.
    pub created: usize,
    /// Pairs that produced no edge: judge said NONE, confidence was below
    /// threshold, or the attempt failed.
    pub skipped: usize,
}

/// Drives candidate-pair selection and judgement.
pub struct RelationExtractor {
    client: Arc<dyn ReasoningClient>,
    confidence_threshold: f64,
    max_pairs: usize,
}

impl RelationExtractor {
    pub fn new(client: Arc<dyn ReasoningClient>, config: &ReasoningConfig) -> Self {
        Self {
            client,
            confidence_threshold: config.confidence_threshold,
            max_pairs: config.max_pairs,
        }
    }

    /// Judge candidate pairs and upsert accepted relations.
    ///
    /// Pairs are drawn from documents sharing at least one entity name
    /// (case-insensitive), ordered by how many they share. Each accepted
    /// judgement replaces any previous relations between the pair, in its
    /// own transaction. A failed pair is logged and skipped; the batch as a
    /// whole fails only when every attempted pair failed.
    pub async fn extract_relations(
        &self,
        pool: &SqlitePool,
        project: Option<&str>,
    ) -> Result<RelationBatchSummary> {
        let pairs = candidate_pairs(pool, project, self.max_pairs).await?;

        let mut summary = RelationBatchSummary::default();
        let mut failures = 0usize;

        for (source_id, target_id, shared) in &pairs {
            summary.attempted += 1;

            let pair = load_pair_context(pool, source_id, target_id).await?;
            tracing::debug!(
                source = %source_id,
                target = %target_id,
                shared,
                "judging candidate pair"
            );

            match self.client.classify(&pair).await {
                Ok(Some(judgement)) if judgement.confidence >= self.confidence_threshold => {
                    upsert_relation(pool, source_id, target_id, &judgement).await?;
                    summary.created += 1;
                }
                Ok(_) => {
                    summary.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        source = %source_id,
                        target = %target_id,
                        error = %e,
                        "relation judgement failed; continuing"
                    );
                    summary.skipped += 1;
                    failures += 1;
                }
            }
        }

        if summary.attempted > 0 && failures == summary.attempted {
            return Err(anyhow::Error::new(DocgraphError::Capability(format!(
                "all {} relation judgements failed",
                summary.attempted
            ))));
        }

        Ok(summary)
    }
}

/// Document pairs sharing at least one entity name, most-shared first.
///
/// `a.document_id < b.document_id` keeps each unordered pair once and rules
/// out self-pairs.
async fn candidate_pairs(
    pool: &SqlitePool,
    project: Option<&str>,
    max_pairs: usize,
) -> Result<Vec<(String, String, i64)>> {
    let rows = sqlx::query(
        r#"
        SELECT a.document_id AS source_id, b.document_id AS target_id, COUNT(*) AS shared
        FROM entities a
        JOIN entities b
            ON lower(a.entity_name) = lower(b.entity_name)
            AND a.document_id < b.document_id
        JOIN documents da ON da.id = a.document_id
        JOIN documents db ON db.id = b.document_id
        WHERE (? IS NULL OR da.project_id = ?)
          AND (? IS NULL OR db.project_id = ?)
        GROUP BY a.document_id, b.document_id
        ORDER BY shared DESC, a.document_id ASC, b.document_id ASC
        LIMIT ?
        "#,
    )
    .bind(project)
    .bind(project)
    .bind(project)
    .bind(project)
    .bind(max_pairs as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get("source_id"),
                row.get("target_id"),
                row.get("shared"),
            )
        })
        .collect())
}

async fn load_pair_context(
    pool: &SqlitePool,
    source_id: &str,
    target_id: &str,
) -> Result<PairContext> {
    let source_title: String = sqlx::query_scalar("SELECT title FROM documents WHERE id = ?")
        .bind(source_id)
        .fetch_one(pool)
        .await?;
    let target_title: String = sqlx::query_scalar("SELECT title FROM documents WHERE id = ?")
        .bind(target_id)
        .fetch_one(pool)
        .await?;

    Ok(PairContext {
        source_title,
        source_entities: document_entity_labels(pool, source_id).await?,
        target_title,
        target_entities: document_entity_labels(pool, target_id).await?,
    })
}

async fn document_entity_labels(pool: &SqlitePool, document_id: &str) -> Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT DISTINCT entity_type, entity_name FROM entities
         WHERE document_id = ? ORDER BY entity_type, entity_name LIMIT 25",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            format!(
                "{} ({})",
                row.get::<String, _>("entity_name"),
                row.get::<String, _>("entity_type")
            )
        })
        .collect())
}

/// Replace any relations between the pair (both directions) with the new
/// judgement, atomically.
async fn upsert_relation(
    pool: &SqlitePool,
    source_id: &str,
    target_id: &str,
    judgement: &RelationJudgement,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM relations
         WHERE (source_document_id = ? AND target_document_id = ?)
            OR (source_document_id = ? AND target_document_id = ?)",
    )
    .bind(source_id)
    .bind(target_id)
    .bind(target_id)
    .bind(source_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO relations
         (id, source_document_id, target_document_id, relation_type, confidence, reasoning, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(source_id)
    .bind(target_id)
    .bind(judgement.relation_type.as_str())
    .bind(judgement.confidence.clamp(0.0, 1.0))
    .bind(&judgement.reasoning)
    .bind(chrono::Utc::now().timestamp())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// CLI entry point for `dgx relations extract`.
pub async fn run_extract(
    config: &crate::config::Config,
    project: Option<&str>,
    max_pairs: Option<usize>,
) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;

    let mut reasoning = config.reasoning.clone();
    if let Some(mp) = max_pairs {
        reasoning.max_pairs = mp;
    }
    let client = create_client(&reasoning)?;
    let extractor = RelationExtractor::new(client, &reasoning);

    let summary = extractor.extract_relations(&pool, project).await?;

    println!("relations extract");
    println!("  pairs judged:      {}", summary.attempted);
    println!("  relations created: {}", summary.created);
    println!("  pairs skipped:     {}", summary.skipped);
    println!("ok");

    pool.close().await;
    Ok(())
}
