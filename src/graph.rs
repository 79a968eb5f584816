//! Graph queries over entities and relations.
//!
//! Two read paths: documents matched by an entity name fragment, and the
//! one-hop relation neighborhood of a document.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::models::{EntityDocMatch, EntityType, RelatedDocument, RelationDirection};

/// Documents mentioning an entity whose name contains `name_fragment`
/// (case-insensitive), optionally filtered by entity type and project.
/// Ordered by mention count, then title.
pub async fn search_by_entity(
    pool: &SqlitePool,
    name_fragment: &str,
    entity_type: Option<EntityType>,
    project: Option<&str>,
) -> Result<Vec<EntityDocMatch>> {
    let type_str = entity_type.map(|t| t.as_str());

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.source, e.entity_type, e.entity_name, COUNT(*) AS mentions
        FROM entities e
        JOIN documents d ON d.id = e.document_id
        WHERE instr(lower(e.entity_name), lower(?)) > 0
          AND (? IS NULL OR e.entity_type = ?)
          AND (? IS NULL OR d.project_id = ?)
        GROUP BY d.id, e.entity_type, e.entity_name
        ORDER BY mentions DESC, d.title ASC, e.entity_name ASC
        "#,
    )
    .bind(name_fragment)
    .bind(type_str)
    .bind(type_str)
    .bind(project)
    .bind(project)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| EntityDocMatch {
            document_id: row.get("id"),
            title: row.get("title"),
            source: row.get("source"),
            entity_type: row.get("entity_type"),
            entity_name: row.get("entity_name"),
            mentions: row.get("mentions"),
        })
        .collect())
}

/// Documents one relation hop from `document_id`, both directions, highest
/// confidence first. Errors when the document does not exist.
pub async fn find_related_documents(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<RelatedDocument>> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        bail!("document not found: {}", document_id);
    }

    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.source, r.relation_type, r.confidence, r.reasoning,
               'outgoing' AS direction
        FROM relations r
        JOIN documents d ON d.id = r.target_document_id
        WHERE r.source_document_id = ?
        UNION ALL
        SELECT d.id, d.title, d.source, r.relation_type, r.confidence, r.reasoning,
               'incoming' AS direction
        FROM relations r
        JOIN documents d ON d.id = r.source_document_id
        WHERE r.target_document_id = ?
        ORDER BY confidence DESC, id ASC
        "#,
    )
    .bind(document_id)
    .bind(document_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let direction: String = row.get("direction");
            RelatedDocument {
                document_id: row.get("id"),
                title: row.get("title"),
                source: row.get("source"),
                relation_type: row.get("relation_type"),
                confidence: row.get("confidence"),
                reasoning: row.get("reasoning"),
                direction: if direction == "outgoing" {
                    RelationDirection::Outgoing
                } else {
                    RelationDirection::Incoming
                },
            }
        })
        .collect())
}

/// CLI entry point for `dgx entity`.
pub async fn run_entity(
    config: &Config,
    name: &str,
    entity_type: Option<&str>,
    project: Option<&str>,
) -> Result<()> {
    let entity_type = match entity_type {
        Some(s) => match EntityType::parse(s) {
            Some(t) => Some(t),
            None => bail!(
                "unknown entity type: '{}'. Available: ORG, PER, DATE, MONEY, DOC_REF",
                s
            ),
        },
        None => None,
    };

    let pool = crate::db::connect(&config.db.path).await?;
    let matches = search_by_entity(&pool, name, entity_type, project).await?;

    if matches.is_empty() {
        println!("no documents mention '{}'", name);
        pool.close().await;
        return Ok(());
    }

    println!(
        "{:<38} {:<8} {:>8}   {}",
        "DOCUMENT", "TYPE", "MENTIONS", "ENTITY"
    );
    println!("{}", "-".repeat(80));
    for m in &matches {
        println!(
            "{:<38} {:<8} {:>8}   {}",
            m.title.chars().take(36).collect::<String>(),
            m.entity_type,
            m.mentions,
            m.entity_name
        );
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point for `dgx related`.
pub async fn run_related(config: &Config, document_id: &str) -> Result<()> {
    let pool = crate::db::connect(&config.db.path).await?;
    let related = find_related_documents(&pool, document_id).await?;

    if related.is_empty() {
        println!("no related documents");
        pool.close().await;
        return Ok(());
    }

    for r in &related {
        let arrow = match r.direction {
            RelationDirection::Outgoing => "->",
            RelationDirection::Incoming => "<-",
        };
        println!(
            "{} {} [{:.2}] {} ({})",
            arrow, r.relation_type, r.confidence, r.title, r.source
        );
        if let Some(reason) = &r.reasoning {
            if !reason.is_empty() {
                println!("   {}", reason);
            }
        }
    }

    pool.close().await;
    Ok(())
}
