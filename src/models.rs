//! Core data types shared across the ingestion, extraction, and query paths.

use serde::{Deserialize, Serialize};

/// A single slice of a document body, sized for embedding.
///
/// Chunks are produced by [`crate::chunk::chunk_text`]. `chunk_index` is the
/// 0-based position within the parent document; indices are contiguous.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: i64,
    pub hash: String,
}

/// Outcome class for a single document ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    /// First time this content was seen under this project.
    Created,
    /// Same source path, different content: chunks and entities were rebuilt.
    Updated,
    /// Identical content already present; only counters were bumped.
    Skipped,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Created => "created",
            IngestStatus::Updated => "updated",
            IngestStatus::Skipped => "skipped",
        }
    }
}

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub title: String,
    pub status: IngestStatus,
    pub chunk_count: usize,
    pub entity_count: usize,
}

/// Per-file report for directory ingestion; `error` is set when the file
/// failed and the rest of the batch continued.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub source: String,
    pub outcome: Option<IngestOutcome>,
    pub error: Option<String>,
}

/// The closed vocabulary of entity kinds the extractor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Organization,
    Person,
    Date,
    Money,
    DocRef,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Organization => "ORG",
            EntityType::Person => "PER",
            EntityType::Date => "DATE",
            EntityType::Money => "MONEY",
            EntityType::DocRef => "DOC_REF",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ORG" | "ORGANIZATION" => Some(EntityType::Organization),
            "PER" | "PERSON" => Some(EntityType::Person),
            "DATE" => Some(EntityType::Date),
            "MONEY" => Some(EntityType::Money),
            "DOC_REF" | "DOCREF" | "DOCUMENT_REFERENCE" => Some(EntityType::DocRef),
            _ => None,
        }
    }
}

/// How an entity mention was found: the general NER-style pass or the
/// compact-name pattern pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    Ner,
    Pattern,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::Ner => "ner",
            ExtractionMethod::Pattern => "pattern",
        }
    }
}

/// The closed vocabulary of typed relations between documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationType {
    Amends,
    References,
    IsPartyTo,
    PaysFor,
    DeliversTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Amends => "AMENDS",
            RelationType::References => "REFERENCES",
            RelationType::IsPartyTo => "IS_PARTY_TO",
            RelationType::PaysFor => "PAYS_FOR",
            RelationType::DeliversTo => "DELIVERS_TO",
        }
    }

    /// Lenient parse used on model output. Returns `None` both for unknown
    /// labels and for the explicit no-relation answer.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "AMENDS" => Some(RelationType::Amends),
            "REFERENCES" => Some(RelationType::References),
            "IS_PARTY_TO" | "PARTIES_TO" => Some(RelationType::IsPartyTo),
            "PAYS_FOR" => Some(RelationType::PaysFor),
            "DELIVERS_TO" | "DELIVERS" => Some(RelationType::DeliversTo),
            _ => None,
        }
    }
}

/// One fused hit from hybrid search.
///
/// `vector_score` and `lexical_score` report the raw leg scores (cosine
/// similarity and BM25-derived) when the chunk appeared in that candidate
/// set; a chunk found by only one leg carries `None` for the other.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub document_title: String,
    pub document_source: String,
    pub text: String,
    pub combined_score: f64,
    pub vector_score: Option<f64>,
    pub lexical_score: Option<f64>,
}

/// A document matched through one of its entity mentions.
#[derive(Debug, Clone, Serialize)]
pub struct EntityDocMatch {
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub entity_type: String,
    pub entity_name: String,
    pub mentions: i64,
}

/// Direction of a relation edge relative to the queried document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationDirection {
    Outgoing,
    Incoming,
}

/// A document one relation hop away from the queried document.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedDocument {
    pub document_id: String,
    pub title: String,
    pub source: String,
    pub relation_type: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub direction: RelationDirection,
}
