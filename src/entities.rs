//! Rule-based entity extraction.
//!
//! Two passes over the document text:
//!
//! 1. A general pass with NER-style patterns for organizations, people,
//!    dates, monetary amounts, and references to other documents.
//! 2. A pattern pass for compact organization names that the general pass
//!    misses: all-caps names fused with a legal suffix (common in scanned
//!    text, e.g. `NORTHWIND GROUPLLC` losing its space) and CamelCase
//!    business compounds (e.g. `MeridianLogistics`).
//!
//! Every match is one mention row; repeated mentions of the same entity are
//! kept so that mention counts stay meaningful. Texts shorter than
//! [`MIN_TEXT_LEN`] produce no entities.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::models::{EntityType, ExtractionMethod};

/// Texts shorter than this are too small to carry extractable entities.
pub const MIN_TEXT_LEN: usize = 10;

/// One extracted mention, ready to persist.
#[derive(Debug, Clone)]
pub struct EntityMention {
    pub entity_type: EntityType,
    /// Canonical name: trimmed, inner whitespace collapsed.
    pub name: String,
    /// The raw matched text.
    pub mention_text: String,
    pub method: ExtractionMethod,
    pub metadata: serde_json::Value,
}

static ORG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[A-Z][A-Za-z0-9&.'-]*(?:\s+(?:[A-Z][A-Za-z0-9&.'-]*|of|and|the)){0,4}\s+(?:LLC|Ltd|Limited|Inc|Incorporated|Corp|Corporation|GmbH|AG|PLC|LLP|OOO|UAB)\b\.?",
    )
    .unwrap()
});

static PERSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Prof)\.?\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2})").unwrap()
});

static DATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").unwrap(),
        Regex::new(r"\b\d{1,2}[./]\d{1,2}[./]\d{2,4}\b").unwrap(),
        Regex::new(
            r"\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
        )
        .unwrap(),
        Regex::new(
            r"\b\d{1,2}\s+(?:January|February|March|April|May|June|July|August|September|October|November|December),?\s+\d{4}\b",
        )
        .unwrap(),
    ]
});

static MONEY_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?:USD|EUR|GBP|\$|€|£)\s?\d[\d,]*(?:\.\d+)?(?:\s?(?:thousand|million|billion))?")
            .unwrap(),
        Regex::new(r"\b\d[\d,]*(?:\.\d+)?\s?(?:USD|EUR|GBP|dollars|euros)\b").unwrap(),
    ]
});

static DOC_REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:Contract|Agreement|Amendment|Addendum|Annex|Appendix|Invoice|Specification|Purchase Order|PO|Waybill|CMR)\s+(?:No\.?|Number|#|№)?\s*([A-Za-z0-9][A-Za-z0-9/.-]*\d[A-Za-z0-9/.-]*)",
    )
    .unwrap()
});

/// All-caps name fused directly with a legal suffix (missing space).
static FUSED_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{4,30}(?:LLC|LTD|GMBH|CORP|INC|OOO|UAB)\b").unwrap());

/// CamelCase compound ending in a business noun.
static BUSINESS_COMPOUND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b[A-Z][a-z]{2,}(?:Logistics|Trading|Shipping|Solutions|Systems|Services|Industries|Holdings|Export|Import|Supply|Trans)\b",
    )
    .unwrap()
});

/// Extract all entity mentions from `text`.
///
/// Mentions overlapping an already-emitted span of the same type are
/// suppressed; everything else is kept, including repeats of the same name.
pub fn extract_entities(text: &str) -> Vec<EntityMention> {
    if text.len() < MIN_TEXT_LEN {
        return Vec::new();
    }

    let mut mentions = Vec::new();
    let mut seen: HashSet<(usize, usize, EntityType)> = HashSet::new();

    // General pass
    for m in ORG_RE.find_iter(text) {
        push_mention(
            &mut mentions,
            &mut seen,
            EntityType::Organization,
            m.start(),
            m.end(),
            m.as_str(),
            m.as_str(),
            ExtractionMethod::Ner,
            serde_json::json!({}),
        );
    }

    for caps in PERSON_RE.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end(), m.as_str()));
        let name = caps.get(1).map(|m| m.as_str());
        if let (Some((start, end, mention)), Some(name)) = (whole, name) {
            push_mention(
                &mut mentions,
                &mut seen,
                EntityType::Person,
                start,
                end,
                name,
                mention,
                ExtractionMethod::Ner,
                serde_json::json!({}),
            );
        }
    }

    for re in DATE_RES.iter() {
        for m in re.find_iter(text) {
            push_mention(
                &mut mentions,
                &mut seen,
                EntityType::Date,
                m.start(),
                m.end(),
                m.as_str(),
                m.as_str(),
                ExtractionMethod::Ner,
                serde_json::json!({}),
            );
        }
    }

    for re in MONEY_RES.iter() {
        for m in re.find_iter(text) {
            push_mention(
                &mut mentions,
                &mut seen,
                EntityType::Money,
                m.start(),
                m.end(),
                m.as_str(),
                m.as_str(),
                ExtractionMethod::Ner,
                serde_json::json!({}),
            );
        }
    }

    for caps in DOC_REF_RE.captures_iter(text) {
        let whole = caps.get(0).map(|m| (m.start(), m.end(), m.as_str()));
        if let (Some((start, end, mention)), Some(_ref_no)) = (whole, caps.get(1)) {
            push_mention(
                &mut mentions,
                &mut seen,
                EntityType::DocRef,
                start,
                end,
                mention,
                mention,
                ExtractionMethod::Ner,
                serde_json::json!({}),
            );
        }
    }

    // Pattern pass
    for m in FUSED_SUFFIX_RE.find_iter(text) {
        push_mention(
            &mut mentions,
            &mut seen,
            EntityType::Organization,
            m.start(),
            m.end(),
            m.as_str(),
            m.as_str(),
            ExtractionMethod::Pattern,
            serde_json::json!({ "pattern": "fused_suffix" }),
        );
    }

    for m in BUSINESS_COMPOUND_RE.find_iter(text) {
        push_mention(
            &mut mentions,
            &mut seen,
            EntityType::Organization,
            m.start(),
            m.end(),
            m.as_str(),
            m.as_str(),
            ExtractionMethod::Pattern,
            serde_json::json!({ "pattern": "business_compound" }),
        );
    }

    mentions
}

#[allow(clippy::too_many_arguments)]
fn push_mention(
    mentions: &mut Vec<EntityMention>,
    seen: &mut HashSet<(usize, usize, EntityType)>,
    entity_type: EntityType,
    start: usize,
    end: usize,
    name: &str,
    mention_text: &str,
    method: ExtractionMethod,
    metadata: serde_json::Value,
) {
    let name = canonical_name(name);
    if name.len() < 3 {
        return;
    }
    // Suppress a second pattern firing inside a span already claimed for
    // this type.
    let overlaps = seen
        .iter()
        .any(|&(s, e, t)| t == entity_type && start < e && end > s);
    if overlaps {
        return;
    }
    seen.insert((start, end, entity_type));

    mentions.push(EntityMention {
        entity_type,
        name,
        mention_text: mention_text.trim().to_string(),
        method,
        metadata,
    });
}

/// Trim and collapse inner whitespace.
fn canonical_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_of(mentions: &[EntityMention], ty: EntityType) -> Vec<String> {
        mentions
            .iter()
            .filter(|m| m.entity_type == ty)
            .map(|m| m.name.clone())
            .collect()
    }

    #[test]
    fn test_short_text_yields_nothing() {
        assert!(extract_entities("Acme LLC").is_empty());
        assert!(extract_entities("").is_empty());
    }

    #[test]
    fn test_organization_with_suffix() {
        let text = "This agreement is between Acme Corp and Blue Harbor Logistics Ltd. today.";
        let orgs = names_of(&extract_entities(text), EntityType::Organization);
        assert!(orgs.iter().any(|n| n.starts_with("Acme Corp")));
        assert!(orgs.iter().any(|n| n.contains("Blue Harbor Logistics Ltd")));
    }

    #[test]
    fn test_person_with_honorific() {
        let text = "Signed by Dr. Elena Ruiz on behalf of the buyer.";
        let people = names_of(&extract_entities(text), EntityType::Person);
        assert_eq!(people, vec!["Elena Ruiz".to_string()]);
    }

    #[test]
    fn test_date_formats() {
        let text =
            "Effective 2024-03-15, replacing the draft of 01/02/2023 and the note of March 3, 2022.";
        let dates = names_of(&extract_entities(text), EntityType::Date);
        assert!(dates.contains(&"2024-03-15".to_string()));
        assert!(dates.contains(&"01/02/2023".to_string()));
        assert!(dates.contains(&"March 3, 2022".to_string()));
    }

    #[test]
    fn test_money_amounts() {
        let text = "The total fee is $125,000.50 with a cap of EUR 2 million overall.";
        let money = names_of(&extract_entities(text), EntityType::Money);
        assert!(money.iter().any(|m| m.contains("125,000.50")));
        assert!(money.iter().any(|m| m.contains("EUR 2 million")));
    }

    #[test]
    fn test_doc_ref_requires_a_number() {
        let text = "Per Contract No. C-2024-001, see also the general Agreement terms.";
        let refs = names_of(&extract_entities(text), EntityType::DocRef);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].contains("C-2024-001"));
    }

    #[test]
    fn test_fused_suffix_pattern_pass() {
        let text = "Payment shall be made to NORTHWINDLLC within 30 days of receipt.";
        let mentions = extract_entities(text);
        let fused: Vec<_> = mentions
            .iter()
            .filter(|m| m.method == ExtractionMethod::Pattern)
            .collect();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].name, "NORTHWINDLLC");
        assert_eq!(fused[0].entity_type, EntityType::Organization);
        assert_eq!(fused[0].metadata["pattern"], "fused_suffix");
    }

    #[test]
    fn test_business_compound_pattern_pass() {
        let text = "Carrier services are provided by MeridianLogistics under this order.";
        let mentions = extract_entities(text);
        assert!(mentions
            .iter()
            .any(|m| m.name == "MeridianLogistics" && m.method == ExtractionMethod::Pattern));
    }

    #[test]
    fn test_repeated_mentions_are_kept() {
        let text = "Acme Corp supplies goods. Acme Corp also invoices monthly.";
        let orgs = names_of(&extract_entities(text), EntityType::Organization);
        assert_eq!(orgs.len(), 2);
    }

    #[test]
    fn test_overlapping_spans_suppressed() {
        // The fused-suffix pattern must not double-report an org the general
        // pass found, and vice versa within a single span.
        let text = "Delivery by VOLGATRANSLLC was confirmed twice by VOLGATRANSLLC staff.";
        let orgs: Vec<_> = extract_entities(text)
            .into_iter()
            .filter(|m| m.entity_type == EntityType::Organization)
            .collect();
        assert_eq!(orgs.len(), 2);
    }
}
