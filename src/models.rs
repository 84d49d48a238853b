//! Core data models for the incident retrieval and classification pipeline.
//!
//! These types mirror the relational layout: incidents and reports are linked
//! many-to-many, and classifications reference incidents by id array rather
//! than by ownership. The evidence types make "field absent" vs "field empty"
//! an explicit `Option` distinction instead of a runtime check.

use serde::{Deserialize, Serialize};

/// Category of entity a chunk or similarity hit originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Incident,
    Report,
    Classification,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Incident => "incident",
            SourceType::Report => "report",
            SourceType::Classification => "classification",
        }
    }

    pub fn parse(s: &str) -> Option<SourceType> {
        match s {
            "incident" => Some(SourceType::Incident),
            "report" => Some(SourceType::Report),
            "classification" => Some(SourceType::Classification),
            _ => None,
        }
    }
}

/// One embedded chunk row. The `(source_type, source_id, chunk_index)` triple
/// is unique; chunk 0 is the synthesized metadata chunk, chunks >= 1 are body
/// text in order.
#[derive(Debug, Clone)]
pub struct EmbeddingChunk {
    pub source_type: SourceType,
    pub source_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub model: String,
    pub metadata: serde_json::Value,
}

/// Ephemeral similarity search hit. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    pub source_type: SourceType,
    pub source_id: String,
    pub chunk_text: String,
    /// Cosine similarity in `[-1, 1]`; higher is more similar.
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub date: Option<String>,
    pub editor_notes: Option<String>,
    #[serde(default)]
    pub editor_similar_incidents: Vec<i64>,
    #[serde(default)]
    pub editor_dissimilar_incidents: Vec<i64>,
    /// Report numbers linked via the incident-report join.
    #[serde(default)]
    pub reports: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub report_number: i64,
    pub title: String,
    pub text: String,
    pub plain_text: String,
    pub url: Option<String>,
    pub source_domain: Option<String>,
    pub date_published: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Report excerpt attached to an evidence incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportExcerpt {
    pub report_number: i64,
    pub title: String,
    pub text: String,
}

/// One named, JSON-valued field within a classification. `value_json` is a
/// JSON-encoded value wrapped as a string and may be doubly encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationAttribute {
    pub short_name: String,
    pub value_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub id: String,
    pub namespace: String,
    #[serde(default)]
    pub publish: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub attributes: Vec<ClassificationAttribute>,
    /// Incident ids this classification applies to (not strict ownership).
    #[serde(default)]
    pub incidents: Vec<i64>,
    #[serde(default)]
    pub reports: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyField {
    pub short_name: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub permitted_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyDefinition {
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub field_list: Vec<TaxonomyField>,
}

impl TaxonomyDefinition {
    /// Short names of every field, in declaration order.
    pub fn field_names(&self) -> Vec<&str> {
        self.field_list.iter().map(|f| f.short_name.as_str()).collect()
    }
}

/// One ranked incident in an assembled evidence set. Classifications and
/// report excerpts are attached only when requested by the caller.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceIncident {
    pub incident_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub classifications: Option<Vec<Classification>>,
    pub reports: Option<Vec<ReportExcerpt>>,
}

/// Summary of classification availability for a requested taxonomy.
/// `message` is set when the evidence set needs caller-facing explanation:
/// either no similar incidents were found at all, or incidents were found but
/// none carries a classification of the requested namespace.
#[derive(Debug, Clone, Serialize)]
pub struct TaxonomySummary {
    pub namespace: String,
    pub classification_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Ranked, deduplicated evidence set produced by the assembler.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceSet {
    pub incidents: Vec<EvidenceIncident>,
    pub taxonomy_data: TaxonomySummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_roundtrip() {
        for st in [
            SourceType::Incident,
            SourceType::Report,
            SourceType::Classification,
        ] {
            assert_eq!(SourceType::parse(st.as_str()), Some(st));
        }
        assert_eq!(SourceType::parse("entity"), None);
    }

    #[test]
    fn test_taxonomy_field_names_preserve_order() {
        let taxonomy = TaxonomyDefinition {
            namespace: "MIT".to_string(),
            description: None,
            field_list: vec![
                TaxonomyField {
                    short_name: "Severity".to_string(),
                    short_description: None,
                    permitted_values: vec![],
                },
                TaxonomyField {
                    short_name: "Harm Type".to_string(),
                    short_description: None,
                    permitted_values: vec![],
                },
            ],
        };
        assert_eq!(taxonomy.field_names(), vec!["Severity", "Harm Type"]);
    }
}
