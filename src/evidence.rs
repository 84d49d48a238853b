//! Evidence assembly: from a free-text query to a ranked, deduplicated set
//! of incidents with optional classifications and report excerpts.
//!
//! Ranking policy: similarity hits are partitioned by source type, and the
//! candidate id list concatenates direct incident matches first, then
//! incidents reached through matching reports, then incidents reached through
//! matching classifications. Direct evidence outranks inferred evidence even
//! when the inferred hit scored higher. Within each partition, hits keep
//! their similarity order. The result is deterministic for a fixed index and
//! a deterministic embedding provider.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_with_fallback, EmbeddingProvider};
use crate::index::EmbeddingIndex;
use crate::models::{
    EvidenceIncident, EvidenceSet, SimilarityResult, SourceType, TaxonomySummary,
};
use crate::resolver::EntityResolver;

pub struct EvidenceAssembler {
    provider: Arc<dyn EmbeddingProvider>,
    index: EmbeddingIndex,
    resolver: EntityResolver,
    retrieval: RetrievalConfig,
}

impl EvidenceAssembler {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: EmbeddingIndex,
        resolver: EntityResolver,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            provider,
            index,
            resolver,
            retrieval,
        }
    }

    /// Embed the query text and run an oversampled index search. The index
    /// is always filtered by the provider's model tag so vectors from
    /// different models are never compared.
    pub async fn vector_search(&self, text: &str, min_score: f32) -> Result<Vec<SimilarityResult>> {
        let query_vec = embed_with_fallback(self.provider.as_ref(), text).await?;
        self.index
            .search(
                &query_vec,
                self.provider.model_name(),
                min_score,
                self.retrieval.oversample_limit,
            )
            .await
    }

    /// Partition hits by source type and union the resolved incident ids:
    /// direct incident hits, then report-derived, then classification-derived,
    /// deduplicated preserving first appearance.
    pub async fn candidate_incident_ids(&self, hits: &[SimilarityResult]) -> Result<Vec<i64>> {
        let direct_ids: Vec<i64> = hits
            .iter()
            .filter(|hit| hit.source_type == SourceType::Incident)
            .filter_map(|hit| hit.source_id.parse().ok())
            .collect();

        let report_ids: Vec<i64> = hits
            .iter()
            .filter(|hit| hit.source_type == SourceType::Report)
            .filter_map(|hit| hit.source_id.parse().ok())
            .collect();

        let classification_ids: Vec<String> = hits
            .iter()
            .filter(|hit| hit.source_type == SourceType::Classification)
            .map(|hit| hit.source_id.clone())
            .collect();

        let report_derived = self
            .resolver
            .incident_ids_from_report_ids(&report_ids)
            .await?;
        let classification_derived = self
            .resolver
            .incident_ids_from_classification_ids(&classification_ids)
            .await?;

        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for id in direct_ids
            .into_iter()
            .chain(report_derived)
            .chain(classification_derived)
        {
            if seen.insert(id) {
                ordered.push(id);
            }
        }

        Ok(ordered)
    }

    /// Fetch the full records for each candidate id in order. Ids that no
    /// longer resolve are dropped silently; the cap bounds attempts, not
    /// successful fetches.
    async fn fetch_incidents(
        &self,
        incident_ids: &[i64],
        include_classifications: bool,
        report_text_depth: usize,
    ) -> Result<Vec<EvidenceIncident>> {
        let mut incidents = Vec::new();
        for &id in incident_ids {
            if let Some(incident) = self
                .resolver
                .find_incident_by_id(id, include_classifications, report_text_depth)
                .await?
            {
                incidents.push(incident);
            }
        }
        Ok(incidents)
    }

    /// Incidents most similar to a free-text query, capped at `limit`.
    pub async fn find_similar_incidents_by_text(
        &self,
        text: &str,
        include_classifications: bool,
        limit: usize,
        report_text_depth: usize,
    ) -> Result<Vec<EvidenceIncident>> {
        let hits = self.vector_search(text, self.retrieval.min_score).await?;
        let mut candidate_ids = self.candidate_incident_ids(&hits).await?;
        candidate_ids.truncate(limit);
        self.fetch_incidents(&candidate_ids, include_classifications, report_text_depth)
            .await
    }

    /// Incidents similar to an existing incident, searching on its title.
    /// Only direct incident hits count; an unknown incident id yields an
    /// empty list.
    pub async fn find_similar_incidents_by_incident_id(
        &self,
        incident_id: i64,
        include_classifications: bool,
        report_text_depth: usize,
    ) -> Result<Vec<EvidenceIncident>> {
        let incident = match self.resolver.find_incident(incident_id).await? {
            Some(incident) => incident,
            None => return Ok(Vec::new()),
        };

        let hits = self
            .vector_search(&incident.title, self.retrieval.min_score)
            .await?;

        let mut seen = HashSet::new();
        let similar_ids: Vec<i64> = hits
            .iter()
            .filter(|hit| hit.source_type == SourceType::Incident)
            .filter_map(|hit| hit.source_id.parse().ok())
            .filter(|id| seen.insert(*id))
            .collect();

        self.fetch_incidents(&similar_ids, include_classifications, report_text_depth)
            .await
    }

    /// Incidents linked to the given report numbers, no similarity search.
    pub async fn find_incidents_by_report_ids(
        &self,
        report_ids: &[i64],
        include_classifications: bool,
        report_text_depth: usize,
    ) -> Result<Vec<EvidenceIncident>> {
        if report_ids.is_empty() {
            return Ok(Vec::new());
        }
        let incident_ids = self.resolver.incident_ids_from_report_ids(report_ids).await?;
        self.fetch_incidents(&incident_ids, include_classifications, report_text_depth)
            .await
    }

    /// Classification evidence for a taxonomy: similar incidents with their
    /// classifications filtered to the requested namespace. "No similar
    /// incidents" and "similar incidents but none classified under this
    /// taxonomy" are distinct states, reported through the summary message.
    pub async fn similar_incidents_classifications(
        &self,
        text: &str,
        taxonomy: &str,
    ) -> Result<EvidenceSet> {
        let hits = self
            .vector_search(text, self.retrieval.classification_min_score)
            .await?;

        if hits.is_empty() {
            return Ok(EvidenceSet {
                incidents: Vec::new(),
                taxonomy_data: TaxonomySummary {
                    namespace: taxonomy.to_string(),
                    classification_count: 0,
                    message: Some("No similar incidents found.".to_string()),
                },
            });
        }

        let mut candidate_ids = self.candidate_incident_ids(&hits).await?;
        candidate_ids.truncate(self.retrieval.candidate_cap);

        let incidents = self.fetch_incidents(&candidate_ids, true, 1).await?;

        let classified: Vec<&EvidenceIncident> = incidents
            .iter()
            .filter(|incident| {
                incident
                    .classifications
                    .as_ref()
                    .map(|cs| cs.iter().any(|c| c.namespace == taxonomy))
                    .unwrap_or(false)
            })
            .collect();

        if classified.is_empty() {
            return Ok(EvidenceSet {
                incidents,
                taxonomy_data: TaxonomySummary {
                    namespace: taxonomy.to_string(),
                    classification_count: 0,
                    message: Some(format!(
                        "Found similar incidents, but none have classifications for the '{}' taxonomy. Try a different taxonomy namespace.",
                        taxonomy
                    )),
                },
            });
        }

        let classification_count = classified.len();
        let filtered: Vec<EvidenceIncident> = classified
            .into_iter()
            .take(self.retrieval.candidate_cap)
            .map(|incident| EvidenceIncident {
                incident_id: incident.incident_id,
                title: incident.title.clone(),
                description: incident.description.clone(),
                classifications: incident.classifications.as_ref().map(|cs| {
                    cs.iter()
                        .filter(|c| c.namespace == taxonomy)
                        .cloned()
                        .collect()
                }),
                reports: incident.reports.clone(),
            })
            .collect();

        Ok(EvidenceSet {
            incidents: filtered,
            taxonomy_data: TaxonomySummary {
                namespace: taxonomy.to_string(),
                classification_count,
                message: None,
            },
        })
    }
}

/// Render an evidence set in the fixed layout embedded into classification
/// prompts. The layout is stable: prompts must not vary with formatting.
pub fn render_evidence(set: &EvidenceSet) -> String {
    if set.incidents.is_empty() {
        return "No similar incidents found.".to_string();
    }

    let mut output = String::new();

    for incident in &set.incidents {
        output.push_str(&format!(
            "Id: {}\ntitle: {}\ndescription: ",
            incident.incident_id, incident.title
        ));

        match &incident.description {
            Some(description) => output.push_str(description),
            None => output.push_str("No description available"),
        }

        output.push_str("\n\nfirst report text: ");

        match incident.reports.as_deref() {
            None | Some([]) => output.push_str("No report array found"),
            Some([first, ..]) if first.text.is_empty() => {
                output.push_str("No report text available")
            }
            Some([first, ..]) => output.push_str(&first.text),
        }

        output.push_str("\n\nclassifications:\n");

        match incident.classifications.as_deref() {
            None | Some([]) => output.push_str("No classifications available\n"),
            Some(classifications) => {
                for classification in classifications {
                    let rendered = serde_json::to_string_pretty(classification)
                        .unwrap_or_else(|_| "{}".to_string());
                    output.push_str(&rendered);
                    output.push('\n');
                }
            }
        }

        output.push_str("\n---\n\n");
    }

    output.push_str(&format!(
        "Taxonomy: {}\nClassification Count: {}",
        set.taxonomy_data.namespace, set.taxonomy_data.classification_count
    ));

    if let Some(message) = &set.taxonomy_data.message {
        output.push_str(&format!("\nMessage: {}", message));
    }

    output
}
