//! Incremental embedding indexer.
//!
//! Enumerates every incident, report, and classification in the store,
//! queries the index once for already-embedded `(source_type, source_id)`
//! pairs, and processes only the difference under a concurrency ceiling.
//! Each item produces a metadata chunk at index 0 plus body chunks from
//! index 1, and every chunk row for one item is written in a single
//! transaction. A failure mid-item therefore leaves no partial chunk set
//! for the existence check to mistake for completed work.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_with_fallback, EmbeddingProvider};
use crate::index::EmbeddingIndex;
use crate::models::{Classification, EmbeddingChunk, Incident, Report, SourceType};
use crate::resolver::EntityResolver;

/// Outcome of one indexing run.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: u64,
}

#[derive(Clone)]
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    index: EmbeddingIndex,
    resolver: EntityResolver,
    chunking: ChunkingConfig,
    concurrency: usize,
}

impl Indexer {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: EmbeddingIndex,
        resolver: EntityResolver,
        chunking: ChunkingConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            index,
            resolver,
            chunking,
            concurrency: concurrency.max(1),
        }
    }

    /// Index everything not yet embedded. Items that fail are counted and
    /// logged but do not abort the run.
    pub async fn run(&self) -> Result<IndexReport> {
        let embedded = self.index.embedded_ids().await?;

        let mut pending: Vec<(SourceType, String)> = Vec::new();
        let mut skipped = 0usize;

        for id in self.resolver.all_incident_ids().await? {
            queue(&mut pending, &mut skipped, &embedded, SourceType::Incident, id.to_string());
        }
        for number in self.resolver.all_report_numbers().await? {
            queue(&mut pending, &mut skipped, &embedded, SourceType::Report, number.to_string());
        }
        for id in self.resolver.all_classification_ids().await? {
            queue(&mut pending, &mut skipped, &embedded, SourceType::Classification, id);
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<(SourceType, String, Result<u64>)> = JoinSet::new();

        for (source_type, source_id) in pending {
            let indexer = self.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let written = indexer.process_item(source_type, &source_id).await;
                (source_type, source_id, written)
            });
        }

        let mut report = IndexReport {
            skipped,
            ..IndexReport::default()
        };

        while let Some(joined) = tasks.join_next().await {
            let (source_type, source_id, written) = joined?;
            match written {
                Ok(count) => {
                    report.processed += 1;
                    report.chunks_written += count;
                    println!("Indexed {} {} ({} chunks)", source_type.as_str(), source_id, count);
                }
                Err(err) => {
                    report.failed += 1;
                    eprintln!(
                        "Error indexing {} {}: {:#}",
                        source_type.as_str(),
                        source_id,
                        err
                    );
                }
            }
        }

        Ok(report)
    }

    /// Embed and write all chunks for one source entity. Entities that no
    /// longer resolve write nothing and count as processed.
    async fn process_item(&self, source_type: SourceType, source_id: &str) -> Result<u64> {
        let (metadata_chunk, body, metadata) = match source_type {
            SourceType::Incident => {
                let id: i64 = source_id.parse().context("Invalid incident id")?;
                match self.resolver.find_incident(id).await? {
                    Some(incident) => incident_chunks(&incident),
                    None => return Ok(0),
                }
            }
            SourceType::Report => {
                let number: i64 = source_id.parse().context("Invalid report number")?;
                match self.resolver.find_report_by_number(number).await? {
                    Some(report) => report_chunks(&report),
                    None => return Ok(0),
                }
            }
            SourceType::Classification => {
                match self.resolver.find_classification(source_id).await? {
                    Some(classification) => classification_chunks(&classification),
                    None => return Ok(0),
                }
            }
        };

        let body_chunks = chunk_text(&body, &self.chunking);

        let mut chunks = Vec::with_capacity(body_chunks.len() + 1);
        for (chunk_index, text) in std::iter::once(metadata_chunk)
            .chain(body_chunks)
            .enumerate()
        {
            let embedding = embed_with_fallback(self.provider.as_ref(), &text).await?;
            chunks.push(EmbeddingChunk {
                source_type,
                source_id: source_id.to_string(),
                chunk_index: chunk_index as i64,
                chunk_text: text,
                embedding,
                model: self.provider.model_name().to_string(),
                metadata: metadata.clone(),
            });
        }

        self.index.insert_chunks(&chunks).await
    }
}

fn queue(
    pending: &mut Vec<(SourceType, String)>,
    skipped: &mut usize,
    embedded: &HashSet<(SourceType, String)>,
    source_type: SourceType,
    source_id: String,
) {
    if embedded.contains(&(source_type, source_id.clone())) {
        *skipped += 1;
    } else {
        pending.push((source_type, source_id));
    }
}

fn incident_chunks(incident: &Incident) -> (String, String, serde_json::Value) {
    let metadata_chunk = format!(
        "Title: {}\nEditor Notes: {}\nDate: {}",
        incident.title,
        incident.editor_notes.as_deref().unwrap_or(""),
        incident.date.as_deref().unwrap_or("")
    );
    let body = incident.description.clone().unwrap_or_default();
    let metadata = serde_json::json!({
        "incidentId": incident.incident_id,
        "title": incident.title,
        "date": incident.date,
    });
    (metadata_chunk, body, metadata)
}

fn report_chunks(report: &Report) -> (String, String, serde_json::Value) {
    let metadata_chunk = format!(
        "Title: {}\nURL: {}\nSource: {}\nAuthors: {}\nTags: {}\nDate Published: {}",
        report.title,
        report.url.as_deref().unwrap_or(""),
        report.source_domain.as_deref().unwrap_or(""),
        report.authors.join(", "),
        report.tags.join(", "),
        report.date_published.as_deref().unwrap_or("")
    );
    let metadata = serde_json::json!({
        "reportNumber": report.report_number,
        "title": report.title,
        "url": report.url,
    });
    (metadata_chunk, report.plain_text.clone(), metadata)
}

fn classification_chunks(classification: &Classification) -> (String, String, serde_json::Value) {
    let metadata_chunk = format!(
        "Namespace: {}\nNotes: {}\nIncidents: {}",
        classification.namespace,
        classification.notes.as_deref().unwrap_or(""),
        classification
            .incidents
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let body = classification
        .attributes
        .iter()
        .map(|a| format!("{}: {}", a.short_name, a.value_json))
        .collect::<Vec<_>>()
        .join("\n");
    let metadata = serde_json::json!({
        "classificationId": classification.id,
        "namespace": classification.namespace,
    });
    (metadata_chunk, body, metadata)
}
