//! Entity resolution over the relational store.
//!
//! Maps identifiers recovered from similarity hits back to full domain
//! records: incidents, reports, classifications, and taxonomy definitions.
//! All methods are pure reads and idempotent. The incident-report link is
//! many-to-many, and classifications reference incidents through a JSON id
//! array queried with `json_each` ("any overlap" containment).
//!
//! The resolver is constructed with an injected pool; there is no shared
//! module-level client.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use crate::models::{
    Classification, EvidenceIncident, Incident, Report, ReportExcerpt, TaxonomyDefinition,
};

#[derive(Clone)]
pub struct EntityResolver {
    pool: SqlitePool,
    /// Batch size for id-list lookups against the join table.
    join_batch_size: usize,
}

impl EntityResolver {
    pub fn new(pool: SqlitePool, join_batch_size: usize) -> Self {
        Self {
            pool,
            join_batch_size: join_batch_size.max(1),
        }
    }

    /// Fetch a full incident record, or `None` when the id is unknown.
    pub async fn find_incident(&self, incident_id: i64) -> Result<Option<Incident>> {
        let row = sqlx::query(
            r#"
            SELECT incident_id, title, description, date, editor_notes,
                   editor_similar_incidents, editor_dissimilar_incidents
            FROM incidents WHERE incident_id = ?
            "#,
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let report_rows = sqlx::query(
            "SELECT report_number FROM incident_reports WHERE incident_id = ? ORDER BY report_number ASC",
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        let similar: String = row.get("editor_similar_incidents");
        let dissimilar: String = row.get("editor_dissimilar_incidents");

        Ok(Some(Incident {
            incident_id: row.get("incident_id"),
            title: row.get("title"),
            description: row.get("description"),
            date: row.get("date"),
            editor_notes: row.get("editor_notes"),
            editor_similar_incidents: serde_json::from_str(&similar).unwrap_or_default(),
            editor_dissimilar_incidents: serde_json::from_str(&dissimilar).unwrap_or_default(),
            reports: report_rows.iter().map(|r| r.get("report_number")).collect(),
        }))
    }

    /// Fetch an incident as evidence: optionally with its classifications and
    /// with text for up to `report_text_depth` of its linked reports.
    pub async fn find_incident_by_id(
        &self,
        incident_id: i64,
        include_classifications: bool,
        report_text_depth: usize,
    ) -> Result<Option<EvidenceIncident>> {
        let incident = match self.find_incident(incident_id).await? {
            Some(incident) => incident,
            None => return Ok(None),
        };

        let classifications = if include_classifications {
            Some(self.classifications_for_incident(incident_id).await?)
        } else {
            None
        };

        let reports = if report_text_depth > 0 {
            let mut excerpts = Vec::new();
            for &report_number in incident.reports.iter().take(report_text_depth) {
                if let Some(report) = self.find_report_by_number(report_number).await? {
                    excerpts.push(ReportExcerpt {
                        report_number: report.report_number,
                        title: report.title,
                        text: report.text,
                    });
                }
            }
            Some(excerpts)
        } else {
            None
        };

        Ok(Some(EvidenceIncident {
            incident_id: incident.incident_id,
            title: incident.title,
            description: incident.description,
            classifications,
            reports,
        }))
    }

    pub async fn find_report_by_number(&self, report_number: i64) -> Result<Option<Report>> {
        let row = sqlx::query(
            r#"
            SELECT report_number, title, text, plain_text, url, source_domain,
                   date_published, authors, tags
            FROM reports WHERE report_number = ?
            "#,
        )
        .bind(report_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let authors: String = row.get("authors");
            let tags: String = row.get("tags");
            Report {
                report_number: row.get("report_number"),
                title: row.get("title"),
                text: row.get("text"),
                plain_text: row.get("plain_text"),
                url: row.get("url"),
                source_domain: row.get("source_domain"),
                date_published: row.get("date_published"),
                authors: serde_json::from_str(&authors).unwrap_or_default(),
                tags: serde_json::from_str(&tags).unwrap_or_default(),
            }
        }))
    }

    /// Resolve report numbers to incident ids via the join table, batched to
    /// respect upstream query-size limits. The returned ids are deduplicated
    /// and ordered by the first report that referenced them, so incident
    /// order follows report ranking.
    pub async fn incident_ids_from_report_ids(&self, report_ids: &[i64]) -> Result<Vec<i64>> {
        if report_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_report: HashMap<i64, Vec<i64>> = HashMap::new();

        for batch in report_ids.chunks(self.join_batch_size) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT incident_id, report_number FROM incident_reports \
                 WHERE report_number IN ({}) ORDER BY rowid ASC",
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for &id in batch {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                let report_number: i64 = row.get("report_number");
                let incident_id: i64 = row.get("incident_id");
                by_report.entry(report_number).or_default().push(incident_id);
            }
        }

        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for report_id in report_ids {
            if let Some(incident_ids) = by_report.get(report_id) {
                for &incident_id in incident_ids {
                    if seen.insert(incident_id) {
                        ordered.push(incident_id);
                    }
                }
            }
        }

        Ok(ordered)
    }

    /// Resolve classification ids (from classification-type similarity hits)
    /// to the incident ids listed in each classification's `incidents` array.
    /// Deduplicated, ordered by first appearance.
    pub async fn incident_ids_from_classification_ids(
        &self,
        classification_ids: &[String],
    ) -> Result<Vec<i64>> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();

        for id in classification_ids {
            let row = sqlx::query("SELECT incidents FROM classifications WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(row) = row {
                let incidents_json: String = row.get("incidents");
                let incident_ids: Vec<i64> =
                    serde_json::from_str(&incidents_json).unwrap_or_default();
                for incident_id in incident_ids {
                    if seen.insert(incident_id) {
                        ordered.push(incident_id);
                    }
                }
            }
        }

        Ok(ordered)
    }

    /// Fetch a taxonomy definition. An unknown namespace is an error: a
    /// classification request is meaningless without its taxonomy.
    pub async fn fetch_taxonomy_details(&self, namespace: &str) -> Result<TaxonomyDefinition> {
        let row = sqlx::query("SELECT namespace, description, field_list FROM taxa WHERE namespace = ?")
            .bind(namespace)
            .fetch_optional(&self.pool)
            .await?;

        let row = match row {
            Some(row) => row,
            None => bail!("Taxonomy '{}' not found", namespace),
        };

        let field_list: String = row.get("field_list");
        Ok(TaxonomyDefinition {
            namespace: row.get("namespace"),
            description: row.get("description"),
            field_list: serde_json::from_str(&field_list).unwrap_or_default(),
        })
    }

    /// All classifications whose `incidents` array contains the given id.
    pub async fn classifications_for_incident(
        &self,
        incident_id: i64,
    ) -> Result<Vec<Classification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, namespace, publish, notes, attributes, incidents, reports
            FROM classifications
            WHERE EXISTS (
                SELECT 1 FROM json_each(classifications.incidents)
                WHERE json_each.value = ?
            )
            ORDER BY id ASC
            "#,
        )
        .bind(incident_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(classification_from_row).collect())
    }

    /// First classification of the given namespace for an incident, or
    /// `None`. First-match-wins is the policy for duplicate namespaces.
    pub async fn classification_for_incident(
        &self,
        incident_id: i64,
        namespace: &str,
    ) -> Result<Option<Classification>> {
        let row = sqlx::query(
            r#"
            SELECT id, namespace, publish, notes, attributes, incidents, reports
            FROM classifications
            WHERE namespace = ?
              AND EXISTS (
                SELECT 1 FROM json_each(classifications.incidents)
                WHERE json_each.value = ?
              )
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(namespace)
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(classification_from_row))
    }

    // ============ Enumeration (used by the incremental indexer) ============

    pub async fn all_incident_ids(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT incident_id FROM incidents ORDER BY incident_id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("incident_id")).collect())
    }

    pub async fn all_report_numbers(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT report_number FROM reports ORDER BY report_number ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("report_number")).collect())
    }

    pub async fn all_classification_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT id FROM classifications ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    pub async fn find_classification(&self, id: &str) -> Result<Option<Classification>> {
        let row = sqlx::query(
            "SELECT id, namespace, publish, notes, attributes, incidents, reports \
             FROM classifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(classification_from_row))
    }
}

fn classification_from_row(row: &sqlx::sqlite::SqliteRow) -> Classification {
    let attributes: String = row.get("attributes");
    let incidents: String = row.get("incidents");
    let reports: String = row.get("reports");
    let publish: i64 = row.get("publish");

    Classification {
        id: row.get("id"),
        namespace: row.get("namespace"),
        publish: publish != 0,
        notes: row.get("notes"),
        attributes: serde_json::from_str(&attributes).unwrap_or_default(),
        incidents: serde_json::from_str(&incidents).unwrap_or_default(),
        reports: serde_json::from_str(&reports).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn seeded_resolver() -> EntityResolver {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        sqlx::query(
            "INSERT INTO incidents (incident_id, title, description) VALUES \
             (5, 'Chatbot defamation', 'A chatbot invented quotes.'), \
             (7, 'Facial recognition arrest', NULL), \
             (9, 'Trading glitch', 'Algorithmic sell-off.')",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO reports (report_number, title, text, plain_text) VALUES \
             (10, 'Report ten', 'Full text ten', 'plain ten'), \
             (11, 'Report eleven', 'Full text eleven', 'plain eleven')",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO incident_reports (incident_id, report_number) VALUES \
             (7, 10), (9, 10), (5, 11)",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO taxa (namespace, description, field_list) VALUES \
             ('MIT', 'MIT risk taxonomy', \
              '[{\"short_name\":\"Severity\"},{\"short_name\":\"Harm Type\"}]')",
        )
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO classifications (id, namespace, publish, attributes, incidents) VALUES \
             ('c1', 'MIT', 1, '[{\"short_name\":\"Severity\",\"value_json\":\"\\\"High\\\"\"}]', '[5, 9]'), \
             ('c2', 'CSETv1', 1, '[]', '[5]')",
        )
        .execute(&pool)
        .await
        .unwrap();

        EntityResolver::new(pool, 10)
    }

    #[tokio::test]
    async fn test_unknown_incident_returns_none() {
        let resolver = seeded_resolver().await;
        assert!(resolver.find_incident(999999).await.unwrap().is_none());
        assert!(resolver
            .find_incident_by_id(999999, true, 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_incident_includes_linked_reports() {
        let resolver = seeded_resolver().await;
        let incident = resolver.find_incident(7).await.unwrap().unwrap();
        assert_eq!(incident.title, "Facial recognition arrest");
        assert_eq!(incident.reports, vec![10]);
    }

    #[tokio::test]
    async fn test_find_incident_by_id_attaches_evidence() {
        let resolver = seeded_resolver().await;
        let evidence = resolver.find_incident_by_id(5, true, 1).await.unwrap().unwrap();

        let classifications = evidence.classifications.unwrap();
        assert_eq!(classifications.len(), 2);

        let reports = evidence.reports.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].report_number, 11);
        assert_eq!(reports[0].text, "Full text eleven");
    }

    #[tokio::test]
    async fn test_find_incident_by_id_without_options() {
        let resolver = seeded_resolver().await;
        let evidence = resolver.find_incident_by_id(5, false, 0).await.unwrap().unwrap();
        assert!(evidence.classifications.is_none());
        assert!(evidence.reports.is_none());
    }

    #[tokio::test]
    async fn test_incident_ids_from_report_ids_dedups_and_orders() {
        let resolver = seeded_resolver().await;
        // Report 10 maps to incidents 7 and 9; report 11 maps to 5.
        let ids = resolver.incident_ids_from_report_ids(&[10, 11, 10]).await.unwrap();
        assert_eq!(ids, vec![7, 9, 5]);
    }

    #[tokio::test]
    async fn test_incident_ids_from_report_ids_batches() {
        let resolver = {
            let base = seeded_resolver().await;
            EntityResolver::new(base.pool.clone(), 1)
        };
        let ids = resolver.incident_ids_from_report_ids(&[10, 11]).await.unwrap();
        assert_eq!(ids, vec![7, 9, 5]);
    }

    #[tokio::test]
    async fn test_classification_containment_queries() {
        let resolver = seeded_resolver().await;

        let c = resolver.classification_for_incident(9, "MIT").await.unwrap().unwrap();
        assert_eq!(c.id, "c1");
        assert_eq!(c.incidents, vec![5, 9]);

        assert!(resolver
            .classification_for_incident(7, "MIT")
            .await
            .unwrap()
            .is_none());

        let all = resolver.classifications_for_incident(5).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_incident_ids_from_classification_ids() {
        let resolver = seeded_resolver().await;
        let ids = resolver
            .incident_ids_from_classification_ids(&["c1".to_string(), "c2".to_string()])
            .await
            .unwrap();
        assert_eq!(ids, vec![5, 9]);
    }

    #[tokio::test]
    async fn test_unknown_taxonomy_is_error() {
        let resolver = seeded_resolver().await;
        let err = resolver.fetch_taxonomy_details("NOPE").await.unwrap_err();
        assert!(err.to_string().contains("'NOPE' not found"));

        let taxonomy = resolver.fetch_taxonomy_details("MIT").await.unwrap();
        assert_eq!(taxonomy.field_names(), vec!["Severity", "Harm Type"]);
    }
}
