//! Snapshot import.
//!
//! Loads a JSON snapshot of incidents, reports, taxonomies, and
//! classifications into the relational store. Imports are upserts keyed on
//! each entity's natural id, so re-importing a newer snapshot refreshes
//! records in place. Incident-report links are derived from each incident's
//! `reports` array inside one transaction with the records themselves.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::path::Path;

use crate::models::{Classification, Incident, Report, TaxonomyDefinition};

#[derive(Debug, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub incidents: Vec<Incident>,
    #[serde(default)]
    pub reports: Vec<Report>,
    #[serde(default)]
    pub taxa: Vec<TaxonomyDefinition>,
    #[serde(default)]
    pub classifications: Vec<Classification>,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub incidents: u64,
    pub reports: u64,
    pub taxa: u64,
    pub classifications: u64,
    pub links: u64,
}

pub async fn import_snapshot(pool: &SqlitePool, path: &Path) -> Result<ImportReport> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid snapshot JSON in {}", path.display()))?;
    import(pool, &snapshot).await
}

pub async fn import(pool: &SqlitePool, snapshot: &Snapshot) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut tx = pool.begin().await?;

    for incident in &snapshot.incidents {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO incidents
                (incident_id, title, description, date, editor_notes,
                 editor_similar_incidents, editor_dissimilar_incidents)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(incident.incident_id)
        .bind(&incident.title)
        .bind(&incident.description)
        .bind(&incident.date)
        .bind(&incident.editor_notes)
        .bind(serde_json::to_string(&incident.editor_similar_incidents)?)
        .bind(serde_json::to_string(&incident.editor_dissimilar_incidents)?)
        .execute(&mut *tx)
        .await?;
        report.incidents += 1;

        for &report_number in &incident.reports {
            let linked = sqlx::query(
                "INSERT OR IGNORE INTO incident_reports (incident_id, report_number) VALUES (?, ?)",
            )
            .bind(incident.incident_id)
            .bind(report_number)
            .execute(&mut *tx)
            .await?;
            report.links += linked.rows_affected();
        }
    }

    for item in &snapshot.reports {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO reports
                (report_number, title, text, plain_text, url, source_domain,
                 date_published, authors, tags)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.report_number)
        .bind(&item.title)
        .bind(&item.text)
        .bind(&item.plain_text)
        .bind(&item.url)
        .bind(&item.source_domain)
        .bind(&item.date_published)
        .bind(serde_json::to_string(&item.authors)?)
        .bind(serde_json::to_string(&item.tags)?)
        .execute(&mut *tx)
        .await?;
        report.reports += 1;
    }

    for taxonomy in &snapshot.taxa {
        sqlx::query(
            "INSERT OR REPLACE INTO taxa (namespace, description, field_list) VALUES (?, ?, ?)",
        )
        .bind(&taxonomy.namespace)
        .bind(&taxonomy.description)
        .bind(serde_json::to_string(&taxonomy.field_list)?)
        .execute(&mut *tx)
        .await?;
        report.taxa += 1;
    }

    for classification in &snapshot.classifications {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO classifications
                (id, namespace, publish, notes, attributes, incidents, reports)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&classification.id)
        .bind(&classification.namespace)
        .bind(classification.publish as i64)
        .bind(&classification.notes)
        .bind(serde_json::to_string(&classification.attributes)?)
        .bind(serde_json::to_string(&classification.incidents)?)
        .bind(serde_json::to_string(&classification.reports)?)
        .execute(&mut *tx)
        .await?;
        report.classifications += 1;
    }

    tx.commit().await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use crate::resolver::EntityResolver;

    fn snapshot_json() -> &'static str {
        r#"{
            "incidents": [
                {"incident_id": 1, "title": "First", "description": "d1", "reports": [10, 11]},
                {"incident_id": 2, "title": "Second", "date": "2023-04-01", "reports": [11]}
            ],
            "reports": [
                {"report_number": 10, "title": "R10", "text": "t", "plain_text": "p",
                 "authors": ["A"], "tags": ["ai"]},
                {"report_number": 11, "title": "R11", "text": "t", "plain_text": "p"}
            ],
            "taxa": [
                {"namespace": "MIT", "field_list": [{"short_name": "Severity"}]}
            ],
            "classifications": [
                {"id": "c1", "namespace": "MIT", "publish": true,
                 "attributes": [{"short_name": "Severity", "value_json": "\"High\""}],
                 "incidents": [1]}
            ]
        }"#
    }

    #[tokio::test]
    async fn test_import_links_and_counts() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let snapshot: Snapshot = serde_json::from_str(snapshot_json()).unwrap();
        let report = import(&pool, &snapshot).await.unwrap();

        assert_eq!(report.incidents, 2);
        assert_eq!(report.reports, 2);
        assert_eq!(report.taxa, 1);
        assert_eq!(report.classifications, 1);
        assert_eq!(report.links, 3);

        let resolver = EntityResolver::new(pool, 10);
        let incident = resolver.find_incident(1).await.unwrap().unwrap();
        assert_eq!(incident.reports, vec![10, 11]);
        let ids = resolver.incident_ids_from_report_ids(&[11]).await.unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_reimport_is_an_upsert() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();

        let mut snapshot: Snapshot = serde_json::from_str(snapshot_json()).unwrap();
        import(&pool, &snapshot).await.unwrap();

        snapshot.incidents[0].title = "First, revised".to_string();
        let report = import(&pool, &snapshot).await.unwrap();
        assert_eq!(report.links, 0);

        let resolver = EntityResolver::new(pool, 10);
        let incident = resolver.find_incident(1).await.unwrap().unwrap();
        assert_eq!(incident.title, "First, revised");
        assert_eq!(incident.reports, vec![10, 11]);
    }
}
