//! Database statistics and health overview.
//!
//! Quick summary of what has been imported and embedded: entity counts and
//! per-source-type embedding coverage. Used by `aic stats` to check that
//! imports and index runs are keeping up with each other.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;

struct SourceCoverage {
    source_type: &'static str,
    total: i64,
    embedded: i64,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let incidents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incidents")
        .fetch_one(&pool)
        .await?;
    let reports: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reports")
        .fetch_one(&pool)
        .await?;
    let taxa: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM taxa")
        .fetch_one(&pool)
        .await?;
    let classifications: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM classifications")
        .fetch_one(&pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(&pool)
        .await?;

    let mut coverage = vec![
        SourceCoverage {
            source_type: "incident",
            total: incidents,
            embedded: 0,
        },
        SourceCoverage {
            source_type: "report",
            total: reports,
            embedded: 0,
        },
        SourceCoverage {
            source_type: "classification",
            total: classifications,
            embedded: 0,
        },
    ];

    let rows = sqlx::query(
        "SELECT source_type, COUNT(DISTINCT source_id) AS embedded FROM embeddings GROUP BY source_type",
    )
    .fetch_all(&pool)
    .await?;
    for row in rows {
        let source_type: String = row.get("source_type");
        let embedded: i64 = row.get("embedded");
        if let Some(entry) = coverage.iter_mut().find(|c| c.source_type == source_type) {
            entry.embedded = embedded;
        }
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Incident Context — Database Stats");
    println!("=================================");
    println!();
    println!("  Database:         {}", config.db.path.display());
    println!("  Size:             {}", format_bytes(db_size));
    println!();
    println!("  Incidents:        {}", incidents);
    println!("  Reports:          {}", reports);
    println!("  Taxonomies:       {}", taxa);
    println!("  Classifications:  {}", classifications);
    println!("  Embedded chunks:  {}", chunks);
    println!();
    println!("  Embedding coverage:");
    for entry in &coverage {
        let percent = if entry.total > 0 {
            entry.embedded * 100 / entry.total
        } else {
            0
        };
        println!(
            "    {:<16} {} / {} ({}%)",
            entry.source_type, entry.embedded, entry.total, percent
        );
    }

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
