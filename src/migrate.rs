use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            incident_id INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            date TEXT,
            editor_notes TEXT,
            editor_similar_incidents TEXT NOT NULL DEFAULT '[]',
            editor_dissimilar_incidents TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            report_number INTEGER PRIMARY KEY,
            title TEXT NOT NULL,
            text TEXT NOT NULL,
            plain_text TEXT NOT NULL,
            url TEXT,
            source_domain TEXT,
            date_published TEXT,
            authors TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Many-to-many: a report can belong to several incidents and vice versa.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incident_reports (
            incident_id INTEGER NOT NULL REFERENCES incidents(incident_id),
            report_number INTEGER NOT NULL REFERENCES reports(report_number),
            UNIQUE(incident_id, report_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxa (
            namespace TEXT PRIMARY KEY,
            description TEXT,
            field_list TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // `incidents` and `reports` are JSON id arrays queried with json_each;
    // a classification can reference multiple incidents.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            publish INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            attributes TEXT NOT NULL DEFAULT '[]',
            incidents TEXT NOT NULL DEFAULT '[]',
            reports TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The identifying triple (source_type, source_id, chunk_index) is the
    // compatibility-critical uniqueness key; writes are insert-or-ignore.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_text TEXT NOT NULL,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(source_type, source_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_source ON embeddings(source_type, source_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classifications_namespace ON classifications(namespace)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_incident_reports_report ON incident_reports(report_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
