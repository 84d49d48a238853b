//! SQLite pool setup.
//!
//! One pool serves every command and the HTTP server. WAL mode keeps
//! similarity reads from blocking the indexer's chunk writes; the connection
//! ceiling matches the indexer's embedding fan-out so a full indexing run
//! never queues on the pool.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// Matches the default indexing concurrency.
const MAX_CONNECTIONS: u32 = 5;

/// Concurrent chunk writes contend briefly on commit under WAL.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the database at `[db].path`, creating the file and any missing
/// parent directories.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))
}
