//! Persisted embedding index over SQLite.
//!
//! Each row stores one chunk vector keyed by the unique triple
//! `(source_type, source_id, chunk_index)`. Writes are insert-or-ignore
//! (first write wins) and all rows for one source entity go through a single
//! transaction, so a crashed indexing run never leaves a partial chunk set
//! behind.
//!
//! Similarity scores are cosine similarity: `[-1, 1]`, higher is better,
//! thresholds exclusive. Searches are filtered by embedding model so vectors
//! from incompatible spaces are never compared.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{EmbeddingChunk, SimilarityResult, SourceType};

#[derive(Clone)]
pub struct EmbeddingIndex {
    pool: SqlitePool,
}

impl EmbeddingIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert all chunk rows for one source entity atomically. Duplicate
    /// triples are ignored, never updated. Returns the number of rows
    /// actually written.
    pub async fn insert_chunks(&self, chunks: &[EmbeddingChunk]) -> Result<u64> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in chunks {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO embeddings
                    (source_type, source_id, chunk_index, chunk_text, embedding, model, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk.source_type.as_str())
            .bind(&chunk.source_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(&chunk.model)
            .bind(chunk.metadata.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Similarity search: strictly descending by score, exclusive threshold,
    /// ties broken by insertion order (row id), truncated to `limit`.
    pub async fn search(
        &self,
        query_vec: &[f32],
        model: &str,
        min_score: f32,
        limit: i64,
    ) -> Result<Vec<SimilarityResult>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_type, source_id, chunk_text, embedding, metadata
            FROM embeddings
            WHERE model = ?
            ORDER BY id ASC
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        struct Scored {
            row_id: i64,
            result: SimilarityResult,
        }

        let mut scored: Vec<Scored> = Vec::new();

        for row in &rows {
            let source_type_str: String = row.get("source_type");
            let source_type = match SourceType::parse(&source_type_str) {
                Some(st) => st,
                None => continue,
            };

            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(query_vec, &blob_to_vec(&blob));
            if score <= min_score {
                continue;
            }

            let metadata_json: String = row.get("metadata");
            let metadata =
                serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));

            scored.push(Scored {
                row_id: row.get("id"),
                result: SimilarityResult {
                    source_type,
                    source_id: row.get("source_id"),
                    chunk_text: row.get("chunk_text"),
                    score,
                    metadata,
                },
            });
        }

        scored.sort_by(|a, b| {
            b.result
                .score
                .partial_cmp(&a.result.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.row_id.cmp(&b.row_id))
        });
        scored.truncate(limit.max(0) as usize);

        Ok(scored.into_iter().map(|s| s.result).collect())
    }

    /// All `(source_type, source_id)` pairs with at least one chunk row.
    /// Single query; the incremental indexer diffs against this set.
    pub async fn embedded_ids(&self) -> Result<HashSet<(SourceType, String)>> {
        let rows =
            sqlx::query("SELECT DISTINCT source_type, source_id FROM embeddings")
                .fetch_all(&self.pool)
                .await?;

        let mut ids = HashSet::new();
        for row in &rows {
            let source_type_str: String = row.get("source_type");
            if let Some(st) = SourceType::parse(&source_type_str) {
                ids.insert((st, row.get("source_id")));
            }
        }
        Ok(ids)
    }

    /// Delete every chunk row for one source entity. A full re-embed (new
    /// model or new chunking parameters) deletes and recreates the row set.
    pub async fn delete_source(&self, source_type: SourceType, source_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM embeddings WHERE source_type = ? AND source_id = ?")
                .bind(source_type.as_str())
                .bind(source_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Chunk row count across the whole index.
    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?)
    }
}
