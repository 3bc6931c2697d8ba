//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Documents and their chunks live in the `documents` and `chunks` tables
//! (see [`migrate`](crate::migrate)). Vectors are stored as little-endian
//! `f32` BLOBs and scored with brute-force cosine similarity, which is
//! fast enough for a personal vault of a few thousand notes.
//!
//! `upsert` and `delete` each run in one transaction. Under WAL every
//! `SELECT` reads a single committed snapshot, so a concurrent query sees
//! either all old entries of a document or all new ones.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use vault_context_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use vault_context_core::error::{IndexError, IndexResult};
use vault_context_core::index::{rank_and_truncate, QueryFilter, VectorIndex};
use vault_context_core::models::{
    Chunk, IndexEntry, IndexedDocument, Metadata, ScoredEntry,
};

use crate::{db, migrate};

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) and migrate the database at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn stored_dims(&self) -> IndexResult<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM chunks LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        Ok(dims.map(|d| d as usize))
    }
}

fn storage(e: impl std::fmt::Display) -> IndexError {
    IndexError::Storage(e.to_string())
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_metadata(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> IndexedDocument {
    let metadata_json: String = row.get("metadata_json");
    let chunk_count: i64 = row.get("chunk_count");
    IndexedDocument {
        id: row.get("id"),
        title: row.get("title"),
        content_hash: row.get("content_hash"),
        modified_at: ts_from_millis(row.get("modified_at")),
        metadata: parse_metadata(&metadata_json),
        chunk_count: chunk_count as usize,
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(
        &self,
        document: &IndexedDocument,
        entries: Vec<IndexEntry>,
    ) -> IndexResult<()> {
        let other_dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM chunks WHERE document_id != ? LIMIT 1")
                .bind(&document.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage)?;
        let expected = other_dims
            .map(|d| d as usize)
            .or_else(|| entries.first().map(|e| e.vector.len()));
        if let Some(expected) = expected {
            if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: bad.vector.len(),
                });
            }
        }

        let metadata_json = serde_json::to_string(&document.metadata).map_err(storage)?;
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, content_hash, modified_at, metadata_json,
                                   chunk_count, indexed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                content_hash = excluded.content_hash,
                modified_at = excluded.modified_at,
                metadata_json = excluded.metadata_json,
                chunk_count = excluded.chunk_count,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(&document.content_hash)
        .bind(document.modified_at.timestamp_millis())
        .bind(&metadata_json)
        .bind(entries.len() as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, char_start, char_end,
                                    hash, document_hash, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.chunk.id)
            .bind(&document.id)
            .bind(entry.chunk.index as i64)
            .bind(&entry.chunk.text)
            .bind(entry.chunk.char_start as i64)
            .bind(entry.chunk.char_end as i64)
            .bind(&entry.chunk.hash)
            .bind(&entry.document_hash)
            .bind(entry.vector.len() as i64)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn delete(&self, document_id: &str) -> IndexResult<bool> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?
            .rows_affected();
        tx.commit().await.map_err(storage)?;
        Ok(removed > 0)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &QueryFilter,
    ) -> IndexResult<Vec<ScoredEntry>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        if let Some(expected) = self.stored_dims().await? {
            if expected != vector.len() {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        // A single statement reads one snapshot of both tables.
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.char_start, c.char_end,
                   c.hash, c.embedding, d.title, d.modified_at, d.metadata_json
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut metadata_cache: HashMap<String, Metadata> = HashMap::new();
        let mut hits = Vec::new();

        for row in rows {
            let document_id: String = row.get("document_id");
            let modified_at = ts_from_millis(row.get("modified_at"));
            if !filter.admits(&document_id, modified_at) {
                continue;
            }

            let blob: Vec<u8> = row.get("embedding");
            let score = cosine_similarity(vector, &blob_to_vec(&blob));

            let metadata = metadata_cache
                .entry(document_id.clone())
                .or_insert_with(|| parse_metadata(row.get::<&str, _>("metadata_json")))
                .clone();

            let chunk_index: i64 = row.get("chunk_index");
            let char_start: i64 = row.get("char_start");
            let char_end: i64 = row.get("char_end");

            hits.push(ScoredEntry {
                chunk: Chunk {
                    id: row.get("id"),
                    document_id,
                    index: chunk_index as usize,
                    text: row.get("text"),
                    char_start: char_start as usize,
                    char_end: char_end as usize,
                    hash: row.get("hash"),
                },
                score,
                title: row.get("title"),
                modified_at,
                metadata,
            });
        }

        Ok(rank_and_truncate(hits, k))
    }

    async fn count(&self) -> IndexResult<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(n as usize)
    }

    async fn list_document_ids(&self) -> IndexResult<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM documents ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn list_documents(&self) -> IndexResult<Vec<IndexedDocument>> {
        let rows = sqlx::query(
            "SELECT id, title, content_hash, modified_at, metadata_json, chunk_count \
             FROM documents ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn document(&self, document_id: &str) -> IndexResult<Option<IndexedDocument>> {
        let row = sqlx::query(
            "SELECT id, title, content_hash, modified_at, metadata_json, chunk_count \
             FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        Ok(row.as_ref().map(row_to_document))
    }
}
