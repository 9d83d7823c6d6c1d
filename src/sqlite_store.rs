//! SQLite-backed [`Store`] implementation.
//!
//! Embeddings are stored as little-endian `f32` BLOBs and scored in Rust.
//! Chunk replacement runs in one transaction, so WAL readers see either the
//! old set or the new one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mdrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use mdrag_core::models::{DocumentRecord, DocumentStatus, NewChunk, ScoredChunk, StoredChunk};
use mdrag_core::search::rank;
use mdrag_core::store::{ChunkStats, FileChunkCount, Store};

const DIMS_KEY: &str = "embedding_dims";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentRecord> {
    let status: String = row.try_get("status")?;
    let indexed_at: Option<String> = row.try_get("indexed_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;
    Ok(DocumentRecord {
        filename: row.try_get("filename")?,
        content_hash: row.try_get("content_hash")?,
        current_hash: row.try_get("current_hash")?,
        status: status.parse()?,
        indexed_at: indexed_at.as_deref().map(parse_ts).transpose()?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<StoredChunk> {
    let blob: Vec<u8> = row.try_get("embedding")?;
    let id: String = row.try_get("id")?;
    let metadata_json: String = row.try_get("metadata_json")?;
    let metadata = serde_json::from_str(&metadata_json)
        .with_context(|| format!("invalid metadata for chunk {}", id))?;
    let created_at: String = row.try_get("created_at")?;
    Ok(StoredChunk {
        id,
        content: row.try_get("content")?,
        embedding: blob_to_vec(&blob),
        source_file: row.try_get("source_file")?,
        heading_path: row.try_get("heading_path")?,
        chunk_index: row.try_get("chunk_index")?,
        metadata,
        created_at: parse_ts(&created_at)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<DocumentRecord>> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM documents WHERE status = ? ORDER BY filename")
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM documents ORDER BY filename")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_document).collect()
    }

    async fn get_document(&self, filename: &str) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT * FROM documents WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn put_document(&self, doc: &DocumentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (filename, content_hash, current_hash, status,
                                   indexed_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                content_hash = excluded.content_hash,
                current_hash = excluded.current_hash,
                status = excluded.status,
                indexed_at = excluded.indexed_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.filename)
        .bind(&doc.content_hash)
        .bind(&doc.current_hash)
        .bind(doc.status.as_str())
        .bind(doc.indexed_at.map(|t| t.to_rfc3339()))
        .bind(doc.created_at.to_rfc3339())
        .bind(doc.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_document(&self, filename: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE filename = ?")
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_chunks(&self, source_file: &str, chunks: &[NewChunk]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE source_file = ?")
            .bind(source_file)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, content, embedding, source_file, heading_path,
                                    chunk_index, metadata_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&chunk.content)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(source_file)
            .bind(&chunk.heading_path)
            .bind(chunk.chunk_index)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_chunks(&self, source_file: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_file = ?")
            .bind(source_file)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.*
            FROM chunks c
            LEFT JOIN documents d ON d.filename = c.source_file
            WHERE d.status IS NULL OR d.status != 'deleted'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let score = cosine_similarity(query_vec, &chunk.embedding);
            if score >= threshold {
                candidates.push(ScoredChunk { chunk, score });
            }
        }
        Ok(rank(candidates, top_k, threshold))
    }

    async fn chunk_stats(&self) -> Result<ChunkStats> {
        let rows = sqlx::query(
            "SELECT source_file, COUNT(*) AS n FROM chunks GROUP BY source_file ORDER BY source_file",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut files = Vec::with_capacity(rows.len());
        for row in &rows {
            let n: i64 = row.try_get("n")?;
            files.push(FileChunkCount {
                file: row.try_get("source_file")?,
                chunks: n as u64,
            });
        }
        Ok(ChunkStats {
            total_chunks: files.iter().map(|f| f.chunks).sum(),
            total_files: files.len() as u64,
            files,
        })
    }

    async fn embedding_dims(&self) -> Result<Option<usize>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM store_meta WHERE key = ?")
            .bind(DIMS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        value
            .map(|v| {
                v.parse::<usize>()
                    .with_context(|| format!("invalid {} in store_meta: {}", DIMS_KEY, v))
            })
            .transpose()
    }

    async fn set_embedding_dims(&self, dims: usize) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO store_meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(DIMS_KEY)
        .bind(dims.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
