//! Storage abstraction for documents and chunk vectors.
//!
//! The [`Store`] trait is the single persisted resource behind sync,
//! reindex, cleanup, and retrieval. Implementations must make
//! [`upsert_chunks`](Store::upsert_chunks) atomic: a concurrent
//! [`search`](Store::search) observes either the old or the new chunk set
//! for a file, never a mix and never an empty gap.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`list_documents`](Store::list_documents) | All document rows, optionally by status |
//! | [`get_document`](Store::get_document) | One document row |
//! | [`put_document`](Store::put_document) | Insert or replace a document row |
//! | [`remove_document`](Store::remove_document) | Delete a document row |
//! | [`upsert_chunks`](Store::upsert_chunks) | Replace all chunks of a file in one transaction |
//! | [`delete_chunks`](Store::delete_chunks) | Remove all chunks of a file |
//! | [`search`](Store::search) | Cosine search under a threshold |
//! | [`chunk_stats`](Store::chunk_stats) | Chunk totals per file |
//! | [`embedding_dims`](Store::embedding_dims) | Declared vector dimension |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{DocumentRecord, DocumentStatus, NewChunk, ScoredChunk};

/// Chunk count for one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChunkCount {
    pub file: String,
    pub chunks: u64,
}

/// Totals reported by [`Store::chunk_stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkStats {
    pub total_chunks: u64,
    pub total_files: u64,
    /// Sorted by filename.
    pub files: Vec<FileChunkCount>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Document rows sorted by filename, optionally restricted to one status.
    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<DocumentRecord>>;

    async fn get_document(&self, filename: &str) -> Result<Option<DocumentRecord>>;

    /// Insert or replace the row keyed by `doc.filename`.
    async fn put_document(&self, doc: &DocumentRecord) -> Result<()>;

    /// Returns whether a row was removed.
    async fn remove_document(&self, filename: &str) -> Result<bool>;

    /// Atomically replace every chunk of `source_file` with `chunks`.
    ///
    /// Chunk ids are assigned by the store. On failure the previous chunk
    /// set is left intact.
    async fn upsert_chunks(&self, source_file: &str, chunks: &[NewChunk]) -> Result<()>;

    /// Remove every chunk of `source_file`, returning how many were deleted.
    async fn delete_chunks(&self, source_file: &str) -> Result<u64>;

    /// At most `top_k` chunks with cosine similarity `>= threshold`, ranked
    /// by [`search::rank`](crate::search::rank). Chunks of documents whose
    /// status is `deleted` are excluded.
    async fn search(&self, query_vec: &[f32], top_k: usize, threshold: f32)
        -> Result<Vec<ScoredChunk>>;

    async fn chunk_stats(&self) -> Result<ChunkStats>;

    /// Vector dimension recorded by the first indexing run, if any.
    async fn embedding_dims(&self) -> Result<Option<usize>>;

    async fn set_embedding_dims(&self, dims: usize) -> Result<()>;
}
