//! In-memory [`Store`] used by tests and embedded callers.
//!
//! State sits behind one `std::sync::RwLock`, so a chunk replacement is a
//! single write-locked swap and readers never see a partial set. Search is
//! brute-force cosine similarity over every stored vector.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::models::{DocumentRecord, DocumentStatus, NewChunk, ScoredChunk, StoredChunk};
use crate::search::rank;

use super::{ChunkStats, FileChunkCount, Store};

#[derive(Default)]
struct State {
    documents: BTreeMap<String, DocumentRecord>,
    chunks: HashMap<String, Vec<StoredChunk>>,
    dims: Option<usize>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<DocumentRecord>> {
        let state = self.read()?;
        Ok(state
            .documents
            .values()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect())
    }

    async fn get_document(&self, filename: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.read()?.documents.get(filename).cloned())
    }

    async fn put_document(&self, doc: &DocumentRecord) -> Result<()> {
        self.write()?
            .documents
            .insert(doc.filename.clone(), doc.clone());
        Ok(())
    }

    async fn remove_document(&self, filename: &str) -> Result<bool> {
        Ok(self.write()?.documents.remove(filename).is_some())
    }

    async fn upsert_chunks(&self, source_file: &str, chunks: &[NewChunk]) -> Result<()> {
        let now = Utc::now();
        let stored: Vec<StoredChunk> = chunks
            .iter()
            .map(|c| StoredChunk {
                id: Uuid::new_v4().to_string(),
                content: c.content.clone(),
                embedding: c.embedding.clone(),
                source_file: source_file.to_string(),
                heading_path: c.heading_path.clone(),
                chunk_index: c.chunk_index,
                metadata: c.metadata.clone(),
                created_at: now,
            })
            .collect();
        let mut state = self.write()?;
        if stored.is_empty() {
            state.chunks.remove(source_file);
        } else {
            state.chunks.insert(source_file.to_string(), stored);
        }
        Ok(())
    }

    async fn delete_chunks(&self, source_file: &str) -> Result<u64> {
        Ok(self
            .write()?
            .chunks
            .remove(source_file)
            .map(|c| c.len() as u64)
            .unwrap_or(0))
    }

    async fn search(
        &self,
        query_vec: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let state = self.read()?;
        let candidates: Vec<ScoredChunk> = state
            .chunks
            .iter()
            .filter(|(file, _)| {
                state
                    .documents
                    .get(*file)
                    .is_none_or(|d| d.status != DocumentStatus::Deleted)
            })
            .flat_map(|(_, chunks)| chunks.iter())
            .map(|c| ScoredChunk {
                score: cosine_similarity(query_vec, &c.embedding),
                chunk: c.clone(),
            })
            .collect();
        Ok(rank(candidates, top_k, threshold))
    }

    async fn chunk_stats(&self) -> Result<ChunkStats> {
        let state = self.read()?;
        let mut files: Vec<FileChunkCount> = state
            .chunks
            .iter()
            .map(|(file, chunks)| FileChunkCount {
                file: file.clone(),
                chunks: chunks.len() as u64,
            })
            .collect();
        files.sort_by(|a, b| a.file.cmp(&b.file));
        Ok(ChunkStats {
            total_chunks: files.iter().map(|f| f.chunks).sum(),
            total_files: files.len() as u64,
            files,
        })
    }

    async fn embedding_dims(&self) -> Result<Option<usize>> {
        Ok(self.read()?.dims)
    }

    async fn set_embedding_dims(&self, dims: usize) -> Result<()> {
        self.write()?.dims = Some(dims);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(index: i64, embedding: Vec<f32>) -> NewChunk {
        NewChunk {
            content: format!("chunk {index}"),
            embedding,
            heading_path: "Intro".to_string(),
            chunk_index: index,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_set() {
        let store = InMemoryStore::new();
        store
            .upsert_chunks("a.md", &[chunk(0, vec![1.0, 0.0]), chunk(1, vec![0.0, 1.0])])
            .await
            .unwrap();
        store
            .upsert_chunks("a.md", &[chunk(0, vec![1.0, 1.0])])
            .await
            .unwrap();
        let stats = store.chunk_stats().await.unwrap();
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.files[0].file, "a.md");
    }

    #[tokio::test]
    async fn test_search_respects_threshold_and_top_k() {
        let store = InMemoryStore::new();
        store
            .upsert_chunks(
                "a.md",
                &[
                    chunk(0, vec![1.0, 0.0]),
                    chunk(1, vec![0.9, 0.1]),
                    chunk(2, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        let hits = store.search(&[1.0, 0.0], 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 0);
        let hits = store.search(&[1.0, 0.0], 1, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_search_skips_deleted_documents() {
        let store = InMemoryStore::new();
        let mut doc = DocumentRecord::observed("gone.md", "h", Utc::now());
        doc.status = DocumentStatus::Deleted;
        store.put_document(&doc).await.unwrap();
        store
            .upsert_chunks("gone.md", &[chunk(0, vec![1.0, 0.0])])
            .await
            .unwrap();
        assert!(store.search(&[1.0, 0.0], 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_documents_and_dims() {
        let store = InMemoryStore::new();
        store
            .put_document(&DocumentRecord::observed("b.md", "h2", Utc::now()))
            .await
            .unwrap();
        store
            .put_document(&DocumentRecord::observed("a.md", "h1", Utc::now()))
            .await
            .unwrap();
        let docs = store.list_documents(None).await.unwrap();
        assert_eq!(docs[0].filename, "a.md");
        assert!(store
            .list_documents(Some(DocumentStatus::Indexed))
            .await
            .unwrap()
            .is_empty());
        assert!(store.remove_document("a.md").await.unwrap());
        assert!(!store.remove_document("a.md").await.unwrap());

        assert_eq!(store.embedding_dims().await.unwrap(), None);
        store.set_embedding_dims(3).await.unwrap();
        assert_eq!(store.embedding_dims().await.unwrap(), Some(3));
        assert_eq!(store.delete_chunks("missing.md").await.unwrap(), 0);
    }
}
