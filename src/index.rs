//! Selective reindexing and cleanup of deleted documents.
//!
//! Reindexing a file chunks its current content, embeds every chunk, and
//! swaps the file's chunk set in one store transaction, so searches running
//! alongside see either the old or the new chunks. Failures are isolated per
//! file and reported in the aggregate [`ReindexReport`].

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use mdrag_core::chunk::chunk_markdown;
use mdrag_core::hash::hash_bytes;
use mdrag_core::models::{DocumentStatus, NewChunk};

use crate::engine::Engine;
use crate::error::{RagError, Result};
use crate::sync::resolve_path;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    pub message: String,
    pub reindexed_count: usize,
    pub failed_count: usize,
    pub failed_files: Vec<String>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub message: String,
    pub deleted_count: usize,
}

impl Engine {
    /// Reindex the named documents. An empty list selects every `new` or
    /// `modified` document.
    pub async fn reindex_selective(&self, filenames: &[String]) -> Result<ReindexReport> {
        let targets: Vec<String> = if filenames.is_empty() {
            self.store
                .list_documents(None)
                .await?
                .into_iter()
                .filter(|d| d.status.needs_reindex())
                .map(|d| d.filename)
                .collect()
        } else {
            let mut seen = HashSet::new();
            filenames
                .iter()
                .filter(|f| seen.insert(f.as_str()))
                .cloned()
                .collect()
        };
        self.reindex_files(&targets).await
    }

    /// Reindex every document that is not marked deleted.
    pub async fn reindex_all(&self) -> Result<ReindexReport> {
        let targets: Vec<String> = self
            .store
            .list_documents(None)
            .await?
            .into_iter()
            .filter(|d| d.status != DocumentStatus::Deleted)
            .map(|d| d.filename)
            .collect();
        self.reindex_files(&targets).await
    }

    async fn reindex_files(&self, filenames: &[String]) -> Result<ReindexReport> {
        if filenames.is_empty() {
            return Ok(ReindexReport {
                message: "No documents need reindexing".to_string(),
                ..Default::default()
            });
        }
        self.check_embedding_dims().await?;

        let mut report = ReindexReport::default();
        for filename in filenames {
            match self.reindex_file(filename).await {
                Ok(chunks) => {
                    report.reindexed_count += 1;
                    report.chunk_count += chunks;
                }
                Err(e) => {
                    warn!(file = %filename, error = %e, "reindex failed");
                    report.failed_count += 1;
                    report.failed_files.push(filename.clone());
                }
            }
        }

        report.message = if report.failed_count == 0 {
            format!(
                "Reindexed {} document(s) into {} chunk(s)",
                report.reindexed_count, report.chunk_count
            )
        } else {
            format!(
                "Reindexed {} document(s) into {} chunk(s); {} failed",
                report.reindexed_count, report.chunk_count, report.failed_count
            )
        };
        info!(
            reindexed = report.reindexed_count,
            failed = report.failed_count,
            chunks = report.chunk_count,
            "reindex complete"
        );
        Ok(report)
    }

    /// Chunk, embed and store one document. Returns the number of chunks.
    async fn reindex_file(&self, filename: &str) -> Result<usize> {
        let _guard = self.doc_locks.lock(filename).await;

        let mut doc = self
            .store
            .get_document(filename)
            .await?
            .ok_or_else(|| RagError::not_found(format!("document not found: {}", filename)))?;
        if doc.status == DocumentStatus::Deleted {
            return Err(RagError::invalid(format!(
                "document is deleted on disk: {}",
                filename
            )));
        }
        let path = resolve_path(&self.config.documents.root, filename)?;
        let params = self.config.chunking.params();

        // A file edited while its chunks were being embedded is retried once.
        for attempt in 0..2 {
            let bytes = tokio::fs::read(&path).await?;
            let hash = hash_bytes(&bytes);
            let text = String::from_utf8_lossy(&bytes);
            let drafts = chunk_markdown(&text, &params);

            let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
            let vectors = if texts.is_empty() {
                Vec::new()
            } else {
                self.embeddings.embed(&texts).await?
            };

            let after = tokio::fs::read(&path).await?;
            if hash_bytes(&after) != hash {
                warn!(file = %filename, attempt, "document changed during reindex");
                continue;
            }

            let chunks: Vec<NewChunk> = drafts
                .into_iter()
                .zip(vectors)
                .map(|(draft, vector)| NewChunk::from_draft(draft, vector))
                .collect();
            self.store.upsert_chunks(filename, &chunks).await?;
            if let Some(first) = chunks.first() {
                if self.store.embedding_dims().await?.is_none() {
                    self.store.set_embedding_dims(first.embedding.len()).await?;
                }
            }

            let now = Utc::now();
            doc.content_hash = Some(hash.clone());
            doc.current_hash = Some(hash);
            doc.status = DocumentStatus::Indexed;
            doc.indexed_at = Some(now);
            doc.updated_at = now;
            self.store.put_document(&doc).await?;
            return Ok(chunks.len());
        }

        Err(RagError::invalid(format!(
            "document kept changing during reindex: {}",
            filename
        )))
    }

    /// Remove chunks and rows of documents marked deleted. Documents whose
    /// file has reappeared are left for the next sync.
    pub async fn cleanup_deleted(&self) -> Result<CleanupReport> {
        let deleted = self
            .store
            .list_documents(Some(DocumentStatus::Deleted))
            .await?;

        let mut deleted_count = 0usize;
        for candidate in deleted {
            let filename = candidate.filename;
            let _guard = self.doc_locks.lock(&filename).await;
            match self.store.get_document(&filename).await? {
                Some(doc) if doc.status == DocumentStatus::Deleted => {}
                _ => continue,
            }
            let on_disk = resolve_path(&self.config.documents.root, &filename)
                .map(|p| p.is_file())
                .unwrap_or(false);
            if on_disk {
                info!(file = %filename, "skipping cleanup, file is back on disk");
                continue;
            }
            let chunks = self.store.delete_chunks(&filename).await?;
            self.store.remove_document(&filename).await?;
            info!(file = %filename, chunks, "removed deleted document");
            deleted_count += 1;
        }

        let message = if deleted_count == 0 {
            "No deleted documents to clean up".to_string()
        } else {
            format!("Removed {} deleted document(s)", deleted_count)
        };
        Ok(CleanupReport {
            message,
            deleted_count,
        })
    }
}
