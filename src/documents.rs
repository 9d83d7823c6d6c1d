//! Read-only views over tracked documents.

use serde::Serialize;

use mdrag_core::models::{DocumentRecord, DocumentStatus, StatusStats};

use crate::engine::Engine;
use crate::error::{RagError, Result};
use crate::sync::resolve_path;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentList {
    pub documents: Vec<DocumentRecord>,
    /// Length of `documents` after filtering.
    pub total: usize,
    /// Counts over every tracked document, regardless of the filter.
    pub stats: StatusStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub record: DocumentRecord,
    pub content: String,
}

impl Engine {
    pub async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<DocumentList> {
        let all = self.store.list_documents(None).await?;
        let stats = StatusStats::from_documents(&all);
        let documents: Vec<DocumentRecord> = match status {
            Some(status) => all.into_iter().filter(|d| d.status == status).collect(),
            None => all,
        };
        Ok(DocumentList {
            total: documents.len(),
            documents,
            stats,
        })
    }

    /// One document with its current on-disk content.
    pub async fn get_document(&self, filename: &str) -> Result<DocumentDetail> {
        let record = self
            .store
            .get_document(filename)
            .await?
            .ok_or_else(|| RagError::not_found(format!("document not found: {}", filename)))?;
        let path = resolve_path(&self.config.documents.root, filename)?;
        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RagError::not_found(format!(
                    "document file missing on disk: {}",
                    filename
                )))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(DocumentDetail { record, content })
    }
}
