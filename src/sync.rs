//! Filesystem sync: diff the document root against stored document rows.
//!
//! Sync only observes. It hashes every matching file, derives each
//! document's status from `(indexed hash, on-disk hash)`, and writes a row
//! only when something changed, so a repeated sync is a no-op. It never
//! chunks or embeds; see [`crate::index`] for that.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use mdrag_core::hash::hash_bytes;
use mdrag_core::models::{derive_status, DocumentRecord, DocumentStatus, StatusStats};

use crate::config::DocumentsConfig;
use crate::engine::Engine;
use crate::error::{RagError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub documents: Vec<DocumentRecord>,
    pub stats: StatusStats,
    /// Rows inserted or updated by this run.
    pub changed: usize,
    /// Files that matched but could not be read.
    pub failed: Vec<String>,
}

/// A matching file under the document root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Root-relative, `/`-separated.
    pub filename: String,
    pub path: PathBuf,
}

impl Engine {
    pub async fn sync(&self) -> Result<SyncReport> {
        let docs_config = self.config.documents.clone();
        let files = tokio::task::spawn_blocking(move || scan_documents(&docs_config))
            .await
            .map_err(|e| RagError::Internal(e.into()))??;

        let mut changed = 0usize;
        let mut failed = Vec::new();
        let mut on_disk: HashSet<String> = HashSet::with_capacity(files.len());

        for file in &files {
            on_disk.insert(file.filename.clone());
            // Read under the lock: a reindex of this file may be in flight.
            let _guard = self.doc_locks.lock(&file.filename).await;
            let bytes = match tokio::fs::read(&file.path).await {
                Ok(b) => b,
                Err(e) => {
                    warn!(file = %file.filename, error = %e, "failed to read document");
                    failed.push(file.filename.clone());
                    continue;
                }
            };
            let disk_hash = hash_bytes(&bytes);
            if self.observe(&file.filename, Some(&disk_hash)).await? {
                changed += 1;
            }
        }

        for doc in self.store.list_documents(None).await? {
            if on_disk.contains(&doc.filename) || doc.status == DocumentStatus::Deleted {
                continue;
            }
            let _guard = self.doc_locks.lock(&doc.filename).await;
            if self.observe(&doc.filename, None).await? {
                changed += 1;
            }
        }

        let documents = self.store.list_documents(None).await?;
        let stats = StatusStats::from_documents(&documents);
        info!(
            files = files.len(),
            changed,
            failed = failed.len(),
            new = stats.new,
            modified = stats.modified,
            indexed = stats.indexed,
            deleted = stats.deleted,
            "sync complete"
        );
        Ok(SyncReport {
            documents,
            stats,
            changed,
            failed,
        })
    }

    /// Record the current on-disk hash for one document. Must be called with
    /// the document's lock held. Returns whether the row was written.
    async fn observe(&self, filename: &str, disk_hash: Option<&str>) -> Result<bool> {
        let now = Utc::now();
        let existing = self.store.get_document(filename).await?;
        let record = match existing {
            None => match disk_hash {
                Some(hash) => DocumentRecord::observed(filename, hash, now),
                None => return Ok(false),
            },
            Some(mut doc) => {
                let status = derive_status(doc.content_hash.as_deref(), disk_hash);
                let current = disk_hash.map(str::to_string);
                if doc.status == status && doc.current_hash == current {
                    return Ok(false);
                }
                doc.status = status;
                doc.current_hash = current;
                doc.updated_at = now;
                doc
            }
        };
        self.store.put_document(&record).await?;
        Ok(true)
    }
}

/// Walk the document root and return matching files sorted by filename.
pub fn scan_documents(config: &DocumentsConfig) -> Result<Vec<SourceFile>> {
    let root = &config.root;
    if !root.is_dir() {
        return Err(RagError::not_found(format!(
            "documents root does not exist: {}",
            root.display()
        )));
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let filename = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&filename) || !include_set.is_match(&filename) {
            continue;
        }
        files.push(SourceFile {
            filename,
            path: path.to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| RagError::configuration(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| RagError::configuration(format!("invalid glob set: {}", e)))
}

/// Map a document filename to its path under `root`, rejecting anything
/// that could escape the root.
pub(crate) fn resolve_path(root: &Path, filename: &str) -> Result<PathBuf> {
    let relative = Path::new(filename);
    let safe = !filename.is_empty()
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(RagError::invalid(format!("invalid document filename: {}", filename)));
    }
    Ok(root.join(relative))
}
