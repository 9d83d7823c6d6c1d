//! Core data models shared by the sync, indexing, and retrieval pipeline.
//!
//! Documents carry a status that is always a *projection* of two hashes:
//! the hash of the content that was last indexed and the hash currently
//! observed on disk. See [`derive_status`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Indexing status of a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    New,
    Modified,
    Indexed,
    Deleted,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 4] = [
        DocumentStatus::New,
        DocumentStatus::Modified,
        DocumentStatus::Indexed,
        DocumentStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::Modified => "modified",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Deleted => "deleted",
        }
    }

    /// Whether a reindex without explicit filenames should pick this document up.
    pub fn needs_reindex(&self) -> bool {
        matches!(self, DocumentStatus::New | DocumentStatus::Modified)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(DocumentStatus::New),
            "modified" => Ok(DocumentStatus::Modified),
            "indexed" => Ok(DocumentStatus::Indexed),
            "deleted" => Ok(DocumentStatus::Deleted),
            other => anyhow::bail!(
                "invalid document status: '{}'. Must be new, modified, indexed, or deleted.",
                other
            ),
        }
    }
}

/// Compute a document's status from its last-indexed hash and the hash
/// currently on disk (`None` when the file is absent).
///
/// | indexed hash | on disk | status |
/// |---|---|---|
/// | any | absent | `deleted` |
/// | none | present | `new` |
/// | `h1` | `h2 != h1` | `modified` |
/// | `h` | `h` | `indexed` |
pub fn derive_status(indexed_hash: Option<&str>, disk_hash: Option<&str>) -> DocumentStatus {
    match (indexed_hash, disk_hash) {
        (_, None) => DocumentStatus::Deleted,
        (None, Some(_)) => DocumentStatus::New,
        (Some(indexed), Some(current)) if indexed == current => DocumentStatus::Indexed,
        (Some(_), Some(_)) => DocumentStatus::Modified,
    }
}

/// One persisted row per source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Path relative to the document root, `/`-separated. Unique key.
    pub filename: String,
    /// Hash of the content that was last indexed.
    pub content_hash: Option<String>,
    /// Hash last observed on disk.
    pub current_hash: Option<String>,
    pub status: DocumentStatus,
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// A freshly observed document that has never been indexed.
    pub fn observed(filename: &str, disk_hash: &str, at: DateTime<Utc>) -> Self {
        Self {
            filename: filename.to_string(),
            content_hash: None,
            current_hash: Some(disk_hash.to_string()),
            status: DocumentStatus::New,
            indexed_at: None,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Per-status document counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStats {
    pub new: u64,
    pub modified: u64,
    pub indexed: u64,
    pub deleted: u64,
}

impl StatusStats {
    pub fn from_documents<'a>(docs: impl IntoIterator<Item = &'a DocumentRecord>) -> Self {
        let mut stats = Self::default();
        for doc in docs {
            stats.record(doc.status);
        }
        stats
    }

    pub fn record(&mut self, status: DocumentStatus) {
        match status {
            DocumentStatus::New => self.new += 1,
            DocumentStatus::Modified => self.modified += 1,
            DocumentStatus::Indexed => self.indexed += 1,
            DocumentStatus::Deleted => self.deleted += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.new + self.modified + self.indexed + self.deleted
    }
}

/// Chunker output: a segment of a document that is not yet embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkDraft {
    pub content: String,
    /// Breadcrumb of enclosing headings (`"Setup > Install"`), empty if none.
    pub heading_path: String,
    pub chunk_index: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A draft paired with its embedding, ready to be written to the store.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub heading_path: String,
    pub chunk_index: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewChunk {
    pub fn from_draft(draft: ChunkDraft, embedding: Vec<f32>) -> Self {
        Self {
            content: draft.content,
            embedding,
            heading_path: draft.heading_path,
            chunk_index: draft.chunk_index,
            metadata: draft.metadata,
        }
    }
}

/// A chunk as persisted in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub source_file: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A stored chunk with its cosine similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f32,
}

/// Retrieved evidence handed to the answer synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceChunk {
    pub content: String,
    pub source_file: String,
    pub heading_path: String,
    pub chunk_index: i64,
    /// Raw cosine similarity.
    pub score: f32,
    /// Display relevance in `[0, 1]`.
    pub relevance_score: f32,
    /// Bounded prefix of `content`.
    pub preview: String,
}

/// A cited source attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Citation tag used in the prompt (`[1]`, `[2]`, ...).
    pub index: usize,
    pub file: String,
    pub heading: Option<String>,
    pub relevance_score: f32,
    pub content_preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
        }
    }
}
