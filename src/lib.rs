//! # mdrag
//!
//! Grounded question answering over a directory of Markdown files.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  sync   ┌──────────────┐ reindex ┌──────────────┐
//! │ Markdown  │───────▶│  documents   │────────▶│ chunk+embed  │
//! │   root    │         │ (status rows)│         │  (SQLite)    │
//! └───────────┘         └──────────────┘         └──────┬───────┘
//!                                                       │ search
//!                                   ┌───────────────────┤
//!                                   ▼                   ▼
//!                              ┌──────────┐       ┌──────────┐
//!                              │   CLI    │       │   HTTP   │
//!                              │ (mdrag)  │       │  (axum)  │
//!                              └──────────┘       └──────────┘
//! ```
//!
//! Pure logic (chunking, hashing, ranking, prompt building, the [`Store`]
//! trait) lives in `mdrag-core`; this crate adds SQLite, HTTP providers,
//! conversation memory, and the CLI/HTTP surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`engine`] | Wiring of store, providers, and locks |
//! | [`sync`] | Filesystem diff and status tracking |
//! | [`index`] | Selective reindex and cleanup |
//! | [`documents`] | Document listing and detail |
//! | [`retrieval`] | Question embedding and nearest-chunk search |
//! | [`assistant`] | Answer synthesis and the chat flow |
//! | [`conversation`] | In-memory conversation histories |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat completion providers |
//! | [`retry`] | Transient-failure retry with backoff |
//! | [`sqlite_store`] | SQLite [`Store`] implementation |
//! | [`server`] | JSON HTTP API |
//! | [`stats`] | Index statistics |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//!
//! [`Store`]: mdrag_core::store::Store

pub mod assistant;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod locks;
pub mod migrate;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod sync;

pub use engine::Engine;
pub use error::{RagError, Result};
