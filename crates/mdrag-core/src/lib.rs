//! # mdrag core
//!
//! Runtime-free logic for mdrag: data models, content hashing, Markdown
//! chunking, vector helpers, ranking, prompt assembly, and the [`Store`]
//! abstraction with an in-memory backend.
//!
//! This crate has no tokio, sqlx, network, or filesystem dependencies;
//! the `mdrag` app crate supplies those.
//!
//! [`Store`]: store::Store

pub mod chunk;
pub mod embedding;
pub mod hash;
pub mod models;
pub mod prompt;
pub mod search;
pub mod store;
