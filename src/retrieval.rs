//! Question → evidence.
//!
//! Embeds the question, asks the store for the nearest chunks above the
//! similarity threshold, optionally diversifies them with MMR, and maps the
//! hits to [`EvidenceChunk`]s.

use std::sync::Arc;

use tracing::debug;

use mdrag_core::models::EvidenceChunk;
use mdrag_core::search::{mmr_select, to_evidence};
use mdrag_core::store::Store;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{RagError, Result};

pub struct Retriever {
    store: Arc<dyn Store>,
    embeddings: EmbeddingClient,
    settings: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: EmbeddingClient,
        settings: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalConfig {
        &self.settings
    }

    /// Evidence for `question`, best first. Empty when nothing clears the
    /// threshold.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<EvidenceChunk>> {
        self.retrieve_top(question, self.settings.top_k).await
    }

    /// Like [`retrieve`](Self::retrieve) with an explicit result count.
    pub async fn retrieve_top(&self, question: &str, top_k: usize) -> Result<Vec<EvidenceChunk>> {
        if question.trim().is_empty() {
            return Err(RagError::invalid("question must not be empty"));
        }
        let top_k = top_k.max(1);
        let query_vec = self.embeddings.embed_one(question).await?;
        let threshold = self.settings.similarity_threshold;

        let hits = if self.settings.use_mmr {
            let fetch_k = self.settings.mmr_fetch_k.max(top_k);
            let candidates = self.store.search(&query_vec, fetch_k, threshold).await?;
            mmr_select(candidates, top_k, self.settings.mmr_lambda)
        } else {
            self.store.search(&query_vec, top_k, threshold).await?
        };

        debug!(
            hits = hits.len(),
            top_k,
            threshold,
            mmr = self.settings.use_mmr,
            "retrieved evidence"
        );
        Ok(hits
            .into_iter()
            .map(|hit| to_evidence(hit, self.settings.preview_chars))
            .collect())
    }
}
