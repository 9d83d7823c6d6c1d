//! Engine wiring.
//!
//! An [`Engine`] owns the store, provider clients, conversation memory and
//! per-document locks. The pipeline operations are implemented on it in
//! their own modules: [`crate::sync`], [`crate::index`],
//! [`crate::documents`], [`crate::assistant`], and [`crate::stats`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use mdrag_core::store::Store;

use crate::assistant::AnswerSynthesizer;
use crate::completion::{create_completer, Completer};
use crate::config::Config;
use crate::conversation::ConversationStore;
use crate::embedding::{create_embedder, Embedder, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::locks::KeyedLocks;
use crate::retrieval::Retriever;
use crate::sqlite_store::SqliteStore;
use crate::{db, migrate};

pub struct Engine {
    pub(crate) config: Arc<Config>,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) embeddings: EmbeddingClient,
    pub(crate) retriever: Retriever,
    pub(crate) synthesizer: AnswerSynthesizer,
    pub(crate) conversations: ConversationStore,
    pub(crate) doc_locks: KeyedLocks,
    completion_model: String,
}

impl Engine {
    /// Open the configured SQLite store, run migrations, build providers,
    /// and verify the store's vector dimension against the configuration.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(pool));
        let embedder = create_embedder(&config.embedding)?;
        let completer = create_completer(&config.completion)?;
        let engine = Self::from_parts(config, store, embedder, completer);
        engine.check_embedding_dims().await?;
        info!(
            db = %engine.config.db.path.display(),
            embedding = engine.embeddings.model_name(),
            completion = engine.completion_model.as_str(),
            "engine ready"
        );
        Ok(engine)
    }

    /// Assemble an engine from explicit parts.
    pub fn from_parts(
        config: Config,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        completer: Arc<dyn Completer>,
    ) -> Self {
        let config = Arc::new(config);
        let embeddings = EmbeddingClient::new(embedder, config.embedding.batch_size);
        let retriever = Retriever::new(store.clone(), embeddings.clone(), config.retrieval.clone());
        let completion_model = completer.model_name().to_string();
        let synthesizer = AnswerSynthesizer::new(
            completer,
            config.conversation.budget(),
            config.answer.no_results_message.clone(),
        );
        Self {
            conversations: ConversationStore::new(
                config.conversation.max_stored_turns,
                config.conversation.max_conversations,
            ),
            config,
            store,
            embeddings,
            retriever,
            synthesizer,
            doc_locks: KeyedLocks::new(),
            completion_model,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Fails with [`RagError::Configuration`] when the store already holds
    /// vectors of a different dimension than the configured provider emits.
    pub async fn check_embedding_dims(&self) -> Result<()> {
        let configured = self.embeddings.dims();
        if configured == 0 {
            return Ok(());
        }
        match self.store.embedding_dims().await? {
            Some(stored) if stored != configured => Err(RagError::configuration(format!(
                "embedding dimension mismatch: store holds {}-dimensional vectors \
                 but embedding.dims is {}",
                stored, configured
            ))),
            _ => Ok(()),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let database = match self.store.chunk_stats().await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        };
        HealthReport {
            status: if database == "ok" { "healthy" } else { "degraded" }.to_string(),
            database,
            embedding: self.embeddings.model_name().to_string(),
            completion: self.completion_model.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub database: String,
    /// Embedding model name, or `disabled`.
    pub embedding: String,
    /// Completion model name, or `disabled`.
    pub completion: String,
    pub version: String,
    pub timestamp: String,
}
