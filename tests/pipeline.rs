mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;

use mdrag::completion::Completer;
use mdrag::embedding::Embedder;
use mdrag::{RagError, Result};
use mdrag_core::hash::hash_bytes;
use mdrag_core::models::{ChatMessage, DocumentStatus, Role};
use mdrag_core::store::Store;

use common::{keyword_vector, setup, setup_with, RecordingCompleter, INSTALL_MD};

/// Keyword embedder whose first call blocks until released.
#[derive(Default)]
struct GatedEmbedder {
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        "gated"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Keyword embedder that edits a document while embedding it.
struct RewritingEmbedder {
    path: PathBuf,
    /// Rewrite on every call instead of only the first.
    always: bool,
    writes: AtomicUsize,
}

#[async_trait]
impl Embedder for RewritingEmbedder {
    fn model_name(&self) -> &str {
        "rewriting"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.always || self.writes.load(Ordering::SeqCst) == 0 {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            fs::write(&self.path, format!("# Installation\n\nInstall with cargo, rev {n}.\n"))?;
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

struct FailingCompleter;

#[async_trait]
impl Completer for FailingCompleter {
    fn model_name(&self) -> &str {
        "failing"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(RagError::external("down"))
    }
}

fn rewriting_env(always: bool) -> (common::TestEnv, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("docs/install.md");
    let embedder = Arc::new(RewritingEmbedder {
        path: path.clone(),
        always,
        writes: AtomicUsize::new(0),
    });
    let env = setup_with(tmp, embedder, Arc::new(RecordingCompleter::default()));
    (env, path)
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let env = setup();
    let first = env.engine.sync().await.unwrap();
    assert_eq!(first.changed, 2);
    assert_eq!(first.stats.new, 2);
    assert!(first.failed.is_empty());

    let second = env.engine.sync().await.unwrap();
    assert_eq!(second.changed, 0);
    assert_eq!(second.stats, first.stats);
    assert_eq!(second.documents, first.documents);
}

#[tokio::test]
async fn test_status_follows_hashes() {
    let env = setup();
    env.engine.sync().await.unwrap();

    let report = env.engine.reindex_selective(&[]).await.unwrap();
    assert_eq!(report.reindexed_count, 2);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.chunk_count, 2);

    let indexed = env.engine.list_documents(Some(DocumentStatus::Indexed)).await.unwrap();
    assert_eq!(indexed.total, 2);
    for doc in &indexed.documents {
        assert_eq!(doc.content_hash, doc.current_hash);
        assert!(doc.indexed_at.is_some());
    }

    env.write_doc("install.md", "# Installation\n\nInstall with cargo only.\n");
    env.remove_doc("deploy.md");
    let report = env.engine.sync().await.unwrap();
    assert_eq!(report.changed, 2);
    assert_eq!(report.stats.modified, 1);
    assert_eq!(report.stats.deleted, 1);

    let install = env.engine.get_document("install.md").await.unwrap();
    assert_eq!(install.record.status, DocumentStatus::Modified);
    assert_ne!(install.record.content_hash, install.record.current_hash);

    // Restoring the indexed content returns the document to indexed.
    env.write_doc("install.md", INSTALL_MD);
    env.engine.sync().await.unwrap();
    let list = env.engine.list_documents(Some(DocumentStatus::Indexed)).await.unwrap();
    assert_eq!(list.total, 1);
    assert_eq!(list.documents[0].filename, "install.md");
}

#[tokio::test]
async fn test_new_file_in_subdirectory() {
    let env = setup();
    env.write_doc("guide/testing.md", "# Testing\n\nRun cargo test.\n");
    env.write_doc("notes.txt", "not markdown");
    let report = env.engine.sync().await.unwrap();
    let names: Vec<&str> = report.documents.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["deploy.md", "guide/testing.md", "install.md"]);
}

#[tokio::test]
async fn test_reindex_reports_unknown_and_deleted_files() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.remove_doc("deploy.md");
    env.engine.sync().await.unwrap();

    let report = env
        .engine
        .reindex_selective(&[
            "install.md".to_string(),
            "deploy.md".to_string(),
            "missing.md".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(report.reindexed_count, 1);
    assert_eq!(report.failed_count, 2);
    assert_eq!(report.failed_files, vec!["deploy.md", "missing.md"]);
    assert!(report.message.contains("2 failed"));
}

#[tokio::test]
async fn test_reindex_with_nothing_pending() {
    let env = setup();
    let report = env.engine.reindex_selective(&[]).await.unwrap();
    assert_eq!(report.reindexed_count, 0);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.message, "No documents need reindexing");
}

#[tokio::test]
async fn test_reindex_all_includes_indexed() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();
    assert_eq!(env.engine.reindex_selective(&[]).await.unwrap().reindexed_count, 0);
    assert_eq!(env.engine.reindex_all().await.unwrap().reindexed_count, 2);
}

#[tokio::test]
async fn test_cleanup_removes_deleted_documents() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let noop = env.engine.cleanup_deleted().await.unwrap();
    assert_eq!(noop.deleted_count, 0);
    assert_eq!(env.engine.stats().await.unwrap().total_chunks, 2);

    env.remove_doc("deploy.md");
    env.engine.sync().await.unwrap();
    let report = env.engine.cleanup_deleted().await.unwrap();
    assert_eq!(report.deleted_count, 1);

    let stats = env.engine.stats().await.unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.files[0].file, "install.md");
    assert_eq!(env.engine.list_documents(None).await.unwrap().total, 1);
}

#[tokio::test]
async fn test_cleanup_skips_reappeared_file() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.remove_doc("deploy.md");
    env.engine.sync().await.unwrap();
    env.write_doc("deploy.md", "# Deployment\n\nBack again.\n");

    let report = env.engine.cleanup_deleted().await.unwrap();
    assert_eq!(report.deleted_count, 0);
    assert_eq!(env.engine.list_documents(None).await.unwrap().total, 2);
}

#[tokio::test]
async fn test_get_document_errors() {
    let env = setup();
    env.engine.sync().await.unwrap();
    assert!(matches!(
        env.engine.get_document("nope.md").await,
        Err(RagError::NotFound(_))
    ));
    env.remove_doc("deploy.md");
    assert!(matches!(
        env.engine.get_document("deploy.md").await,
        Err(RagError::NotFound(_))
    ));
    assert!(matches!(
        env.engine.get_document("../secret.md").await,
        Err(RagError::NotFound(_)) | Err(RagError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_retrieval_respects_threshold() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let hits = env.engine.retriever().retrieve("how do I install with cargo?").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].source_file, "install.md");
    assert_eq!(hits[0].heading_path, "Installation");
    assert!(hits[0].relevance_score >= 0.4 && hits[0].relevance_score <= 1.0);

    let none = env.engine.retriever().retrieve("what is the weather").await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_chat_starts_and_continues_conversation() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let first = env.engine.chat("How do I install with cargo?", None).await.unwrap();
    assert!(!first.conversation_id.is_empty());
    assert_eq!(first.sources.len(), 1);
    assert_eq!(first.sources[0].file, "install.md");
    assert_eq!(first.sources[0].index, 1);
    assert_eq!(env.completer.last_call().len(), 2);

    let second = env
        .engine
        .chat("And with docker deploy?", Some(&first.conversation_id))
        .await
        .unwrap();
    assert_eq!(second.conversation_id, first.conversation_id);

    let call = env.completer.last_call();
    assert_eq!(call.len(), 4);
    assert_eq!(call[1].role, Role::User);
    assert_eq!(call[1].content, "How do I install with cargo?");
    assert_eq!(call[2].role, Role::Assistant);
    assert_eq!(env.engine.conversation_history(&first.conversation_id).len(), 4);
}

#[tokio::test]
async fn test_clear_then_reuse_id_starts_fresh() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let first = env.engine.chat("install with cargo", None).await.unwrap();
    let id = first.conversation_id;
    env.engine.clear_conversation(&id).await.unwrap();
    assert!(matches!(
        env.engine.clear_conversation(&id).await,
        Err(RagError::NotFound(_))
    ));

    let again = env.engine.chat("install with cargo", Some(&id)).await.unwrap();
    assert_eq!(again.conversation_id, id);
    assert_eq!(env.completer.last_call().len(), 2);
    assert_eq!(env.engine.conversation_history(&id).len(), 2);
}

#[tokio::test]
async fn test_no_evidence_returns_fallback_without_completion() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let response = env.engine.chat("what is the weather today", None).await.unwrap();
    assert!(response.sources.is_empty());
    assert_eq!(
        response.answer,
        env.engine.config().answer.no_results_message
    );
    assert_eq!(env.completer.call_count(), 0);
    assert_eq!(env.engine.conversation_history(&response.conversation_id).len(), 2);
}

#[tokio::test]
async fn test_chat_validates_message() {
    let env = setup();
    assert!(matches!(
        env.engine.chat("   ", None).await,
        Err(RagError::InvalidRequest(_))
    ));
    let long = "a".repeat(2001);
    assert!(matches!(
        env.engine.chat(&long, None).await,
        Err(RagError::InvalidRequest(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_search_never_sees_empty_gap_during_reindex() {
    let env = setup();
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let engine = Arc::clone(&env.engine);
    let searcher = tokio::spawn(async move {
        for _ in 0..50 {
            let hits = engine.retriever().retrieve("install cargo").await.unwrap();
            assert_eq!(hits.len(), 1);
            tokio::task::yield_now().await;
        }
    });

    for _ in 0..10 {
        let report = env
            .engine
            .reindex_selective(&["install.md".to_string()])
            .await
            .unwrap();
        assert_eq!(report.reindexed_count, 1);
    }
    searcher.await.unwrap();
}

#[tokio::test]
async fn test_reindex_retries_file_changed_during_embedding() {
    let (env, path) = rewriting_env(false);
    env.engine.sync().await.unwrap();

    let report = env
        .engine
        .reindex_selective(&["install.md".to_string()])
        .await
        .unwrap();
    assert_eq!(report.reindexed_count, 1);
    assert_eq!(report.failed_count, 0);

    let doc = env.engine.get_document("install.md").await.unwrap();
    assert_eq!(doc.record.status, DocumentStatus::Indexed);
    let on_disk = hash_bytes(&fs::read(&path).unwrap());
    assert_eq!(doc.record.content_hash.as_deref(), Some(on_disk.as_str()));
    assert!(doc.content.contains("rev 0"));
}

#[tokio::test]
async fn test_reindex_fails_file_that_keeps_changing() {
    let (env, _path) = rewriting_env(true);
    env.engine.sync().await.unwrap();

    let report = env
        .engine
        .reindex_selective(&["install.md".to_string()])
        .await
        .unwrap();
    assert_eq!(report.reindexed_count, 0);
    assert_eq!(report.failed_count, 1);
    assert_eq!(report.failed_files, vec!["install.md"]);

    let doc = env.engine.get_document("install.md").await.unwrap();
    assert_eq!(doc.record.status, DocumentStatus::New);
    assert!(doc.record.content_hash.is_none());
    assert_eq!(env.engine.stats().await.unwrap().total_chunks, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_waits_for_reindex_of_same_file() {
    let gate = Arc::new(GatedEmbedder::default());
    let env = setup_with(
        TempDir::new().unwrap(),
        gate.clone(),
        Arc::new(RecordingCompleter::default()),
    );
    env.engine.sync().await.unwrap();
    gate.armed.store(true, Ordering::SeqCst);

    let reindex = {
        let engine = Arc::clone(&env.engine);
        tokio::spawn(async move {
            engine
                .reindex_selective(&["install.md".to_string()])
                .await
                .unwrap()
        })
    };
    gate.entered.notified().await;

    let sync = {
        let engine = Arc::clone(&env.engine);
        tokio::spawn(async move { engine.sync().await.unwrap() })
    };
    // Let sync reach install.md while the reindex still holds it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let updated = "# Installation\n\nInstall with cargo, second edition.\n";
    env.write_doc("install.md", updated);
    gate.release.notify_one();

    assert_eq!(reindex.await.unwrap().reindexed_count, 1);
    sync.await.unwrap();

    let doc = env.engine.get_document("install.md").await.unwrap();
    let on_disk = hash_bytes(updated.as_bytes());
    assert_eq!(doc.record.status, DocumentStatus::Indexed);
    assert_eq!(doc.record.content_hash.as_deref(), Some(on_disk.as_str()));
    assert_eq!(doc.record.current_hash.as_deref(), Some(on_disk.as_str()));
}

#[tokio::test]
async fn test_completion_failure_leaves_history_untouched() {
    let env = setup_with(
        TempDir::new().unwrap(),
        Arc::new(common::KeywordEmbedder),
        Arc::new(FailingCompleter),
    );
    env.engine.sync().await.unwrap();
    env.engine.reindex_selective(&[]).await.unwrap();

    let result = env.engine.chat("How do I install with cargo?", Some("c1")).await;
    assert!(matches!(result, Err(RagError::ExternalService(_))));
    assert!(env.engine.conversation_history("c1").is_empty());
    assert!(matches!(
        env.engine.clear_conversation("c1").await,
        Err(RagError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_embedding_dimension_mismatch_is_fatal() {
    let env = setup();
    env.engine.store().set_embedding_dims(3).await.unwrap();

    let err = env.engine.check_embedding_dims().await.unwrap_err();
    assert!(matches!(err, RagError::Configuration(_)));
    assert!(err.to_string().contains("store holds 3-dimensional vectors"));

    env.engine.sync().await.unwrap();
    assert!(matches!(
        env.engine.reindex_selective(&[]).await,
        Err(RagError::Configuration(_))
    ));
    let pending = env.engine.list_documents(Some(DocumentStatus::New)).await.unwrap();
    assert_eq!(pending.total, 2);
}
