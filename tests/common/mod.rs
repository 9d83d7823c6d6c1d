#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use mdrag::completion::Completer;
use mdrag::config::parse_config;
use mdrag::embedding::Embedder;
use mdrag::{Engine, Result};
use mdrag_core::models::ChatMessage;
use mdrag_core::store::memory::InMemoryStore;

const VOCABULARY: [&str; 8] = [
    "install", "cargo", "deploy", "docker", "config", "test", "rust", "api",
];

/// Bag-of-words embedder over a fixed vocabulary.
pub struct KeywordEmbedder;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; VOCABULARY.len()];
    for word in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        if let Some(pos) = VOCABULARY.iter().position(|v| *v == word) {
            vector[pos] += 1.0;
        }
    }
    vector
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        VOCABULARY.len()
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Completer that records every request and answers with a fixed citation.
#[derive(Default)]
pub struct RecordingCompleter {
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl RecordingCompleter {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Vec<ChatMessage> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Completer for RecordingCompleter {
    fn model_name(&self) -> &str {
        "recording"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok("According to the docs, run `cargo install` [1].".to_string())
    }
}

pub const INSTALL_MD: &str = "# Installation\n\nInstall the tool with cargo. \
Run cargo install to install it.\n";

pub const DEPLOY_MD: &str = "# Deployment\n\nDeploy with docker. \
Build the docker image and deploy it.\n";

pub struct TestEnv {
    pub tmp: TempDir,
    pub engine: Arc<Engine>,
    pub completer: Arc<RecordingCompleter>,
}

impl TestEnv {
    pub fn docs(&self) -> std::path::PathBuf {
        self.tmp.path().join("docs")
    }

    pub fn write_doc(&self, name: &str, content: &str) {
        let path = self.docs().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn remove_doc(&self, name: &str) {
        fs::remove_file(self.docs().join(name)).unwrap();
    }
}

pub fn config_toml(root: &Path) -> String {
    format!(
        r#"[db]
path = "{root}/data/mdrag.sqlite"

[documents]
root = "{root}/docs"

[conversation]
max_history_turns = 10
"#,
        root = root.display()
    )
}

/// Engine over an in-memory store with the keyword embedder and a
/// recording completer. Seeds `install.md` and `deploy.md`.
pub fn setup() -> TestEnv {
    let completer = Arc::new(RecordingCompleter::default());
    let mut env = setup_with(
        TempDir::new().unwrap(),
        Arc::new(KeywordEmbedder),
        completer.clone(),
    );
    env.completer = completer;
    env
}

/// Like [`setup`], with caller-supplied providers. `tmp` is taken up front
/// so providers can refer to paths under `docs/`.
pub fn setup_with(
    tmp: TempDir,
    embedder: Arc<dyn Embedder>,
    completer: Arc<dyn Completer>,
) -> TestEnv {
    fs::create_dir_all(tmp.path().join("docs")).unwrap();
    let config = parse_config(&config_toml(tmp.path())).unwrap();

    let engine = Engine::from_parts(config, Arc::new(InMemoryStore::new()), embedder, completer);
    let env = TestEnv {
        tmp,
        engine: Arc::new(engine),
        completer: Arc::new(RecordingCompleter::default()),
    };
    env.write_doc("install.md", INSTALL_MD);
    env.write_doc("deploy.md", DEPLOY_MD);
    env
}
