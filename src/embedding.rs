//! Embedding providers and the batching client in front of them.
//!
//! - **[`OpenAIEmbedder`]**: any OpenAI-compatible `POST {url}/embeddings`.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `POST {url}/api/embed`.
//! - **[`DisabledEmbedder`]**: fails every call with a configuration error.
//!
//! Providers send exactly one request per batch (with retry, see
//! [`crate::retry`]). [`EmbeddingClient`] splits input into batches and
//! rejects any response whose vector count or dimension is wrong, so a
//! partial batch is never accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};
use crate::retry::{send_json, with_retry, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// Embed one batch in a single provider call, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::configuration("embedding provider is disabled"))
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dims: usize,
    policy: RetryPolicy,
}

impl OpenAIEmbedder {
    /// The API key is read from `api_key_env`; it may be absent only when a
    /// custom `url` points at a server that needs no key.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() && config.url.is_none() {
            return Err(RagError::configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            )));
        }
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            model,
            dims,
            policy: config.retry_policy(),
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let json = with_retry(&self.policy, "OpenAI embeddings", || {
            let mut request = self.client.post(&endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            send_json(request, "OpenAI embeddings")
        })
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::external("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| RagError::external("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    policy: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model,
            dims,
            policy: config.retry_policy(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = with_retry(&self.policy, "Ollama embeddings", || {
            send_json(self.client.post(&endpoint).json(&body), "Ollama embeddings")
        })
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::external("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(parse_vector)
        .collect()
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| RagError::external("Invalid embedding response: embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RagError::external("Invalid embedding response: non-numeric value"))
        })
        .collect()
}

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config.model.clone().ok_or_else(|| {
        RagError::configuration(format!(
            "embedding.model required for {} provider",
            config.provider
        ))
    })?;
    let dims = config.dims.filter(|d| *d > 0).ok_or_else(|| {
        RagError::configuration(format!(
            "embedding.dims required for {} provider",
            config.provider
        ))
    })?;
    Ok((model, dims))
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::configuration(format!("failed to build HTTP client: {}", e)))
}

/// Instantiate the provider named by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => Err(RagError::configuration(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Client ============

/// Batching front-end over an [`Embedder`].
#[derive(Clone)]
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn dims(&self) -> usize {
        self.embedder.dims()
    }

    /// Embed `texts`, returning one vector per input in the same order.
    ///
    /// Blank inputs are sent as a single space.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dims = self.embedder.dims();
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let prepared: Vec<String> = batch
                .iter()
                .map(|t| {
                    if t.trim().is_empty() {
                        " ".to_string()
                    } else {
                        t.clone()
                    }
                })
                .collect();
            let vectors = self.embedder.embed_batch(&prepared).await?;
            if vectors.len() != prepared.len() {
                return Err(RagError::external(format!(
                    "embedding provider returned {} vectors for {} inputs",
                    vectors.len(),
                    prepared.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(RagError::external(format!(
                    "embedding provider returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    dims
                )));
            }
            debug!(batch = prepared.len(), model = self.model_name(), "embedded batch");
            out.extend(vectors);
        }
        Ok(out)
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::external("Empty embedding response"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        dims: usize,
        batches: Mutex<Vec<Vec<String>>>,
        drop_last: bool,
    }

    #[async_trait]
    impl Embedder for Recording {
        fn model_name(&self) -> &str {
            "recording"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.to_vec());
            let mut out: Vec<Vec<f32>> = texts
                .iter()
                .map(|t| vec![t.len() as f32; self.dims])
                .collect();
            if self.drop_last {
                out.pop();
            }
            Ok(out)
        }
    }

    fn recording(dims: usize, drop_last: bool) -> Arc<Recording> {
        Arc::new(Recording {
            dims,
            batches: Mutex::new(Vec::new()),
            drop_last,
        })
    }

    #[tokio::test]
    async fn test_batches_preserve_order() {
        let inner = recording(2, false);
        let client = EmbeddingClient::new(inner.clone(), 2);
        let texts: Vec<String> = ["a", "bb", "ccc", "dddd", "eeeee"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let vectors = client.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(vectors[4], vec![5.0, 5.0]);
        let batches = inner.batches.lock().unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec!["eeeee".to_string()]);
    }

    #[tokio::test]
    async fn test_blank_text_replaced() {
        let inner = recording(1, false);
        let client = EmbeddingClient::new(inner.clone(), 10);
        client.embed(&["".to_string(), "  ".to_string()]).await.unwrap();
        assert_eq!(inner.batches.lock().unwrap()[0], vec![" ", " "]);
    }

    #[tokio::test]
    async fn test_partial_batch_rejected() {
        let client = EmbeddingClient::new(recording(2, true), 10);
        let err = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::ExternalService(_)));
    }

    #[tokio::test]
    async fn test_wrong_dims_rejected() {
        struct Short;
        #[async_trait]
        impl Embedder for Short {
            fn model_name(&self) -> &str {
                "short"
            }
            fn dims(&self) -> usize {
                3
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
            }
        }
        let client = EmbeddingClient::new(Arc::new(Short), 10);
        let err = client.embed_one("x").await.unwrap_err();
        assert!(err.to_string().contains("2-dimensional"));
    }

    #[tokio::test]
    async fn test_disabled_is_configuration_error() {
        let client = EmbeddingClient::new(Arc::new(DisabledEmbedder), 10);
        let err = client.embed_one("x").await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_parse_openai_orders_by_index() {
        let json = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&json!({ "object": "list" })).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let json = json!({ "embeddings": [[0.5, 0.25]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        assert!(parse_ollama_response(&json!({ "embeddings": [["x"]] })).is_err());
    }
}
