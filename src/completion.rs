//! Chat completion providers.
//!
//! - **[`OpenAICompleter`]**: any OpenAI-compatible `POST {url}/chat/completions`.
//! - **[`DisabledCompleter`]**: fails every call with a configuration error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use mdrag_core::models::ChatMessage;

use crate::config::CompletionConfig;
use crate::embedding::http_client;
use crate::error::{RagError, Result};
use crate::retry::{send_json, with_retry, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait Completer: Send + Sync {
    fn model_name(&self) -> &str;
    /// One completion for the full message list. Never returns an empty answer.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct DisabledCompleter;

#[async_trait]
impl Completer for DisabledCompleter {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        Err(RagError::configuration("completion provider is disabled"))
    }
}

pub struct OpenAICompleter {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    policy: RetryPolicy,
}

impl OpenAICompleter {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::configuration("completion.model required for openai provider")
        })?;
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
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            policy: config.retry_policy(),
        })
    }
}

#[async_trait]
impl Completer for OpenAICompleter {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages
                .iter()
                .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
                .collect::<Vec<_>>(),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let endpoint = format!("{}/chat/completions", self.url.trim_end_matches('/'));
        let json = with_retry(&self.policy, "OpenAI chat", || {
            let mut request = self.client.post(&endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            send_json(request, "OpenAI chat")
        })
        .await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &Value) -> Result<String> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| {
            RagError::external("Invalid chat response: missing choices[0].message.content")
        })?;
    let content = content.trim();
    if content.is_empty() {
        return Err(RagError::external("completion provider returned an empty answer"));
    }
    Ok(content.to_string())
}

pub fn create_completer(config: &CompletionConfig) -> Result<Arc<dyn Completer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompleter)),
        "openai" => Ok(Arc::new(OpenAICompleter::new(config)?)),
        other => Err(RagError::configuration(format!(
            "Unknown completion provider: {}",
            other
        ))),
    }
}
