//! Grounded question answering and the chat flow.
//!
//! [`AnswerSynthesizer`] turns `(question, history, evidence)` into an answer
//! with cited sources. [`Engine::chat`] wraps it with retrieval and
//! per-conversation memory.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use mdrag_core::models::{EvidenceChunk, Source, Turn};
use mdrag_core::prompt::{build_messages, extract_sources, HistoryBudget};

use crate::completion::Completer;
use crate::engine::Engine;
use crate::error::{RagError, Result};

/// Longest accepted chat message, in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub struct AnswerSynthesizer {
    completer: Arc<dyn Completer>,
    budget: HistoryBudget,
    no_results_message: String,
}

impl AnswerSynthesizer {
    pub fn new(
        completer: Arc<dyn Completer>,
        budget: HistoryBudget,
        no_results_message: String,
    ) -> Self {
        Self {
            completer,
            budget,
            no_results_message,
        }
    }

    /// Without evidence the configured fallback reply is returned and the
    /// completion provider is not called.
    pub async fn answer(
        &self,
        question: &str,
        history: &[Turn],
        evidence: &[EvidenceChunk],
    ) -> Result<Answer> {
        if evidence.is_empty() {
            return Ok(Answer {
                answer: self.no_results_message.clone(),
                sources: Vec::new(),
            });
        }

        let messages = build_messages(history, evidence, question, &self.budget);
        debug!(
            messages = messages.len(),
            evidence = evidence.len(),
            prompt_chars = messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "requesting completion"
        );
        let answer = self.completer.complete(&messages).await?;
        Ok(Answer {
            answer,
            sources: extract_sources(evidence),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub conversation_id: String,
}

impl Engine {
    /// Answer one chat message.
    ///
    /// A missing conversation id starts a new conversation; an id the server
    /// doesn't know is adopted with an empty history. Turns are only
    /// recorded when the whole exchange succeeds.
    pub async fn chat(&self, message: &str, conversation_id: Option<&str>) -> Result<ChatResponse> {
        let message = message.trim();
        let len = message.chars().count();
        if len == 0 {
            return Err(RagError::invalid("message must not be empty"));
        }
        if len > MAX_MESSAGE_CHARS {
            return Err(RagError::invalid(format!(
                "message must be at most {} characters, got {}",
                MAX_MESSAGE_CHARS, len
            )));
        }

        let conversation_id = match conversation_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => Uuid::new_v4().to_string(),
        };

        let _guard = self.conversations.lock(&conversation_id).await;
        let history = self.conversations.history(&conversation_id);
        let evidence = self.retriever.retrieve(message).await?;
        let answer = self.synthesizer.answer(message, &history, &evidence).await?;

        self.conversations.append(
            &conversation_id,
            Turn::user(message),
            Turn::assistant(answer.answer.clone(), answer.sources.clone()),
        );
        info!(
            conversation = %conversation_id,
            evidence = evidence.len(),
            sources = answer.sources.len(),
            "chat turn answered"
        );

        Ok(ChatResponse {
            answer: answer.answer,
            sources: answer.sources,
            conversation_id,
        })
    }

    pub async fn clear_conversation(&self, conversation_id: &str) -> Result<()> {
        if self.conversations.clear(conversation_id).await {
            Ok(())
        } else {
            Err(RagError::not_found(format!(
                "conversation not found: {}",
                conversation_id
            )))
        }
    }

    /// Stored turns of one conversation, oldest first.
    pub fn conversation_history(&self, conversation_id: &str) -> Vec<Turn> {
        self.conversations.history(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mdrag_core::models::ChatMessage;
    use std::sync::Mutex;

    struct Scripted {
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl Completer for Scripted {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok("See [1].".to_string())
        }
    }

    fn evidence(file: &str, heading: &str) -> EvidenceChunk {
        EvidenceChunk {
            content: format!("content of {file}"),
            source_file: file.to_string(),
            heading_path: heading.to_string(),
            chunk_index: 0,
            score: 0.9,
            relevance_score: 0.9,
            preview: format!("content of {file}"),
        }
    }

    fn synthesizer(completer: Arc<Scripted>) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            completer,
            HistoryBudget {
                max_turns: 10,
                max_chars: 8000,
            },
            "nothing found".to_string(),
        )
    }

    #[tokio::test]
    async fn test_no_evidence_skips_completion() {
        let completer = Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
        });
        let answer = synthesizer(completer.clone()).answer("q", &[], &[]).await.unwrap();
        assert_eq!(answer.answer, "nothing found");
        assert!(answer.sources.is_empty());
        assert!(completer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_cites_deduplicated_sources() {
        let completer = Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
        });
        let history = vec![Turn::user("earlier"), Turn::assistant("reply", vec![])];
        let answer = synthesizer(completer.clone())
            .answer(
                "how?",
                &history,
                &[evidence("a.md", "Setup"), evidence("a.md", "Setup"), evidence("b.md", "")],
            )
            .await
            .unwrap();
        assert_eq!(answer.answer, "See [1].");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[1].file, "b.md");

        let calls = completer.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 4);
        assert!(calls[0][3].content.contains("how?"));
    }
}
