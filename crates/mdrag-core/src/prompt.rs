//! Pure prompt assembly for grounded answers.
//!
//! Everything here is a deterministic function of `(history, evidence,
//! question, budget)`; the app crate owns the completion call.

use std::collections::HashSet;

use crate::models::{ChatMessage, EvidenceChunk, Role, Source, Turn};

/// Instruction sent as the first message of every completion request.
pub const SYSTEM_PROMPT: &str = "You are a documentation assistant. Answer the user's question \
using only the reference documentation provided in the message. Cite the passages you rely on \
with their bracketed numbers, for example [1] or [2][3]. If the documentation does not contain \
the answer, say so plainly instead of guessing. Keep answers concise and use Markdown for lists \
and code.";

/// Bounds on how much prior conversation is replayed into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryBudget {
    /// Maximum number of prior turns (user and assistant messages each count).
    pub max_turns: usize,
    /// Maximum total characters across the replayed turns.
    pub max_chars: usize,
}

/// Keep the most recent turns that fit `budget`, dropping the oldest first.
///
/// Blank turns and non-conversational roles are skipped.
pub fn truncate_history<'a>(history: &'a [Turn], budget: &HistoryBudget) -> Vec<&'a Turn> {
    let mut kept: Vec<&Turn> = Vec::new();
    let mut used = 0usize;
    for turn in history.iter().rev() {
        if turn.role == Role::System || turn.content.trim().is_empty() {
            continue;
        }
        if kept.len() >= budget.max_turns {
            break;
        }
        let len = turn.content.chars().count();
        if used + len > budget.max_chars {
            break;
        }
        used += len;
        kept.push(turn);
    }
    kept.reverse();
    kept
}

/// Render evidence as numbered reference blocks.
///
/// ```text
/// [1] guide.md - Setup > Install (similarity: 0.87)
/// <content>
/// ```
pub fn format_evidence(evidence: &[EvidenceChunk]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let mut header = format!("[{}] {}", i + 1, e.source_file);
            if !e.heading_path.trim().is_empty() {
                header.push_str(" - ");
                header.push_str(e.heading_path.trim());
            }
            format!("{} (similarity: {:.2})\n{}\n", header, e.score, e.content)
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

/// Build the full message list for one completion call.
pub fn build_messages(
    history: &[Turn],
    evidence: &[EvidenceChunk],
    question: &str,
    budget: &HistoryBudget,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::new(Role::System, SYSTEM_PROMPT)];
    for turn in truncate_history(history, budget) {
        messages.push(ChatMessage::new(turn.role, turn.content.clone()));
    }
    let user = format!(
        "### Reference Documentation\n\n{}\n\n### User Question\n\n{}",
        format_evidence(evidence),
        question
    );
    messages.push(ChatMessage::new(Role::User, user));
    messages
}

/// Deduplicate evidence into citable sources keyed by `(file, heading)`.
///
/// The first (highest-ranked) occurrence wins and keeps the citation number
/// it had in [`format_evidence`].
pub fn extract_sources(evidence: &[EvidenceChunk]) -> Vec<Source> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for (i, e) in evidence.iter().enumerate() {
        if !seen.insert((e.source_file.as_str(), e.heading_path.as_str())) {
            continue;
        }
        sources.push(Source {
            index: i + 1,
            file: e.source_file.clone(),
            heading: (!e.heading_path.is_empty()).then(|| e.heading_path.clone()),
            relevance_score: e.relevance_score,
            content_preview: e.preview.clone(),
        });
    }
    sources
}
