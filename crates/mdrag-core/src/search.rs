//! Similarity ranking shared by every [`Store`](crate::store::Store) backend.
//!
//! Backends score candidates with cosine similarity and hand them to
//! [`rank`], which applies the threshold, the deterministic ordering, and the
//! `top_k` cut. The retrieval layer then optionally re-ranks with
//! [`mmr_select`] and maps results to [`EvidenceChunk`]s.
//!
//! # Ordering
//!
//! 1. Score, descending.
//! 2. `chunk_index`, ascending.
//! 3. `source_file`, ascending.

use std::cmp::Ordering;

use crate::embedding::cosine_similarity;
use crate::models::{EvidenceChunk, ScoredChunk};

/// Keep candidates scoring at least `threshold`, order them, and truncate to `top_k`.
pub fn rank(mut candidates: Vec<ScoredChunk>, top_k: usize, threshold: f32) -> Vec<ScoredChunk> {
    candidates.retain(|c| c.score >= threshold);
    candidates.sort_by(compare);
    candidates.truncate(top_k);
    candidates
}

fn compare(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        .then_with(|| a.chunk.source_file.cmp(&b.chunk.source_file))
}

/// Maximal Marginal Relevance selection.
///
/// Greedily picks `k` candidates maximizing
/// `λ · sim(query) − (1 − λ) · max sim(already selected)`. The first pick is
/// always the best-scoring candidate; with `lambda = 1.0` the result equals
/// the plain ranking.
pub fn mmr_select(candidates: Vec<ScoredChunk>, k: usize, lambda: f32) -> Vec<ScoredChunk> {
    let mut remaining = candidates;
    remaining.sort_by(compare);
    let mut selected: Vec<ScoredChunk> = Vec::with_capacity(k.min(remaining.len()));

    while selected.len() < k && !remaining.is_empty() {
        let mut best_idx = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (idx, cand) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|s| cosine_similarity(&cand.chunk.embedding, &s.chunk.embedding))
                .fold(0.0f32, f32::max);
            let mmr = lambda * cand.score - (1.0 - lambda) * redundancy;
            // Strict comparison keeps the earlier (better ranked) candidate on ties.
            if mmr > best_score {
                best_score = mmr;
                best_idx = idx;
            }
        }
        selected.push(remaining.remove(best_idx));
    }
    selected
}

/// Display relevance: cosine clamped to `[0, 1]`, rounded to 3 decimals.
pub fn relevance(score: f32) -> f32 {
    (score.clamp(0.0, 1.0) * 1000.0).round() / 1000.0
}

/// First `max_chars` characters of `content`, with `...` appended when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    let mut chars = content.char_indices();
    match chars.nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &content[..byte_idx]),
        None => content.to_string(),
    }
}

/// Map a ranked hit to evidence for the answer synthesizer.
pub fn to_evidence(hit: ScoredChunk, preview_chars: usize) -> EvidenceChunk {
    let preview = preview(&hit.chunk.content, preview_chars);
    EvidenceChunk {
        relevance_score: relevance(hit.score),
        score: hit.score,
        preview,
        content: hit.chunk.content,
        source_file: hit.chunk.source_file,
        heading_path: hit.chunk.heading_path,
        chunk_index: hit.chunk.chunk_index,
    }
}
