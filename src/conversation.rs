//! In-process conversation memory.
//!
//! Histories live only as long as the process. Each conversation id has its
//! own async lock so that two turns of the same conversation never
//! interleave, while different conversations run concurrently. The number of
//! retained conversations is capped; the least recently used one is evicted
//! first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use mdrag_core::models::Turn;

use crate::locks::KeyedLocks;

#[derive(Default)]
struct Histories {
    entries: HashMap<String, Conversation>,
    /// Monotonic use counter for LRU eviction.
    clock: u64,
}

struct Conversation {
    turns: Vec<Turn>,
    last_used: u64,
}

pub struct ConversationStore {
    histories: Mutex<Histories>,
    locks: KeyedLocks,
    max_stored_turns: usize,
    max_conversations: usize,
}

impl ConversationStore {
    pub fn new(max_stored_turns: usize, max_conversations: usize) -> Self {
        Self {
            histories: Mutex::new(Histories::default()),
            locks: KeyedLocks::new(),
            max_stored_turns: max_stored_turns.max(2),
            max_conversations: max_conversations.max(1),
        }
    }

    /// Serialize work on one conversation until the guard is dropped.
    pub async fn lock(&self, id: &str) -> OwnedMutexGuard<()> {
        self.locks.lock(id).await
    }

    fn histories(&self) -> MutexGuard<'_, Histories> {
        match self.histories.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot of the stored turns, oldest first. Unknown ids are empty.
    pub fn history(&self, id: &str) -> Vec<Turn> {
        self.histories()
            .entries
            .get(id)
            .map(|c| c.turns.clone())
            .unwrap_or_default()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.histories().entries.contains_key(id)
    }

    /// Record a completed exchange. Past the per-conversation cap the oldest
    /// exchanges are discarded whole, so history always opens with a user turn.
    pub fn append(&self, id: &str, user: Turn, assistant: Turn) {
        let mut histories = self.histories();
        histories.clock += 1;
        let now = histories.clock;

        if !histories.entries.contains_key(id)
            && histories.entries.len() >= self.max_conversations
        {
            let oldest = histories
                .entries
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                debug!(conversation = %oldest, "evicting least recently used conversation");
                histories.entries.remove(&oldest);
            }
        }

        let conversation = histories
            .entries
            .entry(id.to_string())
            .or_insert_with(|| Conversation {
                turns: Vec::new(),
                last_used: now,
            });
        conversation.last_used = now;
        let turns = &mut conversation.turns;
        turns.push(user);
        turns.push(assistant);
        if turns.len() > self.max_stored_turns {
            let excess = (turns.len() - self.max_stored_turns).div_ceil(2) * 2;
            turns.drain(..excess);
        }
    }

    /// Drop a conversation. Waits for any in-flight turn on it to finish.
    /// Returns whether the id was known.
    pub async fn clear(&self, id: &str) -> bool {
        let _guard = self.lock(id).await;
        self.histories().entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.histories().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
