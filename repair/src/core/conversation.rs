//! Conversation state for one repair attempt.
//!
//! Turns are append-only. The prefix (system prompt, few-shot exemplars and
//! the task prompt) is pinned; when the total size exceeds the byte budget
//! the oldest unpinned turns are dropped, never the most recent one.

use crate::core::types::Turn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    turns: Vec<Turn>,
    pinned: usize,
    budget_bytes: usize,
    dropped: usize,
}

impl ConversationState {
    /// Start a conversation with `prefix` pinned.
    pub fn new(prefix: Vec<Turn>, budget_bytes: usize) -> Self {
        let pinned = prefix.len();
        Self {
            turns: prefix,
            pinned,
            budget_bytes,
            dropped: 0,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of unpinned turns removed by truncation so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn size_bytes(&self) -> usize {
        self.turns.iter().map(|turn| turn.content.len()).sum()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        self.truncate();
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    fn truncate(&mut self) {
        while self.size_bytes() > self.budget_bytes && self.turns.len() > self.pinned + 1 {
            self.turns.remove(self.pinned);
            self.dropped += 1;
        }
    }
}
