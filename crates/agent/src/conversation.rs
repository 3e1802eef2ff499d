use std::collections::VecDeque;

use autoquery_core::ConversationTurn;

/// Bounded per-session history of completed question/answer turns.
///
/// Single-writer by contract: the session boundary serializes questions
/// within a session, so appends never race. FIFO eviction keeps the
/// store at its configured capacity.
#[derive(Debug)]
pub struct ConversationStore {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationStore {
    pub fn new(capacity: usize) -> Self {
        Self { turns: VecDeque::with_capacity(capacity.max(1)), capacity: capacity.max(1) }
    }

    /// Appends a completed turn, evicting the oldest when full.
    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The most recent `n` turns in chronological order (most recent
    /// last), cloned as a snapshot for an agent run.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let start = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(start).cloned().collect()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
