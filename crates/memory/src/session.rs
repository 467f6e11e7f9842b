//! In-process conversation history for interactive mode. Never persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub instruction: String,
    pub response: String,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn new(instruction: impl Into<String>, response: impl Into<String>, succeeded: bool) -> Self {
        Self {
            instruction: instruction.into(),
            response: response.into(),
            succeeded,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl SessionState {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a turn, evicting the oldest once full.
    pub fn record(&mut self, turn: Turn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
            tracing::debug!(capacity = self.capacity, "Evicted oldest turn");
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Renders recent turns as prompt context, oldest first. Empty when there is no history.
    pub fn context_prompt(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }

        let mut out = String::from("Previous conversation:\n");
        for turn in &self.turns {
            out.push_str(&format!(
                "User: {}\nAssistant: {}\n",
                preview(&turn.instruction),
                preview(&turn.response)
            ));
        }
        out
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

fn preview(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest_first() {
        let mut session = SessionState::new(2);
        session.record(Turn::new("one", "1", true));
        session.record(Turn::new("two", "2", true));
        session.record(Turn::new("three", "3", false));

        let kept: Vec<&str> = session.turns().map(|t| t.instruction.as_str()).collect();
        assert_eq!(kept, vec!["two", "three"]);
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut session = SessionState::new(0);
        session.record(Turn::new("a", "b", true));
        assert_eq!(session.capacity(), 1);
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_context_prompt() {
        let mut session = SessionState::default();
        assert_eq!(session.context_prompt(), "");

        session.record(Turn::new("what time is it", "It is noon.", true));
        assert_eq!(
            session.context_prompt(),
            "Previous conversation:\nUser: what time is it\nAssistant: It is noon.\n"
        );
    }

    #[test]
    fn test_long_responses_are_shortened() {
        let mut session = SessionState::default();
        session.record(Turn::new("q", "é".repeat(500), true));
        let prompt = session.context_prompt();
        assert!(prompt.contains(&format!("{}...", "é".repeat(200))));
        assert!(!prompt.contains(&"é".repeat(201)));
    }

    #[test]
    fn test_clear() {
        let mut session = SessionState::default();
        session.record(Turn::new("a", "b", true));
        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn test_turn_serializes() {
        let turn = Turn::new("ls", "a.txt", true);
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["instruction"], "ls");
        assert_eq!(json["succeeded"], true);
    }
}
