//! The per-session conversation transcript.
//!
//! An append-only, ordered log of turns. One session owns exactly one
//! `Conversation`; it is passed by reference into the chat loop and
//! fully reset by the clear action. Arrival order is the only ordering
//! guarantee.

use crate::types::Turn;

#[derive(Debug, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn. Turns are immutable once appended.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Reset the transcript. The caller is responsible for cancelling
    /// any in-flight turn first.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_append_preserves_arrival_order() {
        let mut conv = Conversation::new();
        conv.push(Turn::user("one"));
        conv.push(Turn::assistant("two"));
        conv.push(Turn::user("three"));

        let texts: Vec<&str> = conv.turns().iter().map(|t| t.display_text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_alternation_after_n_successful_turns() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            conv.push(Turn::user(format!("q{}", i)));
            conv.push(Turn::assistant(format!("a{}", i)));
        }
        let users = conv.turns().iter().filter(|t| t.role == Role::User).count();
        let assistants = conv
            .turns()
            .iter()
            .filter(|t| t.role == Role::Assistant)
            .count();
        assert_eq!(users, 5);
        assert_eq!(assistants, 5);
        for (i, turn) in conv.turns().iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(turn.role, expected);
        }
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut conv = Conversation::new();
        conv.push(Turn::user("hi"));
        conv.push(Turn::assistant("hello"));
        assert_eq!(conv.len(), 2);
        conv.clear();
        assert!(conv.is_empty());
    }
}
