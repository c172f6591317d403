//! Process-lifetime history capped by message count.

use tracing::debug;

use super::{ConversationTurn, Role};

pub const DEFAULT_MAX_MESSAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct BoundedHistory {
    max_messages: usize,
    turns: Vec<ConversationTurn>,
}

impl Default for BoundedHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES)
    }
}

impl BoundedHistory {
    pub fn new(max_messages: usize) -> Self {
        Self { max_messages, turns: Vec::new() }
    }

    pub fn add_turn(&mut self, role: Role, content: &str) {
        self.turns.push(ConversationTurn::new(role, content));
        self.prune();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    // Oldest turns go in pairs so user/assistant adjacency survives. The
    // newest turn is never removed, however small the cap.
    fn prune(&mut self) {
        let len = self.turns.len();
        if len <= self.max_messages {
            return;
        }
        let overflow = len - self.max_messages;
        let remove = (overflow + overflow % 2).min(len - 1);
        if remove == 0 {
            return;
        }
        debug!(remove, had = len, max = self.max_messages, "pruning chat history");
        self.turns.drain(..remove);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(h: &BoundedHistory) -> Vec<&str> {
        h.turns().iter().map(|t| t.content.as_str()).collect()
    }

    #[test]
    fn six_turns_with_cap_four_keeps_last_four() {
        let mut h = BoundedHistory::new(4);
        for (i, role) in [Role::User, Role::Assistant].repeat(3).into_iter().enumerate() {
            h.add_turn(role, &format!("t{}", i + 1));
        }
        assert_eq!(contents(&h), vec!["t3", "t4", "t5", "t6"]);
        assert_eq!(h.turns()[0].role, Role::User);
    }

    #[test]
    fn odd_overflow_rounds_up_to_a_pair() {
        let mut h = BoundedHistory::new(3);
        for i in 1..=4 {
            h.add_turn(Role::User, &format!("t{i}"));
        }
        // 4 > 3: overflow 1 rounds up to 2
        assert_eq!(contents(&h), vec!["t3", "t4"]);
    }

    #[test]
    fn cap_of_one_keeps_newest() {
        let mut h = BoundedHistory::new(1);
        for i in 1..=5 {
            h.add_turn(Role::User, &format!("t{i}"));
            assert_eq!(h.turns().last().unwrap().content, format!("t{i}"));
            assert!(h.turns().len() <= 2);
        }
    }

    #[test]
    fn cap_of_zero_keeps_newest() {
        let mut h = BoundedHistory::new(0);
        h.add_turn(Role::User, "only");
        assert_eq!(contents(&h), vec!["only"]);
        h.add_turn(Role::Assistant, "reply");
        assert_eq!(contents(&h), vec!["reply"]);
    }

    #[test]
    fn under_cap_is_untouched() {
        let mut h = BoundedHistory::default();
        for i in 0..DEFAULT_MAX_MESSAGES {
            h.add_turn(Role::User, &i.to_string());
        }
        assert_eq!(h.turns().len(), DEFAULT_MAX_MESSAGES);
        assert_eq!(h.turns()[0].content, "0");
    }
}
