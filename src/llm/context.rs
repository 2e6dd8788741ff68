use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use strum::Display;

/// Entries kept by default
pub const DEFAULT_HISTORY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of recent messages. The oldest entry goes first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: VecDeque<ConversationMessage>,
    max_messages: usize,
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_messages + 1),
            max_messages,
        }
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::assistant(content));
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.max_messages {
            self.messages.pop_front();
        }
    }

    /// All messages, oldest first
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.iter().cloned().collect()
    }

    /// The last `n` messages, oldest first
    pub fn recent(&self, n: usize) -> Vec<ConversationMessage> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&ConversationMessage> {
        self.messages.back()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Export as JSON for debugging output
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.messages)
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = ConversationHistory::default();
        for i in 0..15 {
            history.add_user_message(format!("question {}", i));
            history.add_assistant_message(format!("answer {}", i));
        }

        assert_eq!(history.len(), 10);
        let messages = history.messages();
        // Pairs 10..15 survive, in order
        for (offset, pair) in messages.chunks(2).enumerate() {
            let i = 10 + offset;
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[0].content, format!("question {}", i));
            assert_eq!(pair[1].role, Role::Assistant);
            assert_eq!(pair[1].content, format!("answer {}", i));
        }
        assert!(!messages.iter().any(|m| m.content == "question 9"));
    }

    #[test]
    fn test_recent() {
        let mut history = ConversationHistory::new(5);
        history.add_user_message("a");
        history.add_assistant_message("b");
        history.add_user_message("c");

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "b");
        assert_eq!(recent[1].content, "c");
        assert_eq!(history.recent(50).len(), 3);
        assert_eq!(history.last().unwrap().content, "c");
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::default();
        history.add_user_message("hello");
        assert!(!history.is_empty());
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_role_names() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        let json = ConversationHistory::default().to_json().unwrap();
        assert_eq!(json, "[]");
    }
}
