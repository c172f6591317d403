//! Conversation memory.
//!
//! Two variants share the [`ConversationMemory`] front:
//!
//! - [`bounded::BoundedHistory`]: process-lifetime list, pruned by count.
//! - [`persistent::PersistentHistory`]: SQLite-backed, token-budgeted;
//!   overflow is compacted into a single `summary` turn by a [`Summarizer`].
//!
//! Token counts are estimates (`chars / 4`, minimum 1), never authoritative.

pub mod bounded;
pub mod persistent;
pub mod store;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::llm::{ChatMessage, ProviderError};

pub use bounded::BoundedHistory;
pub use persistent::{PersistentHistory, PersistentSettings};
pub use store::HistoryStore;

/// System prompt for the summarization call.
pub const SUMMARY_PROMPT: &str = "You are a summarization assistant. \
    Summarize the following conversation in 3-5 sentences, \
    preserving all important facts, decisions, and context.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Synthetic turn standing in for summarized history.
    Summary,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Summary => "summary",
        }
    }

    /// Parse a stored role string. `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "summary" => Some(Role::Summary),
            _ => None,
        }
    }
}

/// One message in a conversation. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub approx_token_count: usize,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: Role, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let content = content.into();
        Self {
            role,
            approx_token_count: estimate_tokens(&content),
            content,
            created_at,
        }
    }

    /// Summary turns are fed back to the model as system context.
    pub fn to_chat_message(&self) -> ChatMessage {
        match self.role {
            Role::User => ChatMessage::user(self.content.clone()),
            Role::Assistant => ChatMessage::assistant(self.content.clone()),
            Role::Summary => ChatMessage::system(self.content.clone()),
        }
    }
}

/// Cheap token estimate: ~4 characters per token, at least 1.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

/// Produces a short summary of a rendered transcript.
///
/// Implemented by the resource manager so summarization goes through the
/// same backend routing and GPU slot as every other request.
pub trait Summarizer {
    fn summarize(&self, transcript: &str) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

impl<T: Summarizer> Summarizer for Arc<T> {
    fn summarize(&self, transcript: &str) -> impl Future<Output = Result<String, ProviderError>> + Send {
        (**self).summarize(transcript)
    }
}

/// Daily session id, e.g. `voice-2026-10-18`.
pub fn make_session_id(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Local::now().format("%Y-%m-%d"))
}

// ── Front ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConversationMemory<S> {
    Bounded(BoundedHistory),
    Persistent(PersistentHistory<S>),
}

impl<S: Summarizer> ConversationMemory<S> {
    /// Record one turn. Only storage failures are returned; a failed
    /// summarization is logged and leaves the history as it was.
    pub async fn add_turn(&mut self, role: Role, content: &str) -> Result<(), AppError> {
        match self {
            ConversationMemory::Bounded(h) => {
                h.add_turn(role, content);
                Ok(())
            }
            ConversationMemory::Persistent(h) => h.add_turn(role, content).await,
        }
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        match self {
            ConversationMemory::Bounded(h) => h.turns(),
            ConversationMemory::Persistent(h) => h.turns(),
        }
    }

    pub fn clear(&mut self) -> Result<(), AppError> {
        match self {
            ConversationMemory::Bounded(h) => {
                h.clear();
                Ok(())
            }
            ConversationMemory::Persistent(h) => h.clear(),
        }
    }

    pub fn total_tokens(&self) -> usize {
        self.turns().iter().map(|t| t.approx_token_count).sum()
    }

    /// Prior turns as provider messages, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.turns().iter().map(ConversationTurn::to_chat_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoSummary;

    impl Summarizer for NoSummary {
        fn summarize(&self, _transcript: &str) -> impl Future<Output = Result<String, ProviderError>> + Send {
            async { Err(ProviderError::Response("unused".into())) }
        }
    }

    #[test]
    fn token_estimate_floors_at_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        assert_eq!(estimate_tokens(&"x".repeat(40)), 10);
    }

    #[test]
    fn role_parse_accepts_legacy_names() {
        assert_eq!(Role::parse("human"), Some(Role::User));
        assert_eq!(Role::parse("ai"), Some(Role::Assistant));
        assert_eq!(Role::parse("summary"), Some(Role::Summary));
        assert_eq!(Role::parse("tool"), None);
    }

    #[test]
    fn summary_turn_becomes_system_message() {
        let t = ConversationTurn::new(Role::Summary, "[Summary of earlier conversation: x]");
        assert_eq!(t.to_chat_message(), ChatMessage::system("[Summary of earlier conversation: x]"));
    }

    #[test]
    fn session_id_is_daily() {
        let id = make_session_id("voice");
        let date = id.strip_prefix("voice-").unwrap();
        assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok());
    }

    #[tokio::test]
    async fn bounded_front_delegates() {
        let mut m: ConversationMemory<NoSummary> = ConversationMemory::Bounded(BoundedHistory::new(4));
        m.add_turn(Role::User, "hello there").await.unwrap();
        m.add_turn(Role::Assistant, "hi").await.unwrap();
        assert_eq!(m.turns().len(), 2);
        assert_eq!(m.total_tokens(), 2 + 1);
        assert_eq!(m.history()[1], ChatMessage::assistant("hi"));
        m.clear().unwrap();
        assert!(m.turns().is_empty());
    }
}
