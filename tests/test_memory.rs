//! Conversation memory scenarios through the public API.

use std::future::{Future, ready};
use std::path::Path;

use murmur::llm::ProviderError;
use murmur::memory::{
    BoundedHistory, ConversationMemory, HistoryStore, PersistentHistory, PersistentSettings, Role, Summarizer,
};

struct Fixed(&'static str);

impl Summarizer for Fixed {
    fn summarize(&self, _transcript: &str) -> impl Future<Output = Result<String, ProviderError>> + Send {
        ready(Ok(self.0.to_string()))
    }
}

fn persistent(db: &Path) -> ConversationMemory<Fixed> {
    let store = HistoryStore::open(db).unwrap();
    let settings = PersistentSettings { token_budget: 100, summarize_threshold: 0.8, restore_messages: 100 };
    ConversationMemory::Persistent(PersistentHistory::open(store, "session-test", settings, Fixed("counting")).unwrap())
}

// 40 chars, 10 estimated tokens
fn line(i: usize) -> String {
    format!("{:<40}", format!("line {i}"))
}

fn alternating(i: usize) -> Role {
    if i % 2 == 0 { Role::User } else { Role::Assistant }
}

#[tokio::test]
async fn bounded_keeps_last_four_of_six() {
    let mut memory: ConversationMemory<Fixed> = ConversationMemory::Bounded(BoundedHistory::new(4));
    for i in 0..6 {
        memory.add_turn(alternating(i), &line(i)).await.unwrap();
    }
    let kept: Vec<_> = memory.turns().iter().map(|t| t.content.clone()).collect();
    assert_eq!(kept, (2..6).map(line).collect::<Vec<_>>());
}

#[tokio::test]
async fn persistent_budget_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("history.db");
    let mut memory = persistent(&db);

    for i in 0..9 {
        memory.add_turn(alternating(i), &line(i)).await.unwrap();
    }

    // 90 > 80 tokens: the oldest 4 turns fold into one summary
    let turns = memory.turns();
    assert_eq!(turns.len(), 6);
    assert_eq!(turns[0].role, Role::Summary);
    assert!(turns[0].content.contains("counting"));
    let suffix: Vec<_> = turns[1..].iter().map(|t| t.content.clone()).collect();
    assert_eq!(suffix, (4..9).map(line).collect::<Vec<_>>());
    assert!(memory.total_tokens() <= 80);

    // the history handed to the model carries the summary as system context
    let history = memory.history();
    assert_eq!(history.len(), 6);
    assert_eq!(history[0].role, murmur::llm::ChatRole::System);
}

#[tokio::test]
async fn restore_yields_same_trailing_turns() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("history.db");

    let before: Vec<(Role, String)> = {
        let mut memory = persistent(&db);
        for i in 0..11 {
            memory.add_turn(alternating(i), &line(i)).await.unwrap();
        }
        memory.turns().iter().map(|t| (t.role, t.content.clone())).collect()
    };

    let after: Vec<(Role, String)> = persistent(&db).turns().iter().map(|t| (t.role, t.content.clone())).collect();
    assert_eq!(after, before);
}

#[tokio::test]
async fn clear_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("history.db");
    {
        let mut memory = persistent(&db);
        memory.add_turn(Role::User, "hello").await.unwrap();
        memory.clear().unwrap();
    }
    assert!(persistent(&db).turns().is_empty());
}
