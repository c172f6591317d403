//! Token-budgeted history persisted to SQLite.
//!
//! Every turn is written before it is appended in memory. When the estimated
//! token total passes `token_budget * summarize_threshold`, the oldest half
//! of the turns (always leaving at least two) is replaced by one synthetic
//! `summary` turn, in memory and on disk. A failed summarization (model
//! error or the summary rewrite failing to commit) changes nothing; it is
//! retried on the next overflow.

use tracing::{debug, info, warn};

use crate::error::AppError;

use super::store::HistoryStore;
use super::{ConversationTurn, Role, Summarizer};

#[derive(Debug, Clone, Copy)]
pub struct PersistentSettings {
    pub token_budget: usize,
    pub summarize_threshold: f32,
    /// Turns reloaded by [`PersistentHistory::open`].
    pub restore_messages: usize,
}

impl Default for PersistentSettings {
    fn default() -> Self {
        Self {
            token_budget: 4_000,
            summarize_threshold: 0.8,
            restore_messages: 100,
        }
    }
}

#[derive(Debug)]
pub struct PersistentHistory<S> {
    store: HistoryStore,
    session_id: String,
    settings: PersistentSettings,
    summarizer: S,
    turns: Vec<ConversationTurn>,
    // Row id of each entry in `turns`, same order.
    row_ids: Vec<i64>,
}

impl<S: Summarizer> PersistentHistory<S> {
    /// Open `session_id`, replaying its most recent turns from `store`.
    /// Replay does not write rows or trigger summarization.
    pub fn open(
        store: HistoryStore,
        session_id: impl Into<String>,
        settings: PersistentSettings,
        summarizer: S,
    ) -> Result<Self, AppError> {
        let session_id = session_id.into();
        let restored = store.recent(&session_id, settings.restore_messages)?;
        if !restored.is_empty() {
            info!(session = %session_id, turns = restored.len(), "restored conversation history");
        }
        let (row_ids, turns): (Vec<i64>, Vec<ConversationTurn>) = restored.into_iter().map(|r| (r.id, r.turn)).unzip();

        Ok(Self {
            store,
            session_id,
            settings,
            summarizer,
            turns,
            row_ids,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn total_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.approx_token_count).sum()
    }

    /// Persist, append, then summarize if over the threshold.
    pub async fn add_turn(&mut self, role: Role, content: &str) -> Result<(), AppError> {
        let turn = ConversationTurn::new(role, content);
        let id = self.store.insert(&self.session_id, &turn)?;
        self.turns.push(turn);
        self.row_ids.push(id);

        if self.over_threshold() {
            self.summarize_oldest().await?;
        }
        Ok(())
    }

    /// Drop the session, in memory and on disk.
    pub fn clear(&mut self) -> Result<(), AppError> {
        let removed = self.store.clear(&self.session_id)?;
        self.turns.clear();
        self.row_ids.clear();
        debug!(session = %self.session_id, removed, "cleared history");
        Ok(())
    }

    fn over_threshold(&self) -> bool {
        let limit = self.settings.token_budget as f64 * f64::from(self.settings.summarize_threshold);
        self.total_tokens() as f64 > limit
    }

    /// Returns whether the history was compacted. Never fails: the rewrite
    /// runs in one transaction, so a failed commit leaves rows untouched.
    async fn summarize_oldest(&mut self) -> Result<bool, AppError> {
        let len = self.turns.len();
        let n = (len / 2).min(len.saturating_sub(2));
        if n == 0 {
            return Ok(false);
        }

        info!(
            session = %self.session_id,
            used_pct = self.total_tokens() * 100 / self.settings.token_budget.max(1),
            summarizing = n,
            "token budget nearly full, summarizing"
        );

        let transcript = self.turns[..n]
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str().to_uppercase(), t.content))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = match self.summarizer.summarize(&transcript).await {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => {
                warn!("summarization returned nothing, keeping history unchanged");
                return Ok(false);
            }
            Err(e) => {
                warn!(error = %e, "summarization failed, keeping history unchanged");
                return Ok(false);
            }
        };

        let summary = ConversationTurn::at(
            Role::Summary,
            format!("[Summary of earlier conversation: {}]", summary.trim()),
            self.turns[0].created_at,
        );
        let summary_id = match self.store.replace_with_summary(&self.session_id, &self.row_ids[..n], &summary) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "storing summary failed, keeping history unchanged");
                return Ok(false);
            }
        };

        self.turns.drain(..n);
        self.turns.insert(0, summary);
        self.row_ids.drain(..n);
        self.row_ids.insert(0, summary_id);
        debug!(kept = self.turns.len() - 1, tokens = self.total_tokens(), "history compacted");
        Ok(true)
    }
}
