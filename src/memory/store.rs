//! SQLite persistence for conversation turns.
//!
//! Each call opens its own connection and commits before returning, so
//! several sessions (or processes) can share one file; SQLite's own locking
//! is the only coordination.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params, params_from_iter};
use tracing::warn;

use crate::error::AppError;

use super::{ConversationTurn, Role};

const SCHEMA_VERSION: i64 = 1;

/// A turn together with its row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTurn {
    pub id: i64,
    pub turn: ConversationTurn,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
}

impl HistoryStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| {
                AppError::Memory(format!("history: cannot create {}: {e}", dir.display()))
            })?;
        }
        let store = Self { db_path: db_path.to_path_buf() };
        store.init_db()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Insert one turn in its own transaction; returns the new row id.
    pub fn insert(&self, session_id: &str, turn: &ConversationTurn) -> Result<i64, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("history: begin insert tx: {e}")))?;
        let id = insert_row(&tx, session_id, turn)?;
        tx.commit()
            .map_err(|e| AppError::Memory(format!("history: commit insert: {e}")))?;
        Ok(id)
    }

    /// The most recent `n` turns of `session_id`, oldest first. Rows with an
    /// unknown role are skipped.
    pub fn recent(&self, session_id: &str, n: usize) -> Result<Vec<StoredTurn>, AppError> {
        let conn = self.open_conn()?;
        // A summary row carries the timestamp of the oldest turn it replaced,
        // so on equal timestamps it sorts ahead of the turns it precedes.
        let mut stmt = conn
            .prepare(
                "SELECT id, role, content, created_at FROM chat_history
                 WHERE session_id = ?1
                 ORDER BY created_at DESC, (role = 'summary') ASC, id DESC
                 LIMIT ?2",
            )
            .map_err(|e| AppError::Memory(format!("history: prepare recent: {e}")))?;

        let rows = stmt
            .query_map(params![session_id, n as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| AppError::Memory(format!("history: query recent: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, role, content, created_at) =
                row.map_err(|e| AppError::Memory(format!("history: map recent row: {e}")))?;
            let Some(role) = Role::parse(&role) else {
                warn!(id, %role, "skipping history row with unknown role");
                continue;
            };
            let created_at = parse_timestamp(&created_at)?;
            out.push(StoredTurn { id, turn: ConversationTurn::at(role, content, created_at) });
        }
        out.reverse();
        Ok(out)
    }

    /// Atomically delete rows `ids` of `session_id` and insert `summary` in
    /// their place. Returns the summary's row id.
    pub fn replace_with_summary(
        &self,
        session_id: &str,
        ids: &[i64],
        summary: &ConversationTurn,
    ) -> Result<i64, AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Memory(format!("history: begin summary tx: {e}")))?;

        if !ids.is_empty() {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "DELETE FROM chat_history WHERE session_id = ? AND id IN ({placeholders})"
            );
            let args = std::iter::once(rusqlite::types::Value::from(session_id.to_string()))
                .chain(ids.iter().map(|id| rusqlite::types::Value::from(*id)));
            tx.execute(&sql, params_from_iter(args))
                .map_err(|e| AppError::Memory(format!("history: delete summarized rows: {e}")))?;
        }
        let id = insert_row(&tx, session_id, summary)?;

        tx.commit()
            .map_err(|e| AppError::Memory(format!("history: commit summary tx: {e}")))?;
        Ok(id)
    }

    /// Delete every row of `session_id`; returns how many were removed.
    pub fn clear(&self, session_id: &str) -> Result<usize, AppError> {
        let conn = self.open_conn()?;
        conn.execute("DELETE FROM chat_history WHERE session_id = ?1", params![session_id])
            .map_err(|e| AppError::Memory(format!("history: clear {session_id}: {e}")))
    }

    pub fn count(&self, session_id: &str) -> Result<usize, AppError> {
        let conn = self.open_conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chat_history WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Memory(format!("history: count {session_id}: {e}")))?;
        Ok(n as usize)
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Memory(format!("history: read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chat_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id TEXT NOT NULL,
                    role TEXT NOT NULL,
                    content TEXT NOT NULL,
                    token_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_session_time
                    ON chat_history(session_id, created_at);

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| AppError::Memory(format!("history: initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(AppError::Memory(format!(
                "history: unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }

        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path)
            .map_err(|e| AppError::Memory(format!("history: open {}: {e}", self.db_path.display())))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Memory(format!("history: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Memory(format!("history: set busy_timeout: {e}")))?;

        Ok(conn)
    }
}

fn insert_row(conn: &Connection, session_id: &str, turn: &ConversationTurn) -> Result<i64, AppError> {
    conn.execute(
        "INSERT INTO chat_history (session_id, role, content, token_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session_id,
            turn.role.as_str(),
            turn.content,
            turn.approx_token_count as i64,
            format_timestamp(&turn.created_at),
        ],
    )
    .map_err(|e| AppError::Memory(format!("history: insert turn: {e}")))?;
    Ok(conn.last_insert_rowid())
}

// Fixed-width UTC so text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AppError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| AppError::Memory(format!("history: bad timestamp '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn make_store() -> (TempDir, HistoryStore) {
        let temp = TempDir::new().expect("tempdir");
        let store = HistoryStore::open(&temp.path().join("data").join("history.db")).expect("open store");
        (temp, store)
    }

    #[test]
    fn insert_and_read_back_in_order() {
        let (_temp, store) = make_store();
        let t0 = Utc::now();
        for (i, role) in [Role::User, Role::Assistant, Role::User].into_iter().enumerate() {
            let turn = ConversationTurn::at(role, format!("m{i}"), t0 + Duration::seconds(i as i64));
            store.insert("s1", &turn).unwrap();
        }
        store.insert("s2", &ConversationTurn::new(Role::User, "other")).unwrap();

        let rows = store.recent("s1", 100).unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2"]);
        assert_eq!(rows[1].turn.role, Role::Assistant);
        assert_eq!(store.count("s1").unwrap(), 3);
        assert_eq!(store.count("s2").unwrap(), 1);
    }

    #[test]
    fn recent_limits_to_newest() {
        let (_temp, store) = make_store();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .insert("s", &ConversationTurn::at(Role::User, format!("m{i}"), t0 + Duration::seconds(i)))
                .unwrap();
        }
        let rows = store.recent("s", 2).unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4"]);
    }

    #[test]
    fn timestamps_round_trip() {
        let (_temp, store) = make_store();
        let turn = ConversationTurn::new(Role::User, "hello");
        store.insert("s", &turn).unwrap();
        let back = &store.recent("s", 1).unwrap()[0].turn;
        assert_eq!(back.created_at.timestamp_micros(), turn.created_at.timestamp_micros());
        assert_eq!(back.approx_token_count, turn.approx_token_count);
    }

    #[test]
    fn summary_replaces_rows_and_sorts_first() {
        let (_temp, store) = make_store();
        let t0 = Utc::now();
        let ids: Vec<i64> = (0..4)
            .map(|i| {
                store
                    .insert("s", &ConversationTurn::at(Role::User, format!("m{i}"), t0 + Duration::seconds(i)))
                    .unwrap()
            })
            .collect();

        let summary = ConversationTurn::at(Role::Summary, "[Summary of earlier conversation: m0 m1]", t0);
        store.replace_with_summary("s", &ids[..2], &summary).unwrap();

        let rows = store.recent("s", 100).unwrap();
        let contents: Vec<_> = rows.iter().map(|r| r.turn.content.as_str()).collect();
        assert_eq!(contents, vec!["[Summary of earlier conversation: m0 m1]", "m2", "m3"]);
        assert_eq!(rows[0].turn.role, Role::Summary);
    }

    #[test]
    fn summary_wins_timestamp_ties() {
        let (_temp, store) = make_store();
        let t0 = Utc::now();
        store.insert("s", &ConversationTurn::at(Role::User, "kept", t0)).unwrap();
        store
            .replace_with_summary("s", &[], &ConversationTurn::at(Role::Summary, "summary", t0))
            .unwrap();
        let rows = store.recent("s", 100).unwrap();
        assert_eq!(rows[0].turn.role, Role::Summary);
        assert_eq!(rows[1].turn.content, "kept");
    }

    #[test]
    fn replace_only_touches_listed_session() {
        let (_temp, store) = make_store();
        let a = store.insert("a", &ConversationTurn::new(Role::User, "a0")).unwrap();
        store.insert("b", &ConversationTurn::new(Role::User, "b0")).unwrap();
        // id of a row in session "a", but scoped to "b": nothing deleted
        store
            .replace_with_summary("b", &[a], &ConversationTurn::new(Role::Summary, "s"))
            .unwrap();
        assert_eq!(store.count("a").unwrap(), 1);
        assert_eq!(store.count("b").unwrap(), 2);
    }

    #[test]
    fn unknown_roles_are_skipped() {
        let (_temp, store) = make_store();
        store.insert("s", &ConversationTurn::new(Role::User, "hi")).unwrap();
        let conn = Connection::open(store.path()).unwrap();
        conn.execute(
            "INSERT INTO chat_history (session_id, role, content, token_count, created_at)
             VALUES ('s', 'tool', 'x', 1, '2020-01-01T00:00:00.000000Z')",
            [],
        )
        .unwrap();

        let rows = store.recent("s", 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].turn.content, "hi");
    }

    #[test]
    fn clear_removes_session_rows() {
        let (_temp, store) = make_store();
        store.insert("s", &ConversationTurn::new(Role::User, "hi")).unwrap();
        store.insert("s", &ConversationTurn::new(Role::Assistant, "hello")).unwrap();
        store.insert("t", &ConversationTurn::new(Role::User, "keep")).unwrap();
        assert_eq!(store.clear("s").unwrap(), 2);
        assert_eq!(store.count("s").unwrap(), 0);
        assert_eq!(store.count("t").unwrap(), 1);
    }

    #[test]
    fn reopen_keeps_schema() {
        let (temp, store) = make_store();
        store.insert("s", &ConversationTurn::new(Role::User, "hi")).unwrap();
        let again = HistoryStore::open(&temp.path().join("data").join("history.db")).unwrap();
        assert_eq!(again.count("s").unwrap(), 1);
    }
}
