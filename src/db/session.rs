//! Session repository: one session per run, messages appended per exchange

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::{DbPool, SessionStore, connection};
use crate::Result;
use crate::llm::{ChatMessage, Role};

/// A conversation session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
}

/// Session repository bound to the current run's session
#[derive(Clone)]
pub struct SessionRepo {
    pool: DbPool,
    session: Session,
}

impl SessionRepo {
    /// Open a new session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn start(pool: DbPool) -> Result<Self> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        };

        connection(&pool)?.execute(
            "INSERT INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![session.id, session.started_at.to_rfc3339()],
        )?;

        tracing::debug!(session_id = %session.id, "session started");
        Ok(Self { pool, session })
    }

    /// The session this repository writes to
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Messages recorded in the current session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn current_messages(&self) -> Result<Vec<ChatMessage>> {
        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM messages WHERE session_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map([&self.session.id], row_to_pair)?;
        collect_messages(rows)
    }
}

impl SessionStore for SessionRepo {
    fn append_exchange(&self, user: &str, assistant: &str) -> Result<()> {
        let mut conn = connection(&self.pool)?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for (role, content) in [(Role::User, user), (Role::Assistant, assistant)] {
            tx.execute(
                "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![self.session.id, role.as_str(), content, now],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_recent(&self, max: usize) -> Result<Vec<ChatMessage>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let conn = connection(&self.pool)?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM (
                 SELECT id, role, content FROM messages ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;

        let limit = i64::try_from(max).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], row_to_pair)?;
        let mut messages = collect_messages(rows)?;

        // Never seed history with a dangling assistant reply
        if messages.first().is_some_and(|m| m.role == Role::Assistant) {
            messages.remove(0);
        }

        Ok(messages)
    }
}

fn row_to_pair(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<(String, String)>>,
) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    for row in rows {
        let (role, content) = row?;
        match role.parse::<Role>()? {
            Role::User => messages.push(ChatMessage::user(content)),
            Role::Assistant => messages.push(ChatMessage::assistant(content)),
            Role::System => {}
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[test]
    fn append_and_reload() {
        let pool = init_memory().unwrap();
        let repo = SessionRepo::start(pool).unwrap();

        repo.append_exchange("hello", "hi there").unwrap();
        repo.append_exchange("what's two plus two", "four").unwrap();

        let current = repo.current_messages().unwrap();
        assert_eq!(current.len(), 4);
        assert_eq!(current[0], ChatMessage::user("hello"));
        assert_eq!(current[3], ChatMessage::assistant("four"));
    }

    #[test]
    fn load_recent_spans_sessions_and_starts_with_user() {
        let pool = init_memory().unwrap();
        let first = SessionRepo::start(pool.clone()).unwrap();
        first.append_exchange("one", "uno").unwrap();
        first.append_exchange("two", "dos").unwrap();

        let second = SessionRepo::start(pool).unwrap();
        second.append_exchange("three", "tres").unwrap();

        // Last 5 would start with "uno"; the dangling reply is dropped
        let recent = second.load_recent(5).unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "dos", "three", "tres"]);

        assert!(second.load_recent(0).unwrap().is_empty());
    }
}
