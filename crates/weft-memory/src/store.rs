use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::MemoryStore;
use weft_core::types::{ChatMessage, Role};

/// SQLite-backed memory persistence.
///
/// Holds turns across runs for a logical conversation session; the in-run
/// windowing contract stays in `MemoryManager`.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::MemoryStore(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        Self::create_schema(&conn)?;

        debug!(path = %path.display(), "Memory store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                scope TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_scope
                ON turns(scope, id);",
        )
        .map_err(|e| WeftError::MemoryStore(e.to_string()))?;
        Ok(())
    }

    fn parse_role(role: &str) -> Role {
        match role {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        }
    }

    fn role_str(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    fn load_sync(&self, scope: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT role, content, timestamp FROM (
                     SELECT id, role, content, timestamp FROM turns
                     WHERE scope = ?1 ORDER BY id DESC LIMIT ?2
                 ) ORDER BY id ASC",
            )
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        let rows = stmt
            .query_map(params![scope, limit as i64], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                let timestamp: String = row.get(2)?;
                Ok((role, content, timestamp))
            })
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        let mut turns = Vec::new();
        for row in rows {
            let (role, content, timestamp) =
                row.map_err(|e| WeftError::MemoryStore(e.to_string()))?;
            turns.push(ChatMessage {
                role: Self::parse_role(&role),
                content,
                timestamp: timestamp.parse::<DateTime<Utc>>().ok(),
            });
        }
        Ok(turns)
    }

    fn append_sync(&self, scope: &str, turns: &[ChatMessage]) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;
        for turn in turns {
            tx.execute(
                "INSERT INTO turns (scope, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![
                    scope,
                    Self::role_str(turn.role),
                    turn.content,
                    turn.timestamp.unwrap_or_else(Utc::now).to_rfc3339(),
                ],
            )
            .map_err(|e| WeftError::MemoryStore(e.to_string()))?;
        }
        tx.commit().map_err(|e| WeftError::MemoryStore(e.to_string()))?;
        Ok(())
    }
}

impl MemoryStore for SqliteMemoryStore {
    fn load(&self, scope: &str, limit: usize) -> BoxFuture<'_, Result<Vec<ChatMessage>>> {
        let scope = scope.to_string();
        Box::pin(async move { self.load_sync(&scope, limit) })
    }

    fn append(&self, scope: &str, turns: &[ChatMessage]) -> BoxFuture<'_, Result<()>> {
        let scope = scope.to_string();
        let turns = turns.to_vec();
        Box::pin(async move { self.append_sync(&scope, &turns) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_load_roundtrip() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store
            .append(
                "session:chat",
                &[ChatMessage::user("hello"), ChatMessage::assistant("hi there")],
            )
            .await
            .unwrap();

        let turns = store.load("session:chat", 10).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].content, "hello");
        assert_eq!(turns[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_load_limit_returns_most_recent() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        for i in 0..6 {
            store
                .append("s", &[ChatMessage::user(format!("turn {}", i))])
                .await
                .unwrap();
        }

        let turns = store.load("s", 3).await.unwrap();
        assert_eq!(turns.len(), 3);
        // Most recent 3, oldest first
        assert_eq!(turns[0].content, "turn 3");
        assert_eq!(turns[2].content, "turn 5");
    }

    #[tokio::test]
    async fn test_scopes_do_not_leak() {
        let store = SqliteMemoryStore::in_memory().unwrap();
        store.append("a", &[ChatMessage::user("one")]).await.unwrap();
        store.append("b", &[ChatMessage::user("two")]).await.unwrap();

        let turns = store.load("a", 10).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "one");
    }

    #[tokio::test]
    async fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        {
            let store = SqliteMemoryStore::open(&path).unwrap();
            store.append("s", &[ChatMessage::user("persisted")]).await.unwrap();
        }
        let store = SqliteMemoryStore::open(&path).unwrap();
        let turns = store.load("s", 10).await.unwrap();
        assert_eq!(turns[0].content, "persisted");
    }
}
