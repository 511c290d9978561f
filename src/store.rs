//! Durable storage behind a narrow trait.
//!
//! [`ChatStore`] is the seam between the core and its store of record:
//! document metadata rows and the append-only chat log. The shipped
//! implementation is SQLite via sqlx; the trait keeps it swappable for a
//! hosted database without touching the orchestration code.
//!
//! The chat log is authoritative for conversation history; the in-process
//! [`ChatMemory`](crate::memory::ChatMemory) is a bounded read-through
//! cache over it.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::Config;
use crate::models::DocumentRecord;

/// A persisted question/answer pair, oldest-first when returned in a batch.
#[derive(Debug, Clone)]
pub struct ChatRow {
    pub question: String,
    pub answer: String,
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a document metadata record and return its id.
    async fn insert_document(&self, user_id: &str, filename: &str) -> Result<i64>;

    async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRecord>>;

    /// Delete a document's metadata record. Stored vectors are not purged;
    /// the index keeps serving them until a rebuild.
    async fn delete_document(&self, user_id: &str, filename: &str) -> Result<()>;

    /// Append one chat turn to the durable log.
    async fn save_chat(
        &self,
        user_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<()>;

    /// The user's most recent turns, optionally scoped to one session,
    /// returned in chronological order (the query runs newest-first and
    /// is reversed before returning).
    async fn load_history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatRow>>;

    /// Remove every chat row belonging to a session.
    async fn delete_session_chats(&self, user_id: &str, session_id: &str) -> Result<()>;
}

// ============ SQLite implementation ============

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            sources_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_user_id ON documents(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_user_id ON chats(user_id, created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_session_id ON chats(session_id)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn insert_document(&self, user_id: &str, filename: &str) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO documents (user_id, filename, created_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(filename)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_documents(&self, user_id: &str) -> Result<Vec<DocumentRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, filename, created_at FROM documents \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| DocumentRecord {
                id: row.get("id"),
                user_id: row.get("user_id"),
                filename: row.get("filename"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn delete_document(&self, user_id: &str, filename: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE user_id = ? AND filename = ?")
            .bind(user_id)
            .bind(filename)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_chat(
        &self,
        user_id: &str,
        session_id: &str,
        question: &str,
        answer: &str,
        sources: &[String],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chats (user_id, session_id, question, answer, sources_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(session_id)
        .bind(question)
        .bind(answer)
        .bind(serde_json::to_string(sources)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_history(
        &self,
        user_id: &str,
        session_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ChatRow>> {
        let rows = match session_id {
            Some(sid) => {
                sqlx::query(
                    "SELECT question, answer FROM chats \
                     WHERE user_id = ? AND session_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(sid)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT question, answer FROM chats \
                     WHERE user_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        // Newest-first from the query; reverse to chronological.
        let mut history: Vec<ChatRow> = rows
            .iter()
            .map(|row| ChatRow {
                question: row.get("question"),
                answer: row.get("answer"),
            })
            .collect();
        history.reverse();
        Ok(history)
    }

    async fn delete_session_chats(&self, user_id: &str, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM chats WHERE user_id = ? AND session_id = ?")
            .bind(user_id)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}/test.sqlite", dir.path().display()))
                .unwrap()
                .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        (dir, SqliteStore::new(pool))
    }

    #[tokio::test]
    async fn test_document_crud() {
        let (_dir, store) = test_store().await;

        let id = store.insert_document("u1", "report.pdf").await.unwrap();
        assert!(id > 0);
        store.insert_document("u2", "other.txt").await.unwrap();

        let docs = store.list_documents("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].filename, "report.pdf");
        assert_eq!(docs[0].user_id, "u1");

        store.delete_document("u1", "report.pdf").await.unwrap();
        assert!(store.list_documents("u1").await.unwrap().is_empty());
        // Other user untouched.
        assert_eq!(store.list_documents("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chat_history_chronological_and_bounded() {
        let (_dir, store) = test_store().await;

        for i in 0..4 {
            store
                .save_chat("u1", "s1", &format!("q{}", i), &format!("a{}", i), &[])
                .await
                .unwrap();
        }

        let history = store.load_history("u1", Some("s1"), 3).await.unwrap();
        assert_eq!(history.len(), 3);
        // The 3 most recent turns, oldest first.
        assert_eq!(history[0].question, "q1");
        assert_eq!(history[2].question, "q3");
    }

    #[tokio::test]
    async fn test_history_scoped_by_session_and_user() {
        let (_dir, store) = test_store().await;

        store.save_chat("u1", "s1", "q-s1", "a", &[]).await.unwrap();
        store.save_chat("u1", "s2", "q-s2", "a", &[]).await.unwrap();
        store.save_chat("u2", "s1", "q-u2", "a", &[]).await.unwrap();

        let s1 = store.load_history("u1", Some("s1"), 10).await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].question, "q-s1");

        let all = store.load_history("u1", None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_session_chats() {
        let (_dir, store) = test_store().await;

        store.save_chat("u1", "s1", "q", "a", &[]).await.unwrap();
        store.save_chat("u1", "s2", "q", "a", &[]).await.unwrap();
        store.delete_session_chats("u1", "s1").await.unwrap();

        assert!(store
            .load_history("u1", Some("s1"), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store.load_history("u1", Some("s2"), 10).await.unwrap().len(),
            1
        );
    }
}
