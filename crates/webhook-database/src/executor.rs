//! Async SQLite executor using a dedicated background thread.
//!
//! - One thread owns the SQLite connection
//! - Callers send closures through a channel and await the result
//! - The Tokio runtime never blocks on SQLite I/O
//!
//! Only SQL belongs inside [`AsyncDatabase::call`]. Webhook delivery, JSON
//! rendering, and anything that may wait on the network happen outside it.

use crate::{migrations, DatabaseError, DatabaseResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::info;

/// Convert a tokio_rusqlite::Error to DatabaseError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> DatabaseError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => DatabaseError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => {
            DatabaseError::Connection("Connection closed".to_string())
        }
        other => DatabaseError::Connection(other.to_string()),
    }
}

/// Async SQLite database with a dedicated executor thread.
///
/// Cloning is cheap; every clone talks to the same thread, so queries run
/// in FIFO order.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database at the given path.
    ///
    /// Creates the file if needed, enables WAL, and runs pending migrations.
    pub async fn open(path: &Path) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening async database");

        let conn = Connection::open(path_str.clone())
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: path_str,
        };
        db.initialize(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .await?;

        info!(path = %db.path, "Async database initialized with WAL mode");
        Ok(db)
    }

    /// Open an in-memory database (tests and dry runs).
    pub async fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        let db = Self {
            conn,
            path: ":memory:".to_string(),
        };
        db.initialize("PRAGMA foreign_keys = ON;").await?;
        Ok(db)
    }

    async fn initialize(&self, pragmas: &'static str) -> DatabaseResult<()> {
        self.call(move |conn| {
            conn.execute_batch(pragmas)?;
            migrations::run_migrations(conn)
        })
        .await
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread. The caller's task is
    /// parked, not blocked, until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call_mut(move |conn| f(conn)).await
    }

    /// Execute a closure that needs `&mut Connection`, e.g. to open a transaction.
    pub async fn call_mut<F, T>(&self, f: F) -> DatabaseResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> DatabaseResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The inner DatabaseResult rides inside tokio_rusqlite's Ok so our
        // own error variants survive the trip back.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the database connection after pending operations complete.
    pub async fn close(self) -> DatabaseResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Database closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queries, EventKind, EventPayload, NewMemberPayload, WebhookStatus};
    use chrono::Utc;
    use tempfile::tempdir;

    fn member_payload() -> EventPayload {
        EventPayload::NewMember(NewMemberPayload {
            household_id: "house-1".into(),
            user_id: "user-9".into(),
            role: "member".into(),
            joined_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn test_async_database_open() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let db = AsyncDatabase::open(&db_path).await.unwrap();
        assert_eq!(db.path(), db_path.to_string_lossy());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_outbox_roundtrip_on_executor() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        let event = db
            .call(|conn| queries::enqueue_event(conn, EventKind::NewMember, &member_payload()))
            .await
            .unwrap();
        let id = event.id.clone();

        let sent = db
            .call(move |conn| queries::mark_event_sent(conn, &id))
            .await
            .unwrap();
        assert_eq!(sent.status, WebhookStatus::Sent);
    }

    #[tokio::test]
    async fn test_errors_keep_their_variant() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();

        let err = db
            .call(|conn| queries::mark_event_sent(conn, "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_failures_count_every_attempt() {
        let db = AsyncDatabase::open_in_memory().await.unwrap();
        let event = db
            .call(|conn| queries::enqueue_event(conn, EventKind::NewMember, &member_payload()))
            .await
            .unwrap();

        let mut handles = vec![];
        for i in 0..10 {
            let db = db.clone();
            let id = event.id.clone();
            handles.push(tokio::spawn(async move {
                db.call(move |conn| queries::mark_event_failed(conn, &id, &format!("attempt {i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let id = event.id.clone();
        let stored = db
            .call(move |conn| queries::get_event(conn, &id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts, 10);
        assert_eq!(stored.status, WebhookStatus::Failed);
    }
}
