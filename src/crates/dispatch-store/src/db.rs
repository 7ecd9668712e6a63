//! SQLite-backed dispatch store
//!
//! One row per dispatch: `dispatch_id -> serialized result document`,
//! updated in place with upsert semantics.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::Result;
use crate::session::StoreSession;
use crate::storage::BackendRegistry;

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Durable key/value store of dispatch rows
#[derive(Clone, Debug)]
pub struct DispatchDb {
    pool: Arc<DatabasePool>,
}

impl DispatchDb {
    /// Open (creating if missing) a file-backed store
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        debug!(path = %path.display(), "Connecting to dispatch database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "Dispatch database connection established");

        let db = Self { pool: Arc::new(pool) };
        db.init_schema().await?;
        Ok(db)
    }

    /// In-memory store for tests and ephemeral dispatchers
    ///
    /// Pinned to a single connection: each SQLite `:memory:` connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool: Arc::new(pool) };
        db.init_schema().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    /// Create the dispatches table if it does not exist
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS dispatches (
                dispatch_id TEXT PRIMARY KEY,
                result_doc TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Insert or update the row for a dispatch
    pub async fn upsert(&self, dispatch_id: &str, result_doc: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO dispatches (dispatch_id, result_doc, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(dispatch_id)
             DO UPDATE SET result_doc = excluded.result_doc,
                           updated_at = excluded.updated_at",
        )
        .bind(dispatch_id)
        .bind(result_doc)
        .bind(Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    /// Load the serialized result document for a dispatch
    pub async fn load(&self, dispatch_id: &str) -> Result<Option<String>> {
        let doc: Option<String> =
            sqlx::query_scalar("SELECT result_doc FROM dispatches WHERE dispatch_id = ?1")
                .bind(dispatch_id)
                .fetch_optional(self.pool.as_ref())
                .await?;
        Ok(doc)
    }

    /// Delete the row for a dispatch
    pub async fn delete(&self, dispatch_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM dispatches WHERE dispatch_id = ?1")
            .bind(dispatch_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    /// All stored dispatch ids
    pub async fn keys(&self) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT dispatch_id FROM dispatches ORDER BY dispatch_id")
                .fetch_all(self.pool.as_ref())
                .await?;
        Ok(ids)
    }

    /// Open a transactional session with upload/delete side-queues
    pub async fn begin_session(&self, backends: BackendRegistry) -> Result<StoreSession> {
        let tx = self.pool.begin().await?;
        Ok(StoreSession::new(tx, backends))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_updates_in_place() {
        let db = DispatchDb::in_memory().await.unwrap();
        db.upsert("d-1", "{\"status\":\"RUNNING\"}").await.unwrap();
        db.upsert("d-1", "{\"status\":\"COMPLETED\"}").await.unwrap();

        assert_eq!(
            db.load("d-1").await.unwrap().as_deref(),
            Some("{\"status\":\"COMPLETED\"}")
        );
        assert_eq!(db.keys().await.unwrap(), vec!["d-1".to_string()]);
    }

    #[tokio::test]
    async fn test_load_missing_row() {
        let db = DispatchDb::in_memory().await.unwrap();
        assert_eq!(db.load("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_row() {
        let db = DispatchDb::in_memory().await.unwrap();
        db.upsert("d-1", "{}").await.unwrap();
        db.delete("d-1").await.unwrap();
        assert_eq!(db.load("d-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_backed_store_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dispatch.db");
        let db = DispatchDb::new(&path).await.unwrap();
        db.upsert("d-1", "{}").await.unwrap();
        assert!(path.exists());
    }
}
