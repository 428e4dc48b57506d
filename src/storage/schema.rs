use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Handle to the durable SQLite store.
///
/// Holds three independent areas: the local article store, the named
/// response caches used by the cache router, and the small `app_state`
/// table behind the local persistence store. Cache eviction only ever
/// touches `cache_entries`.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database shared by the pool.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so there is no window with umask permissions
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                if let Some(parent) = db_path.parent().filter(|p| p.exists()) {
                    tracing::debug!(parent = %parent.display(), "Pre-creating database file");
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok(); // SQLite reports the real error at connect_with
                }
            }
        }

        // busy_timeout=5000: wait up to 5s for locks before SQLITE_BUSY
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Close every pooled connection. Further queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        // Per-connection setting, must be outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        // Local article store. The JSON document is kept verbatim; only the
        // sort/filter keys are lifted into columns.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                document TEXT NOT NULL,
                ingested_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_topics (
                article_id TEXT NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                topic TEXT NOT NULL,
                PRIMARY KEY (article_id, topic)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Covers: WHERE status = ? ORDER BY published_at DESC, id ASC
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_status_published ON articles(status, published_at DESC, id)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_article_topics_topic ON article_topics(topic)")
            .execute(&mut *tx)
            .await?;

        // Named response caches (one row per cache_name + url)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                cache_name TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                body BLOB NOT NULL,
                stored_at INTEGER NOT NULL,
                accessed_at INTEGER NOT NULL,
                PRIMARY KEY (cache_name, url)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Eviction scans one cache ordered by recency
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_cache_entries_accessed ON cache_entries(cache_name, accessed_at)",
        )
        .execute(&mut *tx)
        .await?;

        // Durable key-value flags, outside every cache tier
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS app_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
