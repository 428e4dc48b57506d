use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("The swipefeed database is locked by another process. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// as one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Article Store Rows
// ============================================================================

/// Raw article document as held by the local article store.
///
/// The document body stays JSON: decoding into a typed article happens at
/// the pagination boundary, where malformed records are skipped.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ArticleDocumentRow {
    pub id: String,
    /// Publish time in epoch milliseconds (primary sort key)
    pub published_at: i64,
    pub document: String,
}

/// A document handed to [`Database::ingest_documents`](super::Database::ingest_documents).
#[derive(Debug, Clone)]
pub struct IngestDocument {
    pub id: String,
    pub status: String,
    pub published_at: i64,
    pub topics: Vec<String>,
    pub document: serde_json::Value,
}

// ============================================================================
// Response Cache Rows
// ============================================================================

/// A cached HTTP response body belonging to one named cache.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredResponse {
    pub url: String,
    pub status: i64,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Epoch milliseconds when the entry was written
    pub stored_at: i64,
    /// Epoch milliseconds of the last cache hit (or the write)
    pub accessed_at: i64,
}

/// Aggregate statistics for a single named cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: i64,
    pub total_size_bytes: i64,
    pub oldest_entry: Option<i64>,
    pub newest_entry: Option<i64>,
}
