//! Remote article source boundary.
//!
//! The pagination client talks to an article store through the
//! [`ArticleSource`] trait. A source answers one query shape: equality on
//! status, optional array-contains on topic, ordered by publish time
//! descending (ties by document id), bounded by a limit and optionally
//! resuming after an opaque, store-issued cursor token.
//!
//! Implementations:
//!
//! - [`SqliteSource`] - the local article store in the app database
//! - [`HttpSource`] - a JSON document-store REST endpoint
//! - [`MemorySource`] - an in-process store for demos and tests
//!
//! Sources are constructed explicitly and handed to the pagination client;
//! there is no process-wide connection handle. [`ArticleSource::close`]
//! ends the source's lifecycle.

mod http;
mod memory;
mod sqlite;

pub use http::HttpSource;
pub use memory::MemorySource;
pub use sqlite::SqliteSource;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::article::ArticleStatus;

/// Field the store sorts on. Fixed for every query this client issues.
pub const SORT_FIELD: &str = "publishedAt";

/// Errors raised by an article source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The store answered with something that is not a document list
    #[error("Invalid response body: {0}")]
    InvalidBody(String),
    /// A start-after token this store did not issue
    #[error("Invalid cursor token")]
    InvalidCursor,
    /// The backing storage failed
    #[error("Storage error: {0}")]
    Storage(String),
    /// The source was closed or is otherwise unreachable
    #[error("Source unavailable")]
    Unavailable,
}

/// Store-issued position token. Never inspected outside the issuing store.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SourceCursor(String);

impl SourceCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SourceCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SourceCursor(..)")
    }
}

/// One query against the article store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub status: ArticleStatus,
    pub topic: Option<String>,
    pub limit: u32,
    pub start_after: Option<SourceCursor>,
}

/// A raw document plus the cursor token positioned at it.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub id: String,
    pub cursor: SourceCursor,
    pub fields: serde_json::Value,
}

/// A paginated article store.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Run one bounded query. Documents come back in store order.
    async fn query(&self, query: &SourceQuery) -> Result<Vec<SourceDocument>, SourceError>;

    /// Release the source's connections. Later queries fail.
    async fn close(&self) {}
}
