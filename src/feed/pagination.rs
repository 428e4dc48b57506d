//! Cursor-based pagination over an [`ArticleSource`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::cursor::{FeedQuery, PageCursor};
use crate::article::Article;
use crate::source::{ArticleSource, SourceCursor, SourceDocument, SourceError};

/// Wall-clock bound on one page fetch, lookahead read included.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of published documents scanned to build the topic list.
const TOPIC_SCAN_LIMIT: u32 = 100;

/// Errors surfaced by the pagination client.
///
/// Malformed records never appear here; they are skipped per record.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The article source failed outright (transport, status, body)
    #[error("Article source unavailable: {0}")]
    SourceUnavailable(#[source] SourceError),
    /// The fetch did not finish within the configured bound
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),
    /// The cursor was issued for a different filter/sort definition
    #[error("Cursor does not belong to this query")]
    CursorMismatch,
    /// Page sizes must be at least 1
    #[error("Page size must be at least 1")]
    InvalidPageSize,
}

impl FetchError {
    /// Transport-class failures: the source could not be reached in time.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::SourceUnavailable(_) | FetchError::Timeout(_))
    }
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::InvalidCursor => FetchError::CursorMismatch,
            other => FetchError::SourceUnavailable(other),
        }
    }
}

/// How `has_more` is determined for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HasMoreStrategy {
    /// Fetch `n`, then read one document past the last cursor.
    #[default]
    Lookahead,
    /// Fetch `n + 1` and trim to `n`; one read per page.
    Overfetch,
}

/// One page request: query shape, size and optional resume position.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub query: FeedQuery,
    pub page_size: u32,
    pub after: Option<PageCursor>,
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Page {
    pub articles: Vec<Article>,
    /// Position after the last document read. `None` only for an empty page.
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

impl Page {
    fn empty() -> Self {
        Self {
            articles: Vec::new(),
            next_cursor: None,
            has_more: false,
        }
    }
}

/// Anything the feed controller can load pages from.
#[async_trait]
pub trait PageLoader: Send + Sync + 'static {
    async fn load(&self, request: PageRequest) -> Result<Page, FetchError>;
}

/// Issues bounded page fetches against an explicitly supplied source.
///
/// The client never retries; retry policy belongs to the caller.
#[derive(Clone)]
pub struct PaginationClient {
    source: Arc<dyn ArticleSource>,
    timeout: Duration,
    strategy: HasMoreStrategy,
}

impl PaginationClient {
    pub fn new(source: Arc<dyn ArticleSource>) -> Self {
        Self {
            source,
            timeout: DEFAULT_FETCH_TIMEOUT,
            strategy: HasMoreStrategy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_has_more(mut self, strategy: HasMoreStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Fetch a page of the unfiltered published feed.
    pub async fn fetch_page(
        &self,
        page_size: u32,
        after: Option<&PageCursor>,
    ) -> Result<Page, FetchError> {
        self.fetch(&PageRequest {
            query: FeedQuery::Latest,
            page_size,
            after: after.cloned(),
        })
        .await
    }

    /// Fetch a page of the published feed restricted to `topic`.
    pub async fn fetch_topic_page(
        &self,
        topic: &str,
        page_size: u32,
        after: Option<&PageCursor>,
    ) -> Result<Page, FetchError> {
        self.fetch(&PageRequest {
            query: FeedQuery::Topic(topic.to_string()),
            page_size,
            after: after.cloned(),
        })
        .await
    }

    /// Fetch one page, bounded by the configured timeout.
    pub async fn fetch(&self, request: &PageRequest) -> Result<Page, FetchError> {
        if request.page_size == 0 {
            return Err(FetchError::InvalidPageSize);
        }
        if let Some(cursor) = &request.after {
            if !cursor.belongs_to(&request.query) {
                tracing::warn!(query = %request.query, "Rejected cursor from a different query");
                return Err(FetchError::CursorMismatch);
            }
        }

        tokio::time::timeout(self.timeout, self.fetch_inner(request))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))?
    }

    /// Reads pages until one yields a usable article or the store runs out.
    ///
    /// A page whose records were all dropped still moves the cursor, so the
    /// read continues after its last raw record inside the same timeout.
    async fn fetch_inner(&self, request: &PageRequest) -> Result<Page, FetchError> {
        let query = &request.query;
        let mut token = request.after.as_ref().map(|c| c.token().clone());

        loop {
            let (raw, has_more) = self.read_raw(query, request.page_size, token).await?;

            let Some(last) = raw.last() else {
                return Ok(Page::empty());
            };
            let last_token = last.cursor.clone();
            let articles = decode_documents(raw);

            if articles.is_empty() && has_more {
                tracing::debug!(query = %query, "Page held no usable records, reading on");
                token = Some(last_token);
                continue;
            }

            return Ok(Page {
                articles,
                next_cursor: Some(PageCursor::new(query, last_token)),
                has_more,
            });
        }
    }

    /// One raw page from the source plus its `has_more` answer.
    async fn read_raw(
        &self,
        query: &FeedQuery,
        page_size: u32,
        token: Option<SourceCursor>,
    ) -> Result<(Vec<SourceDocument>, bool), FetchError> {
        let limit = match self.strategy {
            HasMoreStrategy::Lookahead => page_size,
            HasMoreStrategy::Overfetch => page_size.saturating_add(1),
        };

        let mut raw = self.source.query(&query.source_query(limit, token)).await?;

        let has_more = match self.strategy {
            HasMoreStrategy::Overfetch => {
                let more = raw.len() > page_size as usize;
                raw.truncate(page_size as usize);
                more
            }
            HasMoreStrategy::Lookahead => match raw.last() {
                Some(last) => {
                    let peek = query.source_query(1, Some(last.cursor.clone()));
                    !self.source.query(&peek).await?.is_empty()
                }
                None => false,
            },
        };
        Ok((raw, has_more))
    }

    /// Sorted, de-duplicated topic tags found on recent published articles.
    ///
    /// Advisory: any failure yields an empty list.
    pub async fn available_topics(&self) -> Vec<String> {
        let query = FeedQuery::Latest.source_query(TOPIC_SCAN_LIMIT, None);
        let docs = match tokio::time::timeout(self.timeout, self.source.query(&query)).await {
            Ok(Ok(docs)) => docs,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to load topics");
                return Vec::new();
            }
            Err(_) => {
                tracing::warn!("Timed out loading topics");
                return Vec::new();
            }
        };

        let topics: BTreeSet<String> = docs
            .iter()
            .filter_map(|doc| doc.fields.get("topics")?.as_array())
            .flatten()
            .filter_map(|t| t.as_str())
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .collect();

        topics.into_iter().collect()
    }

    /// End the underlying source's lifecycle.
    pub async fn close(&self) {
        self.source.close().await;
    }
}

#[async_trait]
impl PageLoader for PaginationClient {
    async fn load(&self, request: PageRequest) -> Result<Page, FetchError> {
        self.fetch(&request).await
    }
}

/// Decode raw documents, skipping (and logging) any that are malformed or
/// not published.
fn decode_documents(raw: Vec<SourceDocument>) -> Vec<Article> {
    raw.into_iter()
        .filter_map(|doc| match Article::from_document(&doc.id, &doc.fields) {
            Ok(article) if article.is_published() => Some(article),
            Ok(article) => {
                tracing::warn!(
                    article_id = %article.id,
                    status = %article.status,
                    "Skipping unpublished article returned by source"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed article");
                None
            }
        })
        .collect()
}
