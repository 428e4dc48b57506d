use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{ArticleSource, SourceCursor, SourceDocument, SourceError, SourceQuery};
use crate::article::{Article, ArticleStatus};

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    status: ArticleStatus,
    published_at: i64,
    topics: Vec<String>,
    fields: serde_json::Value,
}

/// In-process article source with the same ordering contract as the
/// real stores: publish time descending, ties by id ascending.
///
/// Availability and latency can be toggled to simulate an unreachable or
/// slow store. Every query is counted, including failed ones.
#[derive(Debug, Default)]
pub struct MemorySource {
    documents: RwLock<Vec<StoredDocument>>,
    unavailable: AtomicBool,
    closed: AtomicBool,
    queries: AtomicUsize,
    delay_ms: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source holding `articles`. Articles that fail to encode are
    /// skipped with a warning.
    pub fn from_articles(articles: impl IntoIterator<Item = Article>) -> Self {
        let documents = articles
            .into_iter()
            .filter_map(|article| match article.to_document() {
                Ok(fields) => Some(StoredDocument {
                    id: article.id.to_string(),
                    status: article.status,
                    published_at: article.published_at.timestamp_millis(),
                    topics: article.topics.clone(),
                    fields,
                }),
                Err(e) => {
                    tracing::warn!(article_id = %article.id, error = %e, "Failed to encode article");
                    None
                }
            })
            .collect();

        Self {
            documents: RwLock::new(documents),
            ..Self::default()
        }
    }

    /// Insert a document whose fields need not decode into an article.
    ///
    /// The index values (`status`, `published_at`, `topics`) are given
    /// separately so malformed records still take part in ordering.
    pub async fn insert_raw(
        &self,
        id: impl Into<String>,
        status: ArticleStatus,
        published_at_ms: i64,
        topics: Vec<String>,
        fields: serde_json::Value,
    ) {
        let id = id.into();
        let mut docs = self.documents.write().await;
        docs.retain(|d| d.id != id);
        docs.push(StoredDocument {
            id,
            status,
            published_at: published_at_ms,
            topics,
            fields,
        });
    }

    /// Make every subsequent query fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every subsequent query by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of queries issued so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn encode_cursor(doc: &StoredDocument) -> SourceCursor {
        SourceCursor::new(format!("{}:{}", doc.published_at, doc.id))
    }

    fn decode_cursor(cursor: &SourceCursor) -> Result<(i64, String), SourceError> {
        let (published_at, id) = cursor
            .as_str()
            .split_once(':')
            .ok_or(SourceError::InvalidCursor)?;
        let published_at = published_at
            .parse::<i64>()
            .map_err(|_| SourceError::InvalidCursor)?;
        Ok((published_at, id.to_string()))
    }
}

#[async_trait]
impl ArticleSource for MemorySource {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<SourceDocument>, SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.closed.load(Ordering::SeqCst) || self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable);
        }

        let after = query
            .start_after
            .as_ref()
            .map(Self::decode_cursor)
            .transpose()?;

        let docs = self.documents.read().await;
        let mut matching: Vec<&StoredDocument> = docs
            .iter()
            .filter(|d| d.status == query.status)
            .filter(|d| match &query.topic {
                Some(topic) => d.topics.iter().any(|t| t == topic),
                None => true,
            })
            .filter(|d| match &after {
                // Strictly after the cursor under (published_at DESC, id ASC)
                Some((ts, id)) => {
                    d.published_at < *ts || (d.published_at == *ts && d.id.as_str() > id.as_str())
                }
                None => true,
            })
            .collect();

        matching.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matching
            .into_iter()
            .take(query.limit as usize)
            .map(|d| SourceDocument {
                id: d.id.clone(),
                cursor: Self::encode_cursor(d),
                fields: d.fields.clone(),
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
