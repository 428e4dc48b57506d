use async_trait::async_trait;

use super::{ArticleSource, SourceCursor, SourceDocument, SourceError, SourceQuery};
use crate::storage::{Database, KeysetPosition};

/// Article source backed by the local SQLite article store.
///
/// Cursor tokens encode `published_at:id`; they are private to this type.
#[derive(Clone)]
pub struct SqliteSource {
    db: Database,
}

impl SqliteSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn encode_cursor(published_at: i64, id: &str) -> SourceCursor {
        SourceCursor::new(format!("{published_at}:{id}"))
    }

    fn decode_cursor(cursor: &SourceCursor) -> Result<KeysetPosition, SourceError> {
        let (published_at, id) = cursor
            .as_str()
            .split_once(':')
            .ok_or(SourceError::InvalidCursor)?;
        let published_at = published_at
            .parse::<i64>()
            .map_err(|_| SourceError::InvalidCursor)?;
        if id.is_empty() {
            return Err(SourceError::InvalidCursor);
        }
        Ok(KeysetPosition {
            published_at,
            id: id.to_string(),
        })
    }
}

#[async_trait]
impl ArticleSource for SqliteSource {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<SourceDocument>, SourceError> {
        let after = query
            .start_after
            .as_ref()
            .map(Self::decode_cursor)
            .transpose()?;

        let rows = self
            .db
            .query_article_documents(
                query.status.as_str(),
                query.topic.as_deref(),
                after.as_ref(),
                i64::from(query.limit),
            )
            .await
            .map_err(|e| SourceError::Storage(e.to_string()))?;

        // A row whose stored JSON no longer parses still occupies its
        // position; hand it on as `null` so the page decoder can skip it.
        let documents = rows
            .into_iter()
            .map(|row| {
                let fields = serde_json::from_str(&row.document).unwrap_or_else(|e| {
                    tracing::warn!(id = %row.id, error = %e, "Stored article document is not valid JSON");
                    serde_json::Value::Null
                });
                SourceDocument {
                    cursor: Self::encode_cursor(row.published_at, &row.id),
                    id: row.id,
                    fields,
                }
            })
            .collect();

        Ok(documents)
    }

    async fn close(&self) {
        self.db.close().await;
    }
}
