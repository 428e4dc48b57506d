use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{ArticleDocumentRow, IngestDocument};

/// Hard cap on rows returned by any single page query (OOM protection)
const MAX_PAGE_ROWS: i64 = 500;

/// Position strictly after which a page query resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysetPosition {
    pub published_at: i64,
    pub id: String,
}

impl Database {
    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Insert or replace article documents, returns the number written.
    ///
    /// Topic rows are rewritten for every document so the array-contains
    /// filter always matches the latest document body. Runs in one
    /// transaction.
    pub async fn ingest_documents(&self, documents: &[IngestDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        for doc in documents {
            sqlx::query(
                r#"
                INSERT INTO articles (id, status, published_at, document, ingested_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    published_at = excluded.published_at,
                    document = excluded.document
            "#,
            )
            .bind(&doc.id)
            .bind(&doc.status)
            .bind(doc.published_at)
            .bind(doc.document.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM article_topics WHERE article_id = ?")
                .bind(&doc.id)
                .execute(&mut *tx)
                .await?;

            if !doc.topics.is_empty() {
                let mut builder: QueryBuilder<sqlx::Sqlite> =
                    QueryBuilder::new("INSERT OR IGNORE INTO article_topics (article_id, topic) ");
                builder.push_values(&doc.topics, |mut b, topic| {
                    b.push_bind(&doc.id).push_bind(topic);
                });
                builder.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        tracing::debug!(count = documents.len(), "Ingested article documents");
        Ok(documents.len())
    }

    /// Change the editorial status of one article. Returns whether it existed.
    pub async fn set_article_status(&self, id: &str, status: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE articles SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Page Queries
    // ========================================================================

    /// Keyset page over articles with the given status, newest first.
    ///
    /// Order is `published_at DESC, id ASC`; `after` resumes strictly after
    /// that position under the same order. `topic` restricts to documents
    /// tagged with it.
    pub async fn query_article_documents(
        &self,
        status: &str,
        topic: Option<&str>,
        after: Option<&KeysetPosition>,
        limit: i64,
    ) -> Result<Vec<ArticleDocumentRow>> {
        let limit = limit.clamp(0, MAX_PAGE_ROWS);

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT a.id, a.published_at, a.document FROM articles a WHERE a.status = ",
        );
        builder.push_bind(status);

        if let Some(topic) = topic {
            builder.push(
                " AND EXISTS (SELECT 1 FROM article_topics t WHERE t.article_id = a.id AND t.topic = ",
            );
            builder.push_bind(topic);
            builder.push(")");
        }

        if let Some(pos) = after {
            builder.push(" AND (a.published_at < ");
            builder.push_bind(pos.published_at);
            builder.push(" OR (a.published_at = ");
            builder.push_bind(pos.published_at);
            builder.push(" AND a.id > ");
            builder.push_bind(&pos.id);
            builder.push("))");
        }

        builder.push(" ORDER BY a.published_at DESC, a.id ASC LIMIT ");
        builder.push_bind(limit);

        let rows = builder
            .build_query_as::<ArticleDocumentRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Number of stored articles with the given status.
    pub async fn count_articles(&self, status: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE status = ?")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn doc(id: &str, status: &str, published_at: i64, topics: &[&str]) -> IngestDocument {
        IngestDocument {
            id: id.to_string(),
            status: status.to_string(),
            published_at,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            document: json!({ "title": id }),
        }
    }

    fn ids(rows: &[ArticleDocumentRow]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_query_orders_newest_first_with_id_tiebreak() {
        let db = test_db().await;
        db.ingest_documents(&[
            doc("b", "published", 100, &[]),
            doc("a", "published", 100, &[]),
            doc("c", "published", 300, &[]),
            doc("d", "published", 200, &[]),
        ])
        .await
        .unwrap();

        let rows = db
            .query_article_documents("published", None, None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec!["c", "d", "a", "b"]);
    }

    #[tokio::test]
    async fn test_query_filters_status() {
        let db = test_db().await;
        db.ingest_documents(&[
            doc("p", "published", 100, &[]),
            doc("d", "draft", 200, &[]),
            doc("a", "approved", 300, &[]),
        ])
        .await
        .unwrap();

        let rows = db
            .query_article_documents("published", None, None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec!["p"]);
        assert_eq!(db.count_articles("published").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_resumes_strictly_after_position() {
        let db = test_db().await;
        db.ingest_documents(&[
            doc("a", "published", 100, &[]),
            doc("b", "published", 100, &[]),
            doc("c", "published", 50, &[]),
        ])
        .await
        .unwrap();

        let after = KeysetPosition {
            published_at: 100,
            id: "a".to_string(),
        };
        let rows = db
            .query_article_documents("published", None, Some(&after), 10)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_query_topic_filter() {
        let db = test_db().await;
        db.ingest_documents(&[
            doc("a", "published", 300, &["Politics", "Housing"]),
            doc("b", "published", 200, &["Sports"]),
            doc("c", "published", 100, &["Housing"]),
        ])
        .await
        .unwrap();

        let rows = db
            .query_article_documents("published", Some("Housing"), None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&rows), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_reingest_replaces_topics() {
        let db = test_db().await;
        db.ingest_documents(&[doc("a", "published", 100, &["Old"])])
            .await
            .unwrap();
        db.ingest_documents(&[doc("a", "published", 100, &["New"])])
            .await
            .unwrap();

        let old = db
            .query_article_documents("published", Some("Old"), None, 10)
            .await
            .unwrap();
        assert!(old.is_empty());
        let new = db
            .query_article_documents("published", Some("New"), None, 10)
            .await
            .unwrap();
        assert_eq!(ids(&new), vec!["a"]);
    }

    #[tokio::test]
    async fn test_set_article_status_hides_from_published() {
        let db = test_db().await;
        db.ingest_documents(&[doc("a", "published", 100, &[])])
            .await
            .unwrap();

        assert!(db.set_article_status("a", "draft").await.unwrap());
        assert!(!db.set_article_status("missing", "draft").await.unwrap());
        assert_eq!(db.count_articles("published").await.unwrap(), 0);
    }
}
