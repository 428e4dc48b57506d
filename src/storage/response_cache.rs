use anyhow::Result;

use super::schema::Database;
use super::types::{CacheStats, StoredResponse};

impl Database {
    // ========================================================================
    // Response Cache Operations
    // ========================================================================

    /// Insert or replace a cached response in `cache`.
    ///
    /// `now` (epoch milliseconds) becomes both `stored_at` and `accessed_at`.
    pub async fn put_cache_entry(
        &self,
        cache: &str,
        url: &str,
        status: i64,
        content_type: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO cache_entries
                (cache_name, url, status, content_type, body, stored_at, accessed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(cache)
        .bind(url)
        .bind(status)
        .bind(content_type)
        .bind(body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a cached response by exact key. Expiry is the caller's concern.
    pub async fn get_cache_entry(&self, cache: &str, url: &str) -> Result<Option<StoredResponse>> {
        let row = sqlx::query_as::<_, StoredResponse>(
            r#"
            SELECT url, status, content_type, body, stored_at, accessed_at
            FROM cache_entries
            WHERE cache_name = ? AND url = ?
        "#,
        )
        .bind(cache)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Most recently written entry in `cache`, whatever its key.
    pub async fn latest_cache_entry(&self, cache: &str) -> Result<Option<StoredResponse>> {
        let row = sqlx::query_as::<_, StoredResponse>(
            r#"
            SELECT url, status, content_type, body, stored_at, accessed_at
            FROM cache_entries
            WHERE cache_name = ?
            ORDER BY stored_at DESC
            LIMIT 1
        "#,
        )
        .bind(cache)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Record a cache hit for recency-based eviction.
    pub async fn touch_cache_entry(&self, cache: &str, url: &str, now: i64) -> Result<()> {
        sqlx::query("UPDATE cache_entries SET accessed_at = ? WHERE cache_name = ? AND url = ?")
            .bind(now)
            .bind(cache)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete one entry, returns whether it existed.
    pub async fn delete_cache_entry(&self, cache: &str, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_name = ? AND url = ?")
            .bind(cache)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All keys currently held in `cache`.
    pub async fn cache_urls(&self, cache: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT url FROM cache_entries WHERE cache_name = ? ORDER BY url")
                .bind(cache)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }

    /// Apply an eviction budget to a single cache.
    ///
    /// Removes entries written before `expired_before`, then trims the cache
    /// to the `max_entries` most recently used. Other caches are untouched.
    /// Returns the number of entries removed.
    pub async fn evict_cache_entries(
        &self,
        cache: &str,
        max_entries: Option<i64>,
        expired_before: Option<i64>,
    ) -> Result<u64> {
        let mut removed = 0;

        if let Some(cutoff) = expired_before {
            let result =
                sqlx::query("DELETE FROM cache_entries WHERE cache_name = ? AND stored_at < ?")
                    .bind(cache)
                    .bind(cutoff)
                    .execute(&self.pool)
                    .await?;
            removed += result.rows_affected();
        }

        if let Some(max) = max_entries {
            let result = sqlx::query(
                r#"
                DELETE FROM cache_entries
                WHERE cache_name = ? AND url NOT IN (
                    SELECT url FROM cache_entries
                    WHERE cache_name = ?
                    ORDER BY accessed_at DESC, stored_at DESC
                    LIMIT ?
                )
            "#,
            )
            .bind(cache)
            .bind(cache)
            .bind(max.max(0))
            .execute(&self.pool)
            .await?;
            removed += result.rows_affected();
        }

        Ok(removed)
    }

    /// Drop every entry in `cache`. Returns the number removed.
    pub async fn purge_cache(&self, cache: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE cache_name = ?")
            .bind(cache)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Total stored body bytes across all caches, not counting the entry
    /// at (`cache`, `url`) which a pending write would replace.
    pub async fn cache_bytes_excluding(&self, cache: &str, url: &str) -> Result<i64> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(length(body)) FROM cache_entries WHERE NOT (cache_name = ? AND url = ?)",
        )
        .bind(cache)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0))
    }

    /// Aggregate statistics for one named cache.
    pub async fn cache_stats(&self, cache: &str) -> Result<CacheStats> {
        let row: (i64, Option<i64>, Option<i64>, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(length(body)), MIN(stored_at), MAX(stored_at)
            FROM cache_entries
            WHERE cache_name = ?
        "#,
        )
        .bind(cache)
        .fetch_one(&self.pool)
        .await?;

        Ok(CacheStats {
            total_entries: row.0,
            total_size_bytes: row.1.unwrap_or(0),
            oldest_entry: row.2,
            newest_entry: row.3,
        })
    }
}
