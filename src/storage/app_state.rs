use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // App State Operations
    // ========================================================================

    /// Get a single app-state value by key, or `None` if not set.
    pub async fn get_app_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM app_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set an app-state value (UPSERT), refreshing its timestamp.
    pub async fn set_app_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_state (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_app_state_missing() {
        let db = test_db().await;
        assert_eq!(db.get_app_state("installed").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_app_state_upsert() {
        let db = test_db().await;
        db.set_app_state("installed", "false").await.unwrap();
        db.set_app_state("installed", "true").await.unwrap();

        assert_eq!(
            db.get_app_state("installed").await.unwrap(),
            Some("true".to_string())
        );
    }

    #[tokio::test]
    async fn test_app_state_survives_cache_purge() {
        let db = test_db().await;
        db.set_app_state("installed", "true").await.unwrap();

        db.put_cache_entry("images", "https://example.com/a.jpg", 200, None, b"img", 1)
            .await
            .unwrap();
        db.purge_cache("images").await.unwrap();

        assert_eq!(
            db.get_app_state("installed").await.unwrap(),
            Some("true".to_string())
        );
    }
}
