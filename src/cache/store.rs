//! Named response caches backed by the `cache_entries` table.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use super::policy::CacheName;
use super::request::{Response, ServedFrom};
use crate::storage::{CacheStats, Database, StoredResponse};

/// Default total budget across every named cache.
pub const DEFAULT_QUOTA_BYTES: u64 = 50 * 1024 * 1024; // 50MB

/// Millisecond wall clock, swappable in tests.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Storing the response would exceed the storage quota
    #[error("Storage quota exceeded writing to {cache}: need {needed} bytes, {available} available")]
    QuotaExceeded {
        cache: CacheName,
        needed: u64,
        available: u64,
    },
    /// The backing store failed
    #[error("Cache storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// All named caches over one database.
///
/// Writes to a given cache, together with its eviction pass, run under that
/// cache's own lock; different caches never block each other.
#[derive(Clone)]
pub struct CacheStorage {
    db: Database,
    quota_bytes: u64,
    locks: Arc<HashMap<CacheName, Mutex<()>>>,
    clock: Clock,
}

impl CacheStorage {
    pub fn new(db: Database, quota_bytes: u64) -> Self {
        let locks = CacheName::ALL
            .iter()
            .map(|name| (*name, Mutex::new(())))
            .collect();
        Self {
            db,
            quota_bytes,
            locks: Arc::new(locks),
            clock: Arc::new(|| chrono::Utc::now().timestamp_millis()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Look up `key`, treating entries past the cache's age cap as absent
    /// (and deleting them).
    pub async fn lookup(&self, cache: CacheName, key: &str) -> Result<Option<Response>, CacheError> {
        let Some(entry) = self.db.get_cache_entry(cache.as_str(), key).await? else {
            return Ok(None);
        };

        let now = self.now();
        if cache.expiration().is_expired(entry.stored_at, now) {
            tracing::debug!(cache = %cache, url = %key, "Cached entry expired");
            self.db.delete_cache_entry(cache.as_str(), key).await?;
            return Ok(None);
        }

        self.db.touch_cache_entry(cache.as_str(), key, now).await?;
        Ok(Some(to_response(entry, cache)))
    }

    /// The most recently written unexpired entry in `cache`.
    pub async fn latest(&self, cache: CacheName) -> Result<Option<Response>, CacheError> {
        let Some(entry) = self.db.latest_cache_entry(cache.as_str()).await? else {
            return Ok(None);
        };
        if cache.expiration().is_expired(entry.stored_at, self.now()) {
            return Ok(None);
        }
        Ok(Some(to_response(entry, cache)))
    }

    /// Store a response under `key`, then apply the cache's eviction budget.
    ///
    /// On a quota failure a cache marked `purge_on_quota_error` is emptied;
    /// the error is returned either way and nothing is written.
    pub async fn store(
        &self,
        cache: CacheName,
        key: &str,
        status: u16,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<(), CacheError> {
        let _guard = match self.locks.get(&cache) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let used = self.db.cache_bytes_excluding(cache.as_str(), key).await?.max(0) as u64;
        let needed = body.len() as u64;
        if used.saturating_add(needed) > self.quota_bytes {
            let expiration = cache.expiration();
            if expiration.purge_on_quota_error {
                let purged = self.db.purge_cache(cache.as_str()).await?;
                tracing::warn!(cache = %cache, purged, "Quota exceeded, purged cache");
            }
            return Err(CacheError::QuotaExceeded {
                cache,
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }

        let now = self.now();
        self.db
            .put_cache_entry(cache.as_str(), key, i64::from(status), content_type, body, now)
            .await?;

        let expiration = cache.expiration();
        if expiration.max_entries.is_some() || expiration.max_age.is_some() {
            let expired_before = expiration
                .max_age
                .map(|age| now.saturating_sub(age.as_millis() as i64));
            let removed = self
                .db
                .evict_cache_entries(
                    cache.as_str(),
                    expiration.max_entries.map(i64::from),
                    expired_before,
                )
                .await?;
            if removed > 0 {
                tracing::debug!(cache = %cache, removed, "Evicted cache entries");
            }
        }

        Ok(())
    }

    pub async fn delete(&self, cache: CacheName, key: &str) -> Result<bool, CacheError> {
        Ok(self.db.delete_cache_entry(cache.as_str(), key).await?)
    }

    pub async fn keys(&self, cache: CacheName) -> Result<Vec<String>, CacheError> {
        Ok(self.db.cache_urls(cache.as_str()).await?)
    }

    pub async fn purge(&self, cache: CacheName) -> Result<u64, CacheError> {
        Ok(self.db.purge_cache(cache.as_str()).await?)
    }

    pub async fn stats(&self, cache: CacheName) -> Result<CacheStats, CacheError> {
        Ok(self.db.cache_stats(cache.as_str()).await?)
    }
}

fn to_response(entry: StoredResponse, cache: CacheName) -> Response {
    Response {
        status: u16::try_from(entry.status).unwrap_or(200),
        content_type: entry.content_type,
        body: Bytes::from(entry.body),
        served_from: ServedFrom::Cache(cache),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    async fn storage(quota: u64) -> (CacheStorage, Arc<AtomicI64>) {
        let db = Database::open(":memory:").await.unwrap();
        let now = Arc::new(AtomicI64::new(1_000));
        let clock_now = now.clone();
        let storage = CacheStorage::new(db, quota)
            .with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));
        (storage, now)
    }

    #[tokio::test]
    async fn test_store_and_lookup() {
        let (storage, _) = storage(DEFAULT_QUOTA_BYTES).await;
        storage
            .store(CacheName::Images, "https://a/1.jpg", 200, Some("image/jpeg"), b"img")
            .await
            .unwrap();

        let hit = storage
            .lookup(CacheName::Images, "https://a/1.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"img"));
        assert_eq!(hit.served_from, ServedFrom::Cache(CacheName::Images));

        assert!(storage
            .lookup(CacheName::RemoteImages, "https://a/1.jpg")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_app_shell_keeps_single_entry() {
        let (storage, now) = storage(DEFAULT_QUOTA_BYTES).await;
        storage
            .store(CacheName::AppShell, "https://app/", 200, None, b"v1")
            .await
            .unwrap();
        now.fetch_add(10, Ordering::SeqCst);
        storage
            .store(CacheName::AppShell, "https://app/feed", 200, None, b"v2")
            .await
            .unwrap();

        assert_eq!(
            storage.keys(CacheName::AppShell).await.unwrap(),
            vec!["https://app/feed"]
        );
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let (storage, now) = storage(DEFAULT_QUOTA_BYTES).await;
        storage
            .store(CacheName::AppShell, "https://app/", 200, None, b"v1")
            .await
            .unwrap();

        now.fetch_add(25 * 60 * 60 * 1000, Ordering::SeqCst);
        assert!(storage
            .lookup(CacheName::AppShell, "https://app/")
            .await
            .unwrap()
            .is_none());
        assert!(storage.latest(CacheName::AppShell).await.unwrap().is_none());
        assert!(storage.keys(CacheName::AppShell).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quota_purges_only_the_writing_cache() {
        let (storage, _) = storage(10).await;
        storage
            .store(CacheName::RemoteImages, "r1", 200, None, b"12345")
            .await
            .unwrap();
        storage
            .store(CacheName::Images, "i1", 200, None, b"123")
            .await
            .unwrap();

        let err = storage
            .store(CacheName::Images, "i2", 200, None, b"123456")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { cache: CacheName::Images, .. }));

        assert!(storage.keys(CacheName::Images).await.unwrap().is_empty());
        assert_eq!(storage.keys(CacheName::RemoteImages).await.unwrap(), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_concurrent_writes_respect_count_cap() {
        let (storage, _) = storage(DEFAULT_QUOTA_BYTES).await;
        let writes = (0..40).map(|i| {
            let storage = storage.clone();
            async move {
                storage
                    .store(CacheName::FontFiles, &format!("f{i}"), 200, None, b"x")
                    .await
            }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let stats = storage.stats(CacheName::FontFiles).await.unwrap();
        assert_eq!(stats.total_entries, 30);
    }
}
