//! Per-request strategy selection and execution.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use super::fetcher::{Fetcher, NetworkError, NetworkResponse};
use super::policy::{CacheName, RouteTable, Strategy};
use super::precache::{PrecacheIndex, PrecacheManifest};
use super::request::{CacheRequest, Destination, Response, ServedFrom};
use super::store::{CacheError, CacheStorage};
use crate::storage::CacheStats;

pub const DEFAULT_OFFLINE_PAGE: &str = "/offline.html";
pub const DEFAULT_FALLBACK_IMAGE: &str = "/fallback-image.jpg";

/// Failures while populating the precache at install time.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Failed to fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },
    #[error("Failed to fetch {url}: HTTP status {status}")]
    BadStatus { url: String, status: u16 },
    #[error("Invalid precache URL: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Outcome of [`CacheRouter::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstallSummary {
    /// Assets fetched and stored
    pub precached: usize,
    /// Assets whose revisioned key was already present
    pub reused: usize,
    /// Offline fallbacks stored
    pub fallbacks: usize,
}

/// Routes every outbound request through exactly one caching strategy.
pub struct CacheRouter {
    routes: RouteTable,
    app_origin: Url,
    storage: CacheStorage,
    fetcher: Arc<dyn Fetcher>,
    precache: RwLock<PrecacheIndex>,
    offline_page: Url,
    fallback_image: Url,
    revalidations: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheRouter {
    pub fn new(
        app_origin: Url,
        routes: RouteTable,
        storage: CacheStorage,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, url::ParseError> {
        let offline_page = app_origin.join(DEFAULT_OFFLINE_PAGE)?;
        let fallback_image = app_origin.join(DEFAULT_FALLBACK_IMAGE)?;
        Ok(Self {
            routes,
            app_origin,
            storage,
            fetcher,
            precache: RwLock::new(PrecacheIndex::default()),
            offline_page,
            fallback_image,
            revalidations: Mutex::new(Vec::new()),
        })
    }

    /// Override the offline page and fallback image paths.
    pub fn with_fallbacks(
        mut self,
        offline_page: &str,
        fallback_image: &str,
    ) -> Result<Self, url::ParseError> {
        self.offline_page = self.app_origin.join(offline_page)?;
        self.fallback_image = self.app_origin.join(fallback_image)?;
        Ok(self)
    }

    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    // ========================================================================
    // Request Handling
    // ========================================================================

    /// Answer one request.
    ///
    /// Navigations and image requests always get a response: on failure
    /// they fall back to the offline page or fallback image. Other classes
    /// surface the network error.
    pub async fn handle(&self, request: &CacheRequest) -> Result<Response, NetworkError> {
        let strategy = self.routes.classify(request);
        tracing::debug!(url = %request.url, ?strategy, "Routing request");

        let result = match strategy {
            Strategy::NetworkFirst(cache) => self.network_first(cache, request).await,
            Strategy::CacheFirst(cache) => self.cache_first(cache, request).await,
            Strategy::StaleWhileRevalidate(cache) => {
                self.stale_while_revalidate(cache, request).await
            }
            Strategy::Precache => self.precached(request).await,
            Strategy::NetworkOnly => self.network(request).await,
        };

        match result {
            Ok(response) => Ok(response),
            Err(e) if request.is_navigation() => {
                tracing::warn!(url = %request.url, error = %e, "Navigation failed, serving offline page");
                Ok(self.fallback(&self.offline_page).await)
            }
            Err(e) if request.destination == Destination::Image => {
                tracing::warn!(url = %request.url, error = %e, "Image failed, serving fallback image");
                Ok(self.fallback(&self.fallback_image).await)
            }
            Err(e) => Err(e),
        }
    }

    async fn network_first(
        &self,
        cache: CacheName,
        request: &CacheRequest,
    ) -> Result<Response, NetworkError> {
        let key = request.cache_key();
        match self.fetcher.fetch(&request.url).await {
            Ok(fresh) => {
                write_through(&self.storage, cache, &key, &fresh).await;
                Ok(from_network(fresh))
            }
            Err(e) => {
                tracing::debug!(url = %key, error = %e, "Network failed, trying cache");
                if let Some(hit) = self.cached(cache, &key).await {
                    return Ok(hit);
                }
                // The app shell is a single evolving snapshot: any entry will do
                match self.storage.latest(cache).await {
                    Ok(Some(hit)) => Ok(hit),
                    Ok(None) => Err(e),
                    Err(cache_err) => {
                        tracing::warn!(cache = %cache, error = %cache_err, "Cache read failed");
                        Err(e)
                    }
                }
            }
        }
    }

    async fn cache_first(
        &self,
        cache: CacheName,
        request: &CacheRequest,
    ) -> Result<Response, NetworkError> {
        let key = request.cache_key();
        if let Some(hit) = self.cached(cache, &key).await {
            return Ok(hit);
        }
        let fresh = self.fetcher.fetch(&request.url).await?;
        write_through(&self.storage, cache, &key, &fresh).await;
        Ok(from_network(fresh))
    }

    async fn stale_while_revalidate(
        &self,
        cache: CacheName,
        request: &CacheRequest,
    ) -> Result<Response, NetworkError> {
        let key = request.cache_key();
        let Some(hit) = self.cached(cache, &key).await else {
            let fresh = self.fetcher.fetch(&request.url).await?;
            write_through(&self.storage, cache, &key, &fresh).await;
            return Ok(from_network(fresh));
        };

        let storage = self.storage.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let url = request.url.clone();
        let handle = tokio::spawn(async move {
            match fetcher.fetch(&url).await {
                Ok(fresh) => write_through(&storage, cache, &key, &fresh).await,
                Err(e) => tracing::debug!(url = %url, error = %e, "Background revalidation failed"),
            }
        });

        let mut pending = self.revalidations.lock().await;
        pending.retain(|h| !h.is_finished());
        pending.push(handle);

        Ok(hit)
    }

    async fn precached(&self, request: &CacheRequest) -> Result<Response, NetworkError> {
        let key = self
            .precache
            .read()
            .await
            .key_for(&request.url)
            .map(str::to_string);

        let Some(key) = key else {
            return self.network(request).await;
        };

        if let Some(hit) = self.cached(CacheName::Precache, &key).await {
            return Ok(hit);
        }
        let fresh = self.fetcher.fetch(&request.url).await?;
        write_through(&self.storage, CacheName::Precache, &key, &fresh).await;
        Ok(from_network(fresh))
    }

    async fn network(&self, request: &CacheRequest) -> Result<Response, NetworkError> {
        Ok(from_network(self.fetcher.fetch(&request.url).await?))
    }

    /// Cache read that treats storage failures as a miss.
    async fn cached(&self, cache: CacheName, key: &str) -> Option<Response> {
        match self.storage.lookup(cache, key).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(cache = %cache, url = %key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn fallback(&self, url: &Url) -> Response {
        match self.cached(CacheName::OfflineFallbacks, url.as_str()).await {
            Some(hit) => Response {
                served_from: ServedFrom::Fallback,
                ..hit
            },
            None => {
                tracing::warn!(url = %url, "Offline fallback not cached");
                Response::unavailable()
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Populate the precache from `manifest` and cache the offline
    /// fallbacks. Assets already stored under the same revision are reused.
    pub async fn install(&self, manifest: &PrecacheManifest) -> Result<InstallSummary, InstallError> {
        let index = PrecacheIndex::resolve(manifest, &self.app_origin);
        let mut summary = InstallSummary::default();

        for (url, key) in index.entries() {
            if self.storage.lookup(CacheName::Precache, key).await?.is_some() {
                summary.reused += 1;
                continue;
            }
            let response = self.fetch_for_install(url).await?;
            self.storage
                .store(
                    CacheName::Precache,
                    key,
                    response.status,
                    response.content_type.as_deref(),
                    &response.body,
                )
                .await?;
            summary.precached += 1;
        }

        for url in [&self.offline_page, &self.fallback_image] {
            let response = self.fetch_for_install(url.as_str()).await?;
            self.storage
                .store(
                    CacheName::OfflineFallbacks,
                    url.as_str(),
                    response.status,
                    response.content_type.as_deref(),
                    &response.body,
                )
                .await?;
            summary.fallbacks += 1;
        }

        *self.precache.write().await = index;
        tracing::info!(
            precached = summary.precached,
            reused = summary.reused,
            fallbacks = summary.fallbacks,
            "Precache installed"
        );
        Ok(summary)
    }

    async fn fetch_for_install(&self, url: &str) -> Result<NetworkResponse, InstallError> {
        let parsed = Url::parse(url).map_err(|_| InstallError::InvalidUrl(url.to_string()))?;
        let response = self
            .fetcher
            .fetch(&parsed)
            .await
            .map_err(|source| InstallError::Network {
                url: url.to_string(),
                source,
            })?;
        if response.status != 200 {
            return Err(InstallError::BadStatus {
                url: url.to_string(),
                status: response.status,
            });
        }
        Ok(response)
    }

    /// Remove precache entries whose key is not in the installed manifest.
    pub async fn cleanup_outdated(&self) -> Result<u64, CacheError> {
        let index = self.precache.read().await;
        let current = index.keys();
        let mut removed = 0;
        for key in self.storage.keys(CacheName::Precache).await? {
            if !current.contains(key.as_str()) && self.storage.delete(CacheName::Precache, &key).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed outdated precache entries");
        }
        Ok(removed)
    }

    /// Wait for outstanding background revalidations.
    pub async fn settle(&self) {
        loop {
            let pending: Vec<_> = std::mem::take(&mut *self.revalidations.lock().await);
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Revalidation task failed");
                }
            }
        }
    }

    /// Entry count and size for every named cache.
    pub async fn stats(&self) -> Result<Vec<(CacheName, CacheStats)>, CacheError> {
        let mut stats = Vec::with_capacity(CacheName::ALL.len());
        for cache in CacheName::ALL {
            stats.push((cache, self.storage.stats(cache).await?));
        }
        Ok(stats)
    }
}

fn from_network(response: NetworkResponse) -> Response {
    Response {
        status: response.status,
        content_type: response.content_type,
        body: response.body,
        served_from: ServedFrom::Network,
    }
}

/// Store a `200` response. Failures are logged and never block serving.
async fn write_through(storage: &CacheStorage, cache: CacheName, key: &str, response: &NetworkResponse) {
    if response.status != 200 {
        tracing::debug!(cache = %cache, url = %key, status = response.status, "Not caching non-200 response");
        return;
    }
    if let Err(e) = storage
        .store(
            cache,
            key,
            response.status,
            response.content_type.as_deref(),
            &response.body,
        )
        .await
    {
        tracing::warn!(cache = %cache, url = %key, error = %e, "Cache write failed, serving uncached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::precache::PrecacheEntry;
    use crate::cache::store::DEFAULT_QUOTA_BYTES;
    use crate::storage::Database;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scriptable network: fixed bodies per URL, switchable offline.
    #[derive(Default)]
    struct FakeNetwork {
        bodies: std::sync::Mutex<HashMap<String, (u16, &'static str)>>,
        offline: AtomicBool,
        calls: std::sync::Mutex<Vec<String>>,
    }

    impl FakeNetwork {
        fn serve(&self, url: &str, status: u16, body: &'static str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), (status, body));
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
        }
    }

    #[async_trait]
    impl Fetcher for FakeNetwork {
        async fn fetch(&self, url: &Url) -> Result<NetworkResponse, NetworkError> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Timeout);
            }
            let (status, body) = self
                .bodies
                .lock()
                .unwrap()
                .get(url.as_str())
                .copied()
                .unwrap_or((404, "not found"));
            Ok(NetworkResponse {
                status,
                content_type: None,
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    const APP: &str = "https://app.example.com/";
    const REMOTE_IMG: &str = "https://firebasestorage.googleapis.com/v0/b/app/o/a.jpg";

    async fn router() -> (Arc<FakeNetwork>, CacheRouter) {
        let db = Database::open(":memory:").await.unwrap();
        let app = Url::parse(APP).unwrap();
        let net = Arc::new(FakeNetwork::default());
        let router = CacheRouter::new(
            app.clone(),
            RouteTable::for_app(&app).unwrap(),
            CacheStorage::new(db, DEFAULT_QUOTA_BYTES),
            net.clone(),
        )
        .unwrap();
        (net, router)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_remote_image_second_request_served_from_cache() {
        let (net, router) = router().await;
        net.serve(REMOTE_IMG, 200, "jpeg");
        let request = CacheRequest::image(url(REMOTE_IMG));

        let first = router.handle(&request).await.unwrap();
        assert_eq!(first.served_from, ServedFrom::Network);

        let second = router.handle(&request).await.unwrap();
        assert_eq!(second.served_from, ServedFrom::Cache(CacheName::RemoteImages));
        assert_eq!(second.body, Bytes::from_static(b"jpeg"));
        assert_eq!(net.calls_to(REMOTE_IMG), 1);
    }

    #[tokio::test]
    async fn test_navigation_always_tries_network_first() {
        let (net, router) = router().await;
        let page = "https://app.example.com/feed";
        net.serve(page, 200, "<html>v1</html>");
        let request = CacheRequest::navigate(url(page));

        router.handle(&request).await.unwrap();
        net.serve(page, 200, "<html>v2</html>");
        let second = router.handle(&request).await.unwrap();

        assert_eq!(second.served_from, ServedFrom::Network);
        assert_eq!(second.body, Bytes::from_static(b"<html>v2</html>"));
        assert_eq!(net.calls_to(page), 2);
    }

    #[tokio::test]
    async fn test_navigation_offline_serves_app_shell_snapshot() {
        let (net, router) = router().await;
        net.serve("https://app.example.com/", 200, "shell");
        router
            .handle(&CacheRequest::navigate(url("https://app.example.com/")))
            .await
            .unwrap();

        net.offline.store(true, Ordering::SeqCst);
        let response = router
            .handle(&CacheRequest::navigate(url("https://app.example.com/other")))
            .await
            .unwrap();
        assert_eq!(response.served_from, ServedFrom::Cache(CacheName::AppShell));
        assert_eq!(response.body, Bytes::from_static(b"shell"));
    }

    #[tokio::test]
    async fn test_offline_without_cache_serves_fallbacks() {
        let (net, router) = router().await;
        net.serve("https://app.example.com/offline.html", 200, "offline");
        net.serve("https://app.example.com/fallback-image.jpg", 200, "fallback");
        router.install(&PrecacheManifest::default()).await.unwrap();

        net.offline.store(true, Ordering::SeqCst);
        let page = router
            .handle(&CacheRequest::navigate(url("https://app.example.com/")))
            .await
            .unwrap();
        assert_eq!(page.served_from, ServedFrom::Fallback);
        assert_eq!(page.body, Bytes::from_static(b"offline"));

        let image = router
            .handle(&CacheRequest::image(url("https://cdn.example.net/x.png")))
            .await
            .unwrap();
        assert_eq!(image.served_from, ServedFrom::Fallback);
        assert_eq!(image.body, Bytes::from_static(b"fallback"));

        // Other classes surface the failure
        assert!(router
            .handle(&CacheRequest::asset(
                url("https://api.example.org/x"),
                Destination::Other
            ))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_fallback_is_synthesized() {
        let (net, router) = router().await;
        net.offline.store(true, Ordering::SeqCst);
        let page = router
            .handle(&CacheRequest::navigate(url("https://app.example.com/")))
            .await
            .unwrap();
        assert_eq!(page.served_from, ServedFrom::Synthesized);
        assert_eq!(page.status, 503);
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_serves_cached_then_refreshes() {
        let (net, router) = router().await;
        let css = "https://fonts.googleapis.com/css2?family=Inter";
        let request = CacheRequest::asset(url(css), Destination::Style);

        net.serve(css, 200, "v1");
        assert_eq!(
            router.handle(&request).await.unwrap().served_from,
            ServedFrom::Network
        );

        net.serve(css, 200, "v2");
        let stale = router.handle(&request).await.unwrap();
        assert_eq!(stale.body, Bytes::from_static(b"v1"));
        assert_eq!(stale.served_from, ServedFrom::Cache(CacheName::FontStylesheets));

        router.settle().await;
        let fresh = router.handle(&request).await.unwrap();
        assert_eq!(fresh.body, Bytes::from_static(b"v2"));
        router.settle().await;
        assert_eq!(net.calls_to(css), 3);
    }

    #[tokio::test]
    async fn test_only_200_is_cached() {
        let (net, router) = router().await;
        let img = "https://cdn.example.net/missing.png";
        let request = CacheRequest::image(url(img));

        assert_eq!(router.handle(&request).await.unwrap().status, 404);
        assert_eq!(router.handle(&request).await.unwrap().status, 404);
        assert_eq!(net.calls_to(img), 2);
    }

    #[tokio::test]
    async fn test_precache_install_route_and_cleanup() {
        let (net, router) = router().await;
        let js = "https://app.example.com/assets/app.js";
        net.serve(js, 200, "js-v1");
        net.serve("https://app.example.com/offline.html", 200, "offline");
        net.serve("https://app.example.com/fallback-image.jpg", 200, "fallback");

        let v1 = PrecacheManifest::new(vec![PrecacheEntry {
            url: "/assets/app.js".to_string(),
            revision: Some("1".to_string()),
        }]);
        let summary = router.install(&v1).await.unwrap();
        assert_eq!(summary.precached, 1);
        assert_eq!(summary.fallbacks, 2);

        let request = CacheRequest::asset(url(js), Destination::Script);
        let hit = router.handle(&request).await.unwrap();
        assert_eq!(hit.served_from, ServedFrom::Cache(CacheName::Precache));

        // Unlisted same-origin asset falls through to the network
        let other = CacheRequest::asset(url("https://app.example.com/other.css"), Destination::Style);
        assert_eq!(router.handle(&other).await.unwrap().served_from, ServedFrom::Network);

        // Re-install with the same revision reuses the entry
        assert_eq!(router.install(&v1).await.unwrap().reused, 1);

        net.serve(js, 200, "js-v2");
        let v2 = PrecacheManifest::new(vec![PrecacheEntry {
            url: "/assets/app.js".to_string(),
            revision: Some("2".to_string()),
        }]);
        router.install(&v2).await.unwrap();
        assert_eq!(router.cleanup_outdated().await.unwrap(), 1);
        assert_eq!(
            router.handle(&request).await.unwrap().body,
            Bytes::from_static(b"js-v2")
        );
    }

    #[tokio::test]
    async fn test_install_fails_on_missing_asset() {
        let (_net, router) = router().await;
        let manifest = PrecacheManifest::new(vec![PrecacheEntry {
            url: "/gone.js".to_string(),
            revision: None,
        }]);
        assert!(matches!(
            router.install(&manifest).await,
            Err(InstallError::BadStatus { status: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_cover_every_cache() {
        let (net, router) = router().await;
        net.serve(REMOTE_IMG, 200, "jpeg");
        router.handle(&CacheRequest::image(url(REMOTE_IMG))).await.unwrap();

        let stats = router.stats().await.unwrap();
        assert_eq!(stats.len(), CacheName::ALL.len());
        let remote = stats
            .iter()
            .find(|(name, _)| *name == CacheName::RemoteImages)
            .unwrap();
        assert_eq!(remote.1.total_entries, 1);
        assert_eq!(remote.1.total_size_bytes, 4);
    }
}
