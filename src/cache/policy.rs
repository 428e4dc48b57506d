//! Request classification and per-cache expiration policy.

use std::fmt;
use std::time::Duration;
use url::{Origin, Url};

use super::request::{CacheRequest, Destination};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

pub const DEFAULT_REMOTE_IMAGE_ORIGIN: &str = "https://firebasestorage.googleapis.com";
pub const DEFAULT_FONT_STYLESHEET_ORIGIN: &str = "https://fonts.googleapis.com";
pub const DEFAULT_FONT_FILE_ORIGIN: &str = "https://fonts.gstatic.com";

// ============================================================================
// Named Caches
// ============================================================================

/// The independent named caches. Each has its own eviction budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheName {
    AppShell,
    Images,
    RemoteImages,
    FontStylesheets,
    FontFiles,
    Precache,
    OfflineFallbacks,
}

impl CacheName {
    pub const ALL: [CacheName; 7] = [
        CacheName::AppShell,
        CacheName::Images,
        CacheName::RemoteImages,
        CacheName::FontStylesheets,
        CacheName::FontFiles,
        CacheName::Precache,
        CacheName::OfflineFallbacks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheName::AppShell => "app-shell",
            CacheName::Images => "images",
            CacheName::RemoteImages => "remote-images",
            CacheName::FontStylesheets => "font-stylesheets",
            CacheName::FontFiles => "font-files",
            CacheName::Precache => "precache",
            CacheName::OfflineFallbacks => "offline-fallbacks",
        }
    }

    /// Eviction budget for this cache.
    pub fn expiration(&self) -> Expiration {
        match self {
            CacheName::AppShell => Expiration {
                max_entries: Some(1),
                max_age: Some(Duration::from_secs(DAY)),
                purge_on_quota_error: false,
            },
            CacheName::Images => Expiration {
                max_entries: Some(100),
                max_age: Some(Duration::from_secs(30 * DAY)),
                purge_on_quota_error: true,
            },
            CacheName::RemoteImages => Expiration {
                max_entries: Some(200),
                max_age: Some(Duration::from_secs(30 * DAY)),
                purge_on_quota_error: true,
            },
            CacheName::FontFiles => Expiration {
                max_entries: Some(30),
                max_age: Some(Duration::from_secs(365 * DAY)),
                purge_on_quota_error: false,
            },
            CacheName::FontStylesheets | CacheName::Precache | CacheName::OfflineFallbacks => {
                Expiration::default()
            }
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Count and age caps for one named cache, enforced lazily on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Expiration {
    pub max_entries: Option<u32>,
    pub max_age: Option<Duration>,
    /// On a storage-quota failure, drop this cache's entries and carry on
    pub purge_on_quota_error: bool,
}

impl Expiration {
    /// Whether an entry stored at `stored_at_ms` is past its age cap at `now_ms`.
    pub fn is_expired(&self, stored_at_ms: i64, now_ms: i64) -> bool {
        match self.max_age {
            Some(max_age) => now_ms.saturating_sub(stored_at_ms) > max_age.as_millis() as i64,
            None => false,
        }
    }
}

// ============================================================================
// Routing
// ============================================================================

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Network, falling back to cache on failure
    NetworkFirst(CacheName),
    /// Cache, else network and populate
    CacheFirst(CacheName),
    /// Cache immediately, refresh in the background
    StaleWhileRevalidate(CacheName),
    /// Manifest-driven cache, unlisted assets go to the network
    Precache,
    /// Not cached at all
    NetworkOnly,
}

/// Origin-based request classifier. First matching rule wins.
///
/// 1. navigations: network-first into `app-shell`
/// 2. the remote-image origin: cache-first into `remote-images`
/// 3. image destinations: cache-first into `images`
/// 4. the font stylesheet origin: stale-while-revalidate
/// 5. the font file origin: cache-first into `font-files`
/// 6. same-origin assets: precache
///
/// Everything else goes straight to the network.
///
/// The remote-image origin is matched before the image destination. Almost
/// every request to that origin is an image request, so with the rules the
/// other way round `remote-images` would never receive an entry and its
/// 200-entry budget would go unused. Images from that origin land there;
/// all other images share the 100-entry `images` cache.
#[derive(Debug, Clone)]
pub struct RouteTable {
    app_origin: Origin,
    remote_image_origin: Origin,
    font_stylesheet_origin: Origin,
    font_file_origin: Origin,
}

impl RouteTable {
    pub fn new(
        app_origin: &Url,
        remote_image_origin: &Url,
        font_stylesheet_origin: &Url,
        font_file_origin: &Url,
    ) -> Self {
        Self {
            app_origin: app_origin.origin(),
            remote_image_origin: remote_image_origin.origin(),
            font_stylesheet_origin: font_stylesheet_origin.origin(),
            font_file_origin: font_file_origin.origin(),
        }
    }

    /// Table for `app_origin` with the default third-party origins.
    pub fn for_app(app_origin: &Url) -> Result<Self, url::ParseError> {
        Ok(Self::new(
            app_origin,
            &Url::parse(DEFAULT_REMOTE_IMAGE_ORIGIN)?,
            &Url::parse(DEFAULT_FONT_STYLESHEET_ORIGIN)?,
            &Url::parse(DEFAULT_FONT_FILE_ORIGIN)?,
        ))
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.app_origin
    }

    pub fn classify(&self, request: &CacheRequest) -> Strategy {
        let origin = request.url.origin();

        if request.is_navigation() {
            Strategy::NetworkFirst(CacheName::AppShell)
        } else if origin == self.remote_image_origin {
            Strategy::CacheFirst(CacheName::RemoteImages)
        } else if request.destination == Destination::Image {
            Strategy::CacheFirst(CacheName::Images)
        } else if origin == self.font_stylesheet_origin {
            Strategy::StaleWhileRevalidate(CacheName::FontStylesheets)
        } else if origin == self.font_file_origin {
            Strategy::CacheFirst(CacheName::FontFiles)
        } else if origin == self.app_origin {
            Strategy::Precache
        } else {
            Strategy::NetworkOnly
        }
    }
}
