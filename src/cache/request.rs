use bytes::Bytes;
use url::Url;

use super::policy::CacheName;

/// What the requester will do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    Document,
    Image,
    Font,
    Style,
    Script,
    #[default]
    Other,
}

/// How the request was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level document navigation
    Navigate,
    SameOrigin,
    #[default]
    Cors,
    NoCors,
}

/// An outbound request as seen by the cache router.
///
/// Only the URL, destination and mode are inspected; bodies never are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub url: Url,
    pub destination: Destination,
    pub mode: RequestMode,
}

impl CacheRequest {
    pub fn new(url: Url, destination: Destination, mode: RequestMode) -> Self {
        Self {
            url,
            destination,
            mode,
        }
    }

    /// A top-level navigation to `url`.
    pub fn navigate(url: Url) -> Self {
        Self::new(url, Destination::Document, RequestMode::Navigate)
    }

    /// An image fetch (`<img src>`).
    pub fn image(url: Url) -> Self {
        Self::new(url, Destination::Image, RequestMode::NoCors)
    }

    /// Any other subresource fetch.
    pub fn asset(url: Url, destination: Destination) -> Self {
        Self::new(url, destination, RequestMode::Cors)
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Cache key: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// Where a response handed back by the router came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Network,
    Cache(CacheName),
    /// Last-resort offline page or fallback image
    Fallback,
    /// Nothing usable was available; the router made up an error response
    Synthesized,
}

/// A response delivered to the requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub served_from: ServedFrom,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            status: 503,
            content_type: Some("text/plain".to_string()),
            body: Bytes::from_static(b"Offline"),
            served_from: ServedFrom::Synthesized,
        }
    }
}
