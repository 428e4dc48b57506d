//! Offline cache router.
//!
//! Every outbound request the app issues is classified by destination and
//! origin ([`RouteTable`]) and answered by exactly one strategy:
//! network-first, cache-first, stale-while-revalidate, precache or plain
//! network. Responses live in independent named caches ([`CacheName`]),
//! each with its own count and age budget enforced on write.
//!
//! - [`request`] - the request/response shapes the router sees
//! - [`policy`] - classification rules and per-cache expiration
//! - [`store`] - SQLite-backed named caches with quota handling
//! - [`fetcher`] - the network leg
//! - [`precache`] - the install-time asset manifest
//! - [`router`] - strategy execution, install and cleanup

pub mod fetcher;
pub mod policy;
pub mod precache;
pub mod request;
pub mod router;
pub mod store;

pub use fetcher::{Fetcher, HttpFetcher, NetworkError, NetworkResponse, DEFAULT_NETWORK_TIMEOUT};
pub use policy::{CacheName, Expiration, RouteTable, Strategy};
pub use precache::{PrecacheEntry, PrecacheIndex, PrecacheManifest};
pub use request::{CacheRequest, Destination, RequestMode, Response, ServedFrom};
pub use router::{CacheRouter, InstallError, InstallSummary};
pub use store::{CacheError, CacheStorage, Clock, DEFAULT_QUOTA_BYTES};
