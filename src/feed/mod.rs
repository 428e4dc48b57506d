//! Feed delivery: pagination over the article source and the feed state
//! machine built on top of it.
//!
//! - [`cursor`] - query shapes and the opaque, query-bound page cursor
//! - [`pagination`] - bounded page fetches with `has_more` detection
//! - [`viewport`] - pure index arithmetic for the visibility signal
//! - [`controller`] - the feed state machine driven by the presentation layer
//!
//! # Example
//!
//! ```ignore
//! use swipefeed::feed::{FeedController, FeedSettings, PaginationClient};
//!
//! let client = PaginationClient::new(source);
//! let mut feed = FeedController::new(Arc::new(client), FeedSettings::default());
//! feed.start();
//! feed.settle().await;
//! feed.report_visible(feed.articles().len() - 1);
//! ```

pub mod controller;
pub mod cursor;
pub mod pagination;
pub mod viewport;

pub use controller::{FeedController, FeedEvent, FeedSettings, FeedStatus, LoadKind};
pub use cursor::{FeedQuery, PageCursor, QueryFingerprint};
pub use pagination::{
    FetchError, HasMoreStrategy, Page, PageLoader, PageRequest, PaginationClient,
    DEFAULT_FETCH_TIMEOUT,
};
