//! swipefeed: the data core of a swipe-by-swipe news reader.
//!
//! - [`source`] - article stores behind one async query trait
//! - [`feed`] - cursor pagination and the feed controller state machine
//! - [`cache`] - offline request routing over named SQLite-backed caches
//! - [`persistence`] / [`install`] - durable flags and the install lifecycle
//! - [`storage`] - the shared SQLite database

pub mod article;
pub mod cache;
pub mod config;
pub mod feed;
pub mod install;
pub mod persistence;
pub mod source;
pub mod storage;
pub mod util;

pub use article::{Article, ArticleId, ArticleStatus};
pub use config::Config;
