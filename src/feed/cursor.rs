//! Feed query shapes and the opaque page cursor bound to them.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::article::ArticleStatus;
use crate::source::{SourceCursor, SourceQuery, SORT_FIELD};

/// The two query shapes the feed paginates over.
///
/// Both filter on `status == published` and sort by publish time
/// descending; `Topic` additionally requires the topic tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum FeedQuery {
    #[default]
    Latest,
    Topic(String),
}

impl FeedQuery {
    pub fn topic(&self) -> Option<&str> {
        match self {
            FeedQuery::Latest => None,
            FeedQuery::Topic(topic) => Some(topic),
        }
    }

    /// Stable digest of the filter and sort definition.
    pub fn fingerprint(&self) -> QueryFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"status=");
        hasher.update(ArticleStatus::Published.as_str().as_bytes());
        if let Some(topic) = self.topic() {
            hasher.update(b";topics~");
            hasher.update((topic.len() as u64).to_be_bytes());
            hasher.update(topic.as_bytes());
        }
        hasher.update(b";orderBy=");
        hasher.update(SORT_FIELD.as_bytes());
        hasher.update(b";direction=desc");
        QueryFingerprint(hasher.finalize().into())
    }

    pub(crate) fn source_query(&self, limit: u32, start_after: Option<SourceCursor>) -> SourceQuery {
        SourceQuery {
            status: ArticleStatus::Published,
            topic: self.topic().map(str::to_string),
            limit,
            start_after,
        }
    }
}

impl fmt::Display for FeedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedQuery::Latest => f.write_str("latest"),
            FeedQuery::Topic(topic) => write!(f, "topic:{topic}"),
        }
    }
}

/// Digest identifying one filter+sort definition.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryFingerprint([u8; 32]);

impl fmt::Debug for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryFingerprint(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Position after the last document of a page.
///
/// Valid only for the query that produced it: the pagination client
/// rejects a cursor whose fingerprint differs from the requested query.
#[derive(Clone, PartialEq, Eq)]
pub struct PageCursor {
    fingerprint: QueryFingerprint,
    token: SourceCursor,
}

impl PageCursor {
    pub(crate) fn new(query: &FeedQuery, token: SourceCursor) -> Self {
        Self {
            fingerprint: query.fingerprint(),
            token,
        }
    }

    pub fn belongs_to(&self, query: &FeedQuery) -> bool {
        self.fingerprint == query.fingerprint()
    }

    pub(crate) fn token(&self) -> &SourceCursor {
        &self.token
    }
}

impl fmt::Debug for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageCursor")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprints_distinguish_queries() {
        let latest = FeedQuery::Latest;
        let housing = FeedQuery::Topic("Housing".to_string());
        let politics = FeedQuery::Topic("Politics".to_string());

        assert_eq!(latest.fingerprint(), FeedQuery::Latest.fingerprint());
        assert_ne!(latest.fingerprint(), housing.fingerprint());
        assert_ne!(housing.fingerprint(), politics.fingerprint());
    }

    #[test]
    fn test_cursor_bound_to_its_query() {
        let housing = FeedQuery::Topic("Housing".to_string());
        let cursor = PageCursor::new(&housing, SourceCursor::new("t"));
        assert!(cursor.belongs_to(&housing));
        assert!(!cursor.belongs_to(&FeedQuery::Latest));
    }

    #[test]
    fn test_source_query_carries_topic() {
        let q = FeedQuery::Topic("Housing".to_string()).source_query(5, None);
        assert_eq!(q.status, ArticleStatus::Published);
        assert_eq!(q.topic.as_deref(), Some("Housing"));
        assert_eq!(q.limit, 5);
    }
}
