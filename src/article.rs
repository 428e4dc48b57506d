//! Article data model and document decoding.
//!
//! Articles arrive from the remote article source as loosely-typed JSON
//! documents. [`Article::from_document`] is the single place where a
//! document is turned into a typed [`Article`]; records that fail here are
//! skipped by the pagination client rather than failing a whole page.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Identity and Status
// ============================================================================

/// Opaque, store-assigned article identity. Stable across pages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(Arc<str>);

impl ArticleId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Editorial lifecycle status. Only `Published` is ever shown in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArticleStatus {
    Draft,
    Approved,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Approved => "approved",
            ArticleStatus::Published => "published",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A document that could not be decoded into an [`Article`].
#[derive(Debug, Error)]
pub enum ArticleShapeError {
    /// A required field is missing or has the wrong type.
    #[error("document {id} is malformed: {source}")]
    Malformed {
        id: String,
        #[source]
        source: serde_json::Error,
    },
    /// A required text field is present but blank.
    #[error("document {id} has an empty {field}")]
    EmptyField { id: String, field: &'static str },
}

// ============================================================================
// Article
// ============================================================================

/// A published news item.
///
/// String fields shown on every card use `Arc<str>` so the feed controller
/// can hand clones to the presentation layer cheaply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(skip)]
    pub id: ArticleId,
    pub title: Arc<str>,
    pub summary: Arc<str>,
    pub source_name: Arc<str>,
    pub original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub topics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub published_at: DateTime<Utc>,
    pub priority: i64,
    pub status: ArticleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Wire shape of an article document (camelCase keys, as stored upstream).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleFields {
    title: String,
    summary: String,
    source_name: String,
    original_url: String,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    topics: Option<Vec<String>>,
    #[serde(default)]
    region: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    published_at: DateTime<Utc>,
    #[serde(default)]
    priority: Option<i64>,
    status: ArticleStatus,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    updated_at: Option<DateTime<Utc>>,
}

/// Timestamps are accepted as RFC 3339 strings or epoch milliseconds.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(DateTime<Utc>),
}

impl RawTimestamp {
    fn into_datetime<E: serde::de::Error>(self) -> Result<DateTime<Utc>, E> {
        match self {
            RawTimestamp::Text(dt) => Ok(dt),
            RawTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    RawTimestamp::deserialize(deserializer)?.into_datetime()
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawTimestamp>::deserialize(deserializer)? {
        Some(raw) => raw.into_datetime().map(Some),
        None => Ok(None),
    }
}

impl Article {
    /// Decode a source document into an article.
    ///
    /// Required: `title`, `summary`, `sourceName`, `originalUrl`,
    /// `publishedAt`, `status`. Missing `createdAt`/`updatedAt` fall back to
    /// `publishedAt`; missing `priority` is 0; missing `topics` is empty.
    pub fn from_document(id: &str, fields: &serde_json::Value) -> Result<Self, ArticleShapeError> {
        let raw = ArticleFields::deserialize(fields).map_err(|source| {
            ArticleShapeError::Malformed {
                id: id.to_string(),
                source,
            }
        })?;

        for (field, value) in [
            ("title", &raw.title),
            ("sourceName", &raw.source_name),
            ("originalUrl", &raw.original_url),
        ] {
            if value.trim().is_empty() {
                return Err(ArticleShapeError::EmptyField {
                    id: id.to_string(),
                    field,
                });
            }
        }

        Ok(Article {
            id: ArticleId::new(id),
            title: Arc::from(raw.title),
            summary: Arc::from(raw.summary),
            source_name: Arc::from(raw.source_name),
            original_url: raw.original_url,
            image_url: raw.image_url.filter(|u| !u.trim().is_empty()),
            topics: raw.topics.unwrap_or_default(),
            region: raw.region,
            published_at: raw.published_at,
            priority: raw.priority.unwrap_or(0),
            status: raw.status,
            created_at: raw.created_at.unwrap_or(raw.published_at),
            updated_at: raw.updated_at.unwrap_or(raw.published_at),
        })
    }

    /// Encode the article back into its document form (without the id).
    pub fn to_document(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn is_published(&self) -> bool {
        self.status == ArticleStatus::Published
    }
}
