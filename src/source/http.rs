use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

use super::{ArticleSource, SourceCursor, SourceDocument, SourceError, SourceQuery, SORT_FIELD};

/// Response bodies larger than this are rejected (OOM protection)
const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB

#[derive(Debug, Deserialize)]
struct QueryResponse {
    documents: Vec<WireDocument>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    id: String,
    cursor: String,
    #[serde(default)]
    fields: serde_json::Value,
}

/// Article source that queries a JSON document-store endpoint.
///
/// `GET {base}/articles?status=..&orderBy=publishedAt&direction=desc&limit=..`
/// with optional `topic` and `startAfter`, answering
/// `{"documents": [{"id", "cursor", "fields"}]}`.
pub struct HttpSource {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<SecretString>,
    max_response_size: usize,
    closed: AtomicBool,
}

/// Mask the API key so it never reaches logs.
impl fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSource")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl HttpSource {
    /// Build a source for the store rooted at `base_url`.
    pub fn open(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
    ) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join("articles")?;
        tracing::debug!(endpoint = %endpoint, "Opened HTTP article source");
        Ok(Self {
            client,
            endpoint,
            api_key: api_key.map(SecretString::from),
            max_response_size: MAX_RESPONSE_SIZE,
            closed: AtomicBool::new(false),
        })
    }

    /// Override the response body cap.
    pub fn with_max_response_size(mut self, limit: usize) -> Self {
        self.max_response_size = limit;
        self
    }

    fn request_url(&self, query: &SourceQuery) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("status", query.status.as_str())
                .append_pair("orderBy", SORT_FIELD)
                .append_pair("direction", "desc")
                .append_pair("limit", &query.limit.to_string());
            if let Some(topic) = &query.topic {
                pairs.append_pair("topic", topic);
            }
            if let Some(cursor) = &query.start_after {
                pairs.append_pair("startAfter", cursor.as_str());
            }
        }
        url
    }
}

#[async_trait]
impl ArticleSource for HttpSource {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<SourceDocument>, SourceError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Unavailable);
        }

        let mut request = self
            .client
            .get(self.request_url(query))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = %status, "Article source returned an error status");
            return Err(SourceError::HttpStatus(status.as_u16()));
        }

        let bytes = read_limited_bytes(response, self.max_response_size).await?;

        let body: QueryResponse =
            serde_json::from_slice(&bytes).map_err(|e| SourceError::InvalidBody(e.to_string()))?;

        Ok(body
            .documents
            .into_iter()
            .map(|doc| SourceDocument {
                id: doc.id,
                cursor: SourceCursor::new(doc.cursor),
                fields: doc.fields,
            })
            .collect())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::debug!(endpoint = %self.endpoint, "Closed HTTP article source");
    }
}

/// Read the body chunk by chunk, stopping as soon as it passes `limit`.
///
/// Content-Length is only a hint: chunked bodies carry none.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Bytes, SourceError> {
    if let Some(len) = response.content_length() {
        if len > limit as u64 {
            return Err(SourceError::InvalidBody("response too large".to_string()));
        }
    }

    let mut bytes = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            tracing::warn!(limit, "Article source response exceeded the size limit");
            return Err(SourceError::InvalidBody("response too large".to_string()));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes.freeze())
}
