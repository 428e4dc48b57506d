//! The router's network leg.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default wall-clock bound on one network fetch.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// A network fetch that produced no response at all.
///
/// HTTP error statuses are responses, not failures.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Transport-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// A response as read off the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, url: &Url) -> Result<NetworkResponse, NetworkError>;
}

/// [`Fetcher`] over an explicitly constructed `reqwest::Client`.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<NetworkResponse, NetworkError> {
        tokio::time::timeout(self.timeout, async {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = read_limited_bytes(response, MAX_BODY_SIZE).await?;
            Ok::<_, NetworkError>(NetworkResponse {
                status,
                content_type,
                body,
            })
        })
        .await
        .map_err(|_| NetworkError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Bytes, NetworkError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(NetworkError::ResponseTooLarge);
        }
    }

    let mut bytes = BytesMut::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(NetworkError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(NetworkError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_reads_status_type_and_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(b"jpeg".to_vec()),
            )
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/a.jpg", mock_server.uri())).unwrap();
        let response = fetcher.fetch(&url).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(response.body, Bytes::from_static(b"jpeg"));
    }

    #[tokio::test]
    async fn test_error_status_is_a_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let fetcher = HttpFetcher::new(reqwest::Client::new());
        let url = Url::parse(&mock_server.uri()).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap().status, 404);
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let fetcher =
            HttpFetcher::new(reqwest::Client::new()).with_timeout(Duration::from_millis(100));
        let url = Url::parse(&mock_server.uri()).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(NetworkError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_request_error() {
        let fetcher = HttpFetcher::new(reqwest::Client::new());
        // Port 9 (discard) on localhost is not served by anything in tests
        let url = Url::parse("http://127.0.0.1:9/").unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(NetworkError::Request(_))
        ));
    }
}
