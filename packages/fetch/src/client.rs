//! The network seam used by the transport.
//!
//! [`ReqwestClient`] is the production implementation. It sends the same
//! browser-like header set on every request and enforces a fixed total
//! timeout per request.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::FetchError;

/// Desktop Chrome user agent sent by default.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A fully-read HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw `Retry-After` header value, if the server sent one.
    pub retry_after: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        self.status == 429
    }
}

/// Issues a single GET request and reads the whole body.
///
/// Implementations must not retry; retry policy belongs to
/// [`crate::RetryingTransport`].
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if the request could not be completed. A
    /// non-success status is *not* an error at this level.
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

/// Header set sent with every request.
#[must_use]
pub fn browser_headers(user_agent: &str) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("User-Agent".to_owned(), user_agent.to_owned());
    headers.insert(
        "Accept".to_owned(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
            .to_owned(),
    );
    headers.insert(
        "Accept-Language".to_owned(),
        "en-US,en;q=0.9,fi;q=0.8".to_owned(),
    );
    headers.insert("Connection".to_owned(), "keep-alive".to_owned());
    headers.insert("DNT".to_owned(), "1".to_owned());
    headers.insert("Upgrade-Insecure-Requests".to_owned(), "1".to_owned());
    headers
}

/// [`HttpClient`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Builds a client that sends [`browser_headers`] and gives up on any
    /// single request after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if a header cannot be encoded or the TLS
    /// backend fails to initialize.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in &browser_headers(user_agent) {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                FetchError::InvalidHeader {
                    name: key.clone(),
                    message: e.to_string(),
                }
            })?;
            let val = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                FetchError::InvalidHeader {
                    name: key.clone(),
                    message: e.to_string(),
                }
            })?;
            header_map.insert(name, val);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}
