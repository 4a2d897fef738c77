#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Polite HTTP transport for harvesting a storefront.
//!
//! Every request goes through [`transport::RetryingTransport`], which
//! admits at most a fixed number of requests at once, inserts the delay
//! chosen by the shared [`rate::AdaptiveRateController`], backs off when the
//! server answers HTTP 429, and retries transient failures with exponential
//! backoff. The network itself sits behind the [`client::HttpClient`] trait
//! so the retry policy can be exercised without a live server.

pub mod client;
pub mod rate;
#[cfg(any(test, feature = "scripted"))]
pub mod scripted;
pub mod transport;

pub use client::{HttpClient, HttpResponse, ReqwestClient};
pub use rate::{AdaptiveRateController, Pacing, RateSettings};
pub use transport::{DownloadOutcome, RetrySettings, RetryingTransport};

/// Errors that can occur while fetching.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The HTTP client reported a failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Status {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// A connection-level failure not originating from `reqwest`.
    #[error("Connection failed for {url}: {message}")]
    Connection {
        /// Requested URL.
        url: String,
        /// Description of the failure.
        message: String,
    },

    /// The response body was not valid JSON.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Writing a downloaded file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A configured request header could not be encoded.
    #[error("Invalid header '{name}': {message}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Why it was rejected.
        message: String,
    },

    /// The attempt budget ran out while the server kept throttling.
    #[error("Gave up on {url} after {attempts} attempts")]
    RetriesExhausted {
        /// Requested URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The admission gate was closed while waiting for a slot.
    #[error("Request admission gate closed")]
    GateClosed,
}

impl FetchError {
    /// Returns `true` if the failure is likely transient and worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            Self::Status { status, .. } => *status >= 500,
            Self::Connection { .. } => true,
            Self::Json(_)
            | Self::Io(_)
            | Self::InvalidHeader { .. }
            | Self::RetriesExhausted { .. }
            | Self::GateClosed => false,
        }
    }
}
