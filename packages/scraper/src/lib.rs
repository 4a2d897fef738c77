#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storefront scraping on top of the shared transport.
//!
//! - [`pagination`] walks the catalog listing endpoint page by page.
//! - [`lookup`] fetches a single product record by handle.
//! - [`metadata`] turns a product page's term/definition list into typed
//!   [`harvest_catalog_models::HtmlMetadata`].
//! - [`images`] names and downloads a product's images.
//!
//! All network access goes through [`harvest_fetch::RetryingTransport`];
//! nothing here talks to `reqwest` directly.

pub mod images;
pub mod lookup;
pub mod metadata;
pub mod pagination;

use scraper::Selector;

/// Errors that can occur during scraping operations.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    /// The transport gave up on a request.
    #[error("Fetch error: {0}")]
    Fetch(#[from] harvest_fetch::FetchError),

    /// A response did not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A product record could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression failed to compile.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// URLs of the storefront endpoints the harvester reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEndpoints {
    base_url: String,
    collection_path: String,
}

impl CatalogEndpoints {
    /// Creates endpoints rooted at `base_url` (trailing slashes ignored).
    #[must_use]
    pub fn new(base_url: &str, collection_path: &str) -> Self {
        let collection_path = if collection_path.starts_with('/') {
            collection_path.to_owned()
        } else {
            format!("/{collection_path}")
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            collection_path,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET {base}{collection}?page={n}`
    #[must_use]
    pub fn listing_page(&self, page: u32) -> String {
        let separator = if self.collection_path.contains('?') {
            '&'
        } else {
            '?'
        };
        format!(
            "{}{}{separator}page={page}",
            self.base_url, self.collection_path
        )
    }

    /// The product's HTML page.
    #[must_use]
    pub fn product_page(&self, handle: &str) -> String {
        format!("{}/products/{handle}", self.base_url)
    }

    /// The product's single-record JSON endpoint.
    #[must_use]
    pub fn product_json(&self, handle: &str) -> String {
        format!("{}/products/{handle}.json", self.base_url)
    }
}

/// Parses a CSS selector string, returning a [`ScrapeError`] on failure.
fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector)
        .map_err(|e| ScrapeError::Parse(format!("invalid CSS selector '{selector}': {e}")))
}
