//! Single-product lookup by handle.

use harvest_fetch::{Pacing, RetryingTransport};

use crate::{CatalogEndpoints, ScrapeError};

/// Fetches one raw product record from `GET {base}/products/{handle}.json`.
///
/// # Errors
///
/// Returns [`ScrapeError`] if the request fails or the body has no
/// `product` object.
pub async fn fetch_product(
    transport: &RetryingTransport,
    endpoints: &CatalogEndpoints,
    handle: &str,
) -> Result<serde_json::Value, ScrapeError> {
    let url = endpoints.product_json(handle);
    let mut body = transport.fetch_json(&url, Pacing::Detail).await?;

    match body.get_mut("product").map(serde_json::Value::take) {
        Some(product @ serde_json::Value::Object(_)) => Ok(product),
        _ => Err(ScrapeError::Parse(format!(
            "response for '{handle}' has no 'product' object"
        ))),
    }
}
