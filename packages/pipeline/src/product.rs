//! Per-product processing.
//!
//! One product flows through: handle check, optional product-page fetch
//! and metadata extraction, enrichment, durable write to
//! `{books_dir}/{handle}.json`, then image downloads. Failures are caught
//! here, logged, and counted; they never escape to the batch.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use harvest_catalog_models::{FetchMetadata, HtmlMetadata, Product};
use harvest_fetch::{Pacing, RetryingTransport};
use harvest_scraper::CatalogEndpoints;
use harvest_scraper::images::ImageFetcher;
use harvest_scraper::metadata::MetadataExtractor;

use crate::stats::RunStats;
use crate::{PipelineError, storage};

/// Processes single products against the shared transport.
pub struct ProductPipeline {
    transport: Arc<RetryingTransport>,
    endpoints: CatalogEndpoints,
    extractor: Option<MetadataExtractor>,
    images: Option<ImageFetcher>,
    books_dir: PathBuf,
    stats: Arc<RunStats>,
}

impl ProductPipeline {
    /// Creates a pipeline writing records under `books_dir`.
    ///
    /// Pass `None` for `extractor` or `images` to skip that stage.
    #[must_use]
    pub fn new(
        transport: Arc<RetryingTransport>,
        endpoints: CatalogEndpoints,
        extractor: Option<MetadataExtractor>,
        images: Option<ImageFetcher>,
        books_dir: impl Into<PathBuf>,
        stats: Arc<RunStats>,
    ) -> Self {
        Self {
            transport,
            endpoints,
            extractor,
            images,
            books_dir: books_dir.into(),
            stats,
        }
    }

    /// Processes one raw listing entry. Returns whether its record was
    /// written.
    ///
    /// A product without a handle is skipped with a warning and not
    /// counted. Every other failure is logged and adds to the error
    /// counter.
    pub async fn process(&self, raw: serde_json::Value) -> bool {
        let label = raw
            .get("handle")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown")
            .to_owned();

        match self.try_process(raw).await {
            Ok(()) => true,
            Err(PipelineError::MissingHandle) => {
                log::warn!("Product missing handle, skipping");
                false
            }
            Err(e) => {
                log::error!("Error processing product {label}: {e}");
                self.stats.record_error();
                false
            }
        }
    }

    async fn try_process(&self, raw: serde_json::Value) -> Result<(), PipelineError> {
        let mut product = Product::from_value(raw)?;
        let handle = checked_handle(&product)?.to_owned();

        if let Some(metadata) = self.fetch_html_metadata(&handle).await {
            product.html_metadata = Some(metadata);
        }

        product.fetch_metadata = Some(FetchMetadata {
            fetched_at: Utc::now(),
            product_url: self.endpoints.product_page(&handle),
            api_url: self.endpoints.product_json(&handle),
        });

        let path = self.books_dir.join(format!("{handle}.json"));
        storage::write_json_atomic(&path, &product).await?;
        self.stats.record_book();
        log::debug!("Saved {}", path.display());

        if let Some(images) = &self.images {
            let report = images.download_all(&product).await;
            self.stats.record_images(report.present as u64);
            self.stats.record_errors(report.failed as u64);
        }

        Ok(())
    }

    /// Fetches and parses the product page. A failed fetch is logged and
    /// leaves the product without HTML metadata.
    async fn fetch_html_metadata(&self, handle: &str) -> Option<HtmlMetadata> {
        let extractor = self.extractor.as_ref()?;
        let url = self.endpoints.product_page(handle);

        match self.transport.fetch_html(&url, Pacing::Detail).await {
            Ok(html) => Some(extractor.extract(&html)).filter(|m| !m.is_empty()),
            Err(e) => {
                log::error!("Error fetching HTML metadata for {handle}: {e}");
                None
            }
        }
    }
}

/// The product's handle, if it is present and safe to use as a file stem.
///
/// The handle names the record file and both URLs exactly as stored in the
/// record, so surrounding whitespace is rejected rather than trimmed.
fn checked_handle(product: &Product) -> Result<&str, PipelineError> {
    let handle = product.handle().unwrap_or_default();

    if handle.trim().is_empty() {
        return Err(PipelineError::MissingHandle);
    }
    if handle.trim() != handle || handle.contains(['/', '\\']) || handle.contains("..") {
        return Err(PipelineError::InvalidHandle(handle.to_owned()));
    }

    Ok(handle)
}
