//! Product image download.
//!
//! Files are named `{isbn}.{ext}` for the first image and
//! `{isbn}_{index}.{ext}` for the rest, where the base falls back to the
//! product id when no variant carries a SKU. Existing files are never
//! fetched again.

use std::path::PathBuf;
use std::sync::Arc;

use harvest_catalog_models::{ImageDescriptor, Product};
use harvest_fetch::{DownloadOutcome, RetryingTransport};

const DEFAULT_EXTENSION: &str = "jpg";

/// Per-product download tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageReport {
    /// Images now on disk, whether fetched in this run or already present.
    pub present: usize,
    /// Newly written during this call.
    pub downloaded: usize,
    /// Images whose download failed after retries.
    pub failed: usize,
}

/// Downloads product images into a single directory.
pub struct ImageFetcher {
    transport: Arc<RetryingTransport>,
    images_dir: PathBuf,
}

impl ImageFetcher {
    #[must_use]
    pub fn new(transport: Arc<RetryingTransport>, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            images_dir: images_dir.into(),
        }
    }

    /// Downloads every image of `product` in list order.
    ///
    /// A failed image is logged and counted in the report; the remaining
    /// images are still attempted.
    pub async fn download_all(&self, product: &Product) -> ImageReport {
        let mut report = ImageReport::default();
        let descriptors = product.image_descriptors();
        if descriptors.is_empty() {
            return report;
        }

        let base = safe_base_name(&product.image_base_name());

        for descriptor in descriptors {
            let url = absolute_url(&descriptor.url);
            let destination = self.images_dir.join(image_filename(&base, &descriptor));

            log::debug!("Downloading image: {url}");
            match self.transport.download_binary(&url, &destination).await {
                Ok(DownloadOutcome::Downloaded { .. }) => {
                    report.present += 1;
                    report.downloaded += 1;
                }
                Ok(DownloadOutcome::AlreadyPresent) => report.present += 1,
                Err(e) => {
                    log::error!(
                        "Error downloading image for {}: {e}",
                        product.handle().unwrap_or("unknown")
                    );
                    report.failed += 1;
                }
            }
        }

        report
    }
}

/// Local filename for an image of a product whose base name is `base`.
#[must_use]
pub fn image_filename(base: &str, descriptor: &ImageDescriptor) -> String {
    let ext = extension_from_url(&descriptor.url);
    if descriptor.index == 0 {
        format!("{base}.{ext}")
    } else {
        format!("{base}_{}.{ext}", descriptor.index)
    }
}

/// The text after the last dot of the URL path's final segment, ignoring
/// any query string. Defaults to `jpg`.
#[must_use]
pub fn extension_from_url(url: &str) -> String {
    let path = reqwest::Url::parse(&absolute_url(url)).map_or_else(
        |_| url.split(['?', '#']).next().unwrap_or_default().to_owned(),
        |parsed| parsed.path().to_owned(),
    );

    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_EXTENSION)
        .to_owned()
}

/// Storefront CDNs sometimes hand out protocol-relative URLs.
fn absolute_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_owned()
    }
}

fn safe_base_name(base: &str) -> String {
    base.replace(['/', '\\'], "_")
}
