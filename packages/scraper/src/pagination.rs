//! Catalog listing pagination.
//!
//! Pages are requested strictly one after another starting at page 1. An
//! empty page is the only end-of-catalog signal the storefront gives; a
//! fixed page ceiling bounds the walk against an endpoint that never runs
//! dry.

use std::sync::Arc;

use harvest_catalog_models::StopReason;
use harvest_fetch::{Pacing, RetryingTransport};

use crate::{CatalogEndpoints, ScrapeError};

/// Default safety ceiling on listing pages.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// Result of fetching one listing page.
#[derive(Debug)]
pub enum PageOutcome {
    /// The page had products.
    Items(Vec<serde_json::Value>),
    /// The page was empty: the catalog is exhausted.
    Empty,
    /// The transport gave up on the page, or the body had no `products`
    /// array.
    Failed(ScrapeError),
}

/// Everything a pagination walk produced.
#[derive(Debug)]
pub struct Collection {
    /// Raw product records in page order.
    pub products: Vec<serde_json::Value>,
    /// Non-empty pages received.
    pub pages_fetched: u32,
    /// Why the walk ended.
    pub stop_reason: StopReason,
    /// Pages that failed to fetch or decode (zero or one).
    pub page_errors: u64,
}

/// Walks the listing endpoint.
pub struct PaginationCollector {
    transport: Arc<RetryingTransport>,
    endpoints: CatalogEndpoints,
}

impl PaginationCollector {
    #[must_use]
    pub const fn new(transport: Arc<RetryingTransport>, endpoints: CatalogEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// Fetches a single listing page.
    ///
    /// The first page is requested without the pre-request delay; later
    /// pages use the listing delay.
    pub async fn fetch_page(&self, page: u32) -> PageOutcome {
        let url = self.endpoints.listing_page(page);
        let pacing = if page <= 1 {
            Pacing::Unpaced
        } else {
            Pacing::Listing
        };

        let body = match self.transport.fetch_json(&url, pacing).await {
            Ok(body) => body,
            Err(e) => return PageOutcome::Failed(e.into()),
        };

        match body.get("products").and_then(serde_json::Value::as_array) {
            None => PageOutcome::Failed(ScrapeError::Parse(format!(
                "listing page {page} has no 'products' array"
            ))),
            Some(products) if products.is_empty() => PageOutcome::Empty,
            Some(products) => PageOutcome::Items(products.clone()),
        }
    }

    /// Collects every product, stopping at the first empty or failed page,
    /// after `page_limit` pages, or once `item_limit` products are held.
    ///
    /// A failed page is counted in [`Collection::page_errors`]; whatever
    /// was collected before it is kept.
    pub async fn collect_all(&self, page_limit: u32, item_limit: Option<usize>) -> Collection {
        log::info!("Starting to fetch all products...");

        let item_limit = item_limit.filter(|&limit| limit > 0);
        let mut products: Vec<serde_json::Value> = Vec::new();
        let mut pages_fetched: u32 = 0;
        let mut page_errors: u64 = 0;
        let mut stop_reason = StopReason::PageLimit;
        let mut page: u32 = 1;

        while page <= page_limit {
            match self.fetch_page(page).await {
                PageOutcome::Empty => {
                    log::info!("No more products found at page {page}");
                    stop_reason = StopReason::Exhausted;
                    break;
                }
                PageOutcome::Failed(e) => {
                    log::error!("Error fetching page {page}: {e}");
                    page_errors += 1;
                    stop_reason = StopReason::PageFailed { page };
                    break;
                }
                PageOutcome::Items(items) => {
                    log::info!("Page {page}: Fetched {} products", items.len());
                    pages_fetched += 1;
                    products.extend(items);

                    if let Some(limit) = item_limit
                        && products.len() >= limit
                    {
                        log::info!("Reached limit of {limit} products");
                        products.truncate(limit);
                        stop_reason = StopReason::ItemLimit;
                        break;
                    }
                }
            }

            page += 1;
        }

        if stop_reason == StopReason::PageLimit {
            log::warn!("Reached max pages ({page_limit}), stopping");
        }

        log::info!("Total products fetched: {}", products.len());
        Collection {
            products,
            pages_fetched,
            stop_reason,
            page_errors,
        }
    }
}
