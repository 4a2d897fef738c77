//! Whole-run orchestration.
//!
//! Collect every product, process them in fixed-size batches (each batch
//! runs concurrently, batches run one after another), then write the
//! aggregate `metadata.json`. A failed listing page ends collection early
//! and is counted; only setup and summary-writing failures end the run.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use harvest_catalog_models::{
    ConfigSnapshot, PaginationSummary, ProductSummary, RunSummary, StopReason,
};
use harvest_fetch::{AdaptiveRateController, HttpClient, RetryingTransport};
use harvest_scraper::CatalogEndpoints;
use harvest_scraper::images::ImageFetcher;
use harvest_scraper::lookup;
use harvest_scraper::metadata::MetadataExtractor;
use harvest_scraper::pagination::PaginationCollector;

use crate::config::HarvestConfig;
use crate::product::ProductPipeline;
use crate::progress::{ProgressCallback, null_progress};
use crate::stats::RunStats;
use crate::{PipelineError, storage};

const RULE: &str = "============================================================";

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Products were processed and the summary was written.
    Completed(Box<RunSummary>),
    /// The catalog yielded no products; nothing was written.
    NoProducts,
}

/// Drives a harvest run from a validated [`HarvestConfig`].
pub struct RunCoordinator {
    config: HarvestConfig,
    endpoints: CatalogEndpoints,
    transport: Arc<RetryingTransport>,
    pipeline: ProductPipeline,
    stats: Arc<RunStats>,
    progress: Arc<dyn ProgressCallback>,
}

impl RunCoordinator {
    /// Wires the transport, scraper stages, and pipeline for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the configuration is invalid or the
    /// metadata extractor cannot be built.
    pub fn new(config: HarvestConfig, client: Arc<dyn HttpClient>) -> Result<Self, PipelineError> {
        config.validate()?;

        let endpoints = config.endpoints();
        let transport = Arc::new(RetryingTransport::new(
            client,
            config.max_concurrent_requests,
            AdaptiveRateController::new(config.rate_settings()),
            config.retry_settings(),
        ));
        let stats = Arc::new(RunStats::new());

        let extractor = if config.fetch_html_metadata {
            Some(MetadataExtractor::new()?)
        } else {
            None
        };
        let images = config
            .download_images
            .then(|| ImageFetcher::new(transport.clone(), config.images_dir()));

        let pipeline = ProductPipeline::new(
            transport.clone(),
            endpoints.clone(),
            extractor,
            images,
            config.books_dir(),
            stats.clone(),
        );

        Ok(Self {
            config,
            endpoints,
            transport,
            pipeline,
            stats,
            progress: null_progress(),
        })
    }

    /// Reports batch progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    #[must_use]
    pub fn rate(&self) -> &AdaptiveRateController {
        self.transport.rate()
    }

    /// Runs a full harvest.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if output directories cannot be created or
    /// `metadata.json` cannot be written.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        let start = Instant::now();
        self.stats.mark_started();

        log::info!("{RULE}");
        log::info!("Starting catalog harvest from {}", self.endpoints.base_url());
        log::info!("{RULE}");

        self.prepare_dirs().await?;

        let collector = PaginationCollector::new(self.transport.clone(), self.endpoints.clone());
        let collection = collector
            .collect_all(self.config.max_pages, self.config.product_limit)
            .await;
        self.stats.record_errors(collection.page_errors);
        if let StopReason::PageFailed { page } = collection.stop_reason {
            log::warn!(
                "Catalog collection stopped early at page {page}; continuing with {} products",
                collection.products.len()
            );
        }

        if collection.products.is_empty() {
            log::warn!("No products found!");
            self.progress.abandon();
            return Ok(RunOutcome::NoProducts);
        }

        let products_summary: Vec<ProductSummary> = collection
            .products
            .iter()
            .map(ProductSummary::from_raw)
            .collect();

        self.process_batches(collection.products).await;

        self.stats.mark_finished();
        let summary = RunSummary {
            scraped_at: Utc::now(),
            total_products: products_summary.len(),
            statistics: self.stats.snapshot(self.rate().throttle_hits()),
            config: self.config_snapshot(),
            pagination: PaginationSummary {
                pages_fetched: collection.pages_fetched,
                stop_reason: collection.stop_reason,
            },
            products_summary,
        };

        let metadata_file = self.config.metadata_file();
        storage::write_json_atomic(&metadata_file, &summary).await?;
        log::info!("Metadata saved to {}", metadata_file.display());

        self.log_summary(start);
        Ok(RunOutcome::Completed(Box::new(summary)))
    }

    /// Fetches one product by handle and runs it through the pipeline.
    /// Returns whether its record was written.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the output directories cannot be
    /// created or the product cannot be fetched.
    pub async fn run_product(&self, handle: &str) -> Result<bool, PipelineError> {
        self.stats.mark_started();
        self.prepare_dirs().await?;

        let raw = lookup::fetch_product(&self.transport, &self.endpoints, handle).await?;
        let written = self.pipeline.process(raw).await;

        self.stats.mark_finished();
        Ok(written)
    }

    async fn prepare_dirs(&self) -> Result<(), PipelineError> {
        storage::ensure_dir(&self.config.books_dir()).await?;
        if self.config.download_images {
            storage::ensure_dir(&self.config.images_dir()).await?;
        }
        Ok(())
    }

    async fn process_batches(&self, products: Vec<serde_json::Value>) {
        let total = products.len();
        let batch_size = self.config.batch_size;

        log::info!("Processing {total} products in batches of {batch_size}...");
        self.progress.products_collected(total as u64);

        let mut remaining = products.into_iter();
        let mut processed = 0_usize;

        loop {
            let batch: Vec<serde_json::Value> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            let len = batch.len();

            futures::future::join_all(batch.into_iter().map(|raw| self.pipeline.process(raw)))
                .await;

            processed += len;
            self.progress.batch_finished(len as u64, self.stats.errors());
            log::info!(
                "Progress: {processed}/{total} products processed ({}%) | images: {} | errors: {} | delay: {:?}",
                processed * 100 / total,
                self.stats.images_downloaded(),
                self.stats.errors(),
                self.rate().current_delay(),
            );
        }

        self.progress.finish(processed as u64);
    }

    fn config_snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            max_concurrent_requests: self.config.max_concurrent_requests,
            request_delay_ms: self.config.request_delay_ms,
            html_request_delay_ms: self.config.html_request_delay_ms,
            download_images: self.config.download_images,
            fetch_html_metadata: self.config.fetch_html_metadata,
            final_delay_ms: u64::try_from(self.rate().current_delay().as_millis())
                .unwrap_or(u64::MAX),
        }
    }

    fn log_summary(&self, start: Instant) {
        log::info!("{RULE}");
        log::info!("Harvest completed!");
        log::info!("Books fetched: {}", self.stats.books_fetched());
        log::info!("Images downloaded: {}", self.stats.images_downloaded());
        log::info!(
            "HTML metadata extraction: {}",
            if self.config.fetch_html_metadata {
                "Enabled"
            } else {
                "Disabled"
            }
        );
        log::info!("Rate limit hits (429): {}", self.rate().throttle_hits());
        log::info!("Final request delay: {:?}", self.rate().current_delay());
        log::info!("Errors: {}", self.stats.errors());
        log::info!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
        log::info!("{RULE}");
    }
}
