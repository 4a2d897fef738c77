//! Harvest configuration.
//!
//! Loaded from an optional TOML file; every key is optional and falls back
//! to the defaults below. The CLI applies its flags on top of the loaded
//! value and then calls [`HarvestConfig::validate`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use harvest_fetch::client::DEFAULT_USER_AGENT;
use harvest_fetch::{RateSettings, RetrySettings};
use harvest_scraper::CatalogEndpoints;
use harvest_scraper::pagination::DEFAULT_MAX_PAGES;
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Everything a harvest run can be tuned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Storefront origin, e.g. `https://kirja.fi`.
    pub base_url: String,
    /// Path of the paginated listing endpoint.
    pub collection_path: String,
    /// Capacity of the shared admission gate.
    pub max_concurrent_requests: usize,
    /// Delay before listing-page requests.
    pub request_delay_ms: u64,
    /// Delay before product-page requests; also the adaptive floor.
    pub html_request_delay_ms: u64,
    /// Adaptive delay ceiling.
    pub max_delay_ms: u64,
    /// Factor applied to the delay on recovery, in (0, 1).
    pub delay_decay: f64,
    pub max_retries: u32,
    pub retry_wait_min_ms: u64,
    pub retry_wait_max_ms: u64,
    pub request_timeout_secs: u64,
    /// Products processed concurrently per batch.
    pub batch_size: usize,
    /// Listing pages requested at most.
    pub max_pages: u32,
    /// Stop collecting after this many products.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_limit: Option<usize>,
    pub download_images: bool,
    pub fetch_html_metadata: bool,
    /// Root of all output.
    pub data_dir: PathBuf,
    pub user_agent: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://kirja.fi".to_owned(),
            collection_path: "/collections/all/products.json".to_owned(),
            max_concurrent_requests: 20,
            request_delay_ms: 50,
            html_request_delay_ms: 100,
            max_delay_ms: 10_000,
            delay_decay: 0.8,
            max_retries: 3,
            retry_wait_min_ms: 2_000,
            retry_wait_max_ms: 10_000,
            request_timeout_secs: 30,
            batch_size: 100,
            max_pages: DEFAULT_MAX_PAGES,
            product_limit: None,
            download_images: true,
            fetch_html_metadata: true,
            data_dir: PathBuf::from("data"),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HarvestConfig {
    /// Parses a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Toml`] if the document is malformed.
    pub fn from_toml_str(s: &str) -> Result<Self, PipelineError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Renders the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TomlRender`] if rendering fails.
    pub fn to_toml_string(&self) -> Result<String, PipelineError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings the run cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let fail = |msg: String| Err(PipelineError::Config(msg));

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return fail(format!("base_url must be an http(s) URL, got {:?}", self.base_url));
        }
        if self.max_concurrent_requests == 0 {
            return fail("max_concurrent_requests must be at least 1".to_owned());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_owned());
        }
        if self.max_pages == 0 {
            return fail("max_pages must be at least 1".to_owned());
        }
        if self.product_limit == Some(0) {
            return fail("product_limit must be at least 1 when set".to_owned());
        }
        if self.html_request_delay_ms > self.max_delay_ms {
            return fail(format!(
                "html_request_delay_ms ({}) exceeds max_delay_ms ({})",
                self.html_request_delay_ms, self.max_delay_ms
            ));
        }
        if !(self.delay_decay > 0.0 && self.delay_decay < 1.0) {
            return fail(format!(
                "delay_decay must be between 0 and 1 exclusive, got {}",
                self.delay_decay
            ));
        }
        if self.retry_wait_min_ms > self.retry_wait_max_ms {
            return fail(format!(
                "retry_wait_min_ms ({}) exceeds retry_wait_max_ms ({})",
                self.retry_wait_min_ms, self.retry_wait_max_ms
            ));
        }
        if self.request_timeout_secs == 0 {
            return fail("request_timeout_secs must be at least 1".to_owned());
        }

        Ok(())
    }

    #[must_use]
    pub fn endpoints(&self) -> CatalogEndpoints {
        CatalogEndpoints::new(&self.base_url, &self.collection_path)
    }

    #[must_use]
    pub fn rate_settings(&self) -> RateSettings {
        RateSettings {
            floor: Duration::from_millis(self.html_request_delay_ms),
            ceiling: Duration::from_millis(self.max_delay_ms),
            listing_delay: Duration::from_millis(self.request_delay_ms),
            decay: self.delay_decay,
        }
    }

    #[must_use]
    pub const fn retry_settings(&self) -> RetrySettings {
        RetrySettings {
            max_retries: self.max_retries,
            retry_wait_min: Duration::from_millis(self.retry_wait_min_ms),
            retry_wait_max: Duration::from_millis(self.retry_wait_max_ms),
        }
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn books_dir(&self) -> PathBuf {
        self.data_dir.join("books")
    }

    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    #[must_use]
    pub fn metadata_file(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }
}
