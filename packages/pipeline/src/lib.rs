#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Harvest orchestration.
//!
//! [`RunCoordinator`] collects the catalog, fans products out to
//! [`ProductPipeline`] in sequential batches, and writes the run summary.
//! All network traffic shares one [`harvest_fetch::RetryingTransport`], so
//! a single admission gate and a single adaptive delay govern the whole
//! run.

pub mod config;
pub mod product;
pub mod progress;
pub mod run;
pub mod stats;
pub mod storage;

pub use config::HarvestConfig;
pub use product::ProductPipeline;
pub use run::{RunCoordinator, RunOutcome};
pub use stats::RunStats;

/// Errors that can occur while running a harvest.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A scraping step failed.
    #[error("Scrape error: {0}")]
    Scrape(#[from] harvest_scraper::ScrapeError),

    /// A file could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The configuration could not be rendered.
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),

    /// A configuration value is out of range.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A product handle is not usable as a file stem.
    #[error("Invalid product handle: {0:?}")]
    InvalidHandle(String),

    /// A product record has no handle.
    #[error("Product missing handle")]
    MissingHandle,
}
