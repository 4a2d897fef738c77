#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the catalog harvester.
//!
//! Uses `indicatif-log-bridge` (via [`harvest_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and the batch progress bar never fight for the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use harvest_cli_utils::IndicatifProgress;
use harvest_fetch::ReqwestClient;
use harvest_pipeline::{HarvestConfig, RunCoordinator, RunOutcome};

#[derive(Parser)]
#[command(name = "harvest", about = "Storefront catalog harvester")]
struct Cli {
    /// TOML configuration file; defaults are used for missing keys
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the whole catalog (the default)
    Run,
    /// Fetch and process a single product by handle
    Product {
        /// Product handle (e.g., "`tuntematon-sotilas-9789510000001`")
        handle: String,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

/// Flags applied on top of the configuration file.
#[derive(Args)]
struct Overrides {
    /// Storefront base URL
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Stop after this many products (for testing)
    #[arg(long, global = true)]
    limit: Option<usize>,
    /// Maximum simultaneous requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Products processed per batch
    #[arg(long, global = true)]
    batch_size: Option<usize>,
    /// Maximum listing pages to request
    #[arg(long, global = true)]
    max_pages: Option<u32>,
    /// Output directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Skip image downloads
    #[arg(long, global = true)]
    no_images: bool,
    /// Skip product page metadata extraction
    #[arg(long, global = true)]
    no_metadata: bool,
}

impl Overrides {
    fn apply(self, config: &mut HarvestConfig) {
        if let Some(base_url) = self.base_url {
            config.base_url = base_url;
        }
        if self.limit.is_some() {
            config.product_limit = self.limit;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrent_requests = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if self.no_images {
            config.download_images = false;
        }
        if self.no_metadata {
            config.fetch_html_metadata = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = harvest_cli_utils::init_logger();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarvestConfig::load(path)?,
        None => HarvestConfig::default(),
    };
    cli.overrides.apply(&mut config);
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ShowConfig => {
            print!("{}", config.to_toml_string()?);
        }
        Commands::Run => {
            let client = Arc::new(ReqwestClient::new(&config.user_agent, config.request_timeout())?);
            let progress = IndicatifProgress::products_bar(&multi, "Collecting catalog...");
            let coordinator = RunCoordinator::new(config, client)?.with_progress(progress);

            match coordinator.run().await {
                Ok(RunOutcome::Completed(summary)) => {
                    log::info!(
                        "Wrote {} products ({} errors)",
                        summary.statistics.books_fetched,
                        summary.statistics.errors
                    );
                }
                Ok(RunOutcome::NoProducts) => {}
                Err(e) => {
                    log::error!("Fatal error during harvest: {e}");
                    return Err(e.into());
                }
            }
        }
        Commands::Product { handle } => {
            let client = Arc::new(ReqwestClient::new(&config.user_agent, config.request_timeout())?);
            let coordinator = RunCoordinator::new(config, client)?;
            let written = coordinator.run_product(&handle).await?;
            let stats = coordinator.stats();

            if !written {
                return Err(format!("Product {handle} was not saved").into());
            }
            log::info!(
                "Saved {handle}: {} images, {} errors",
                stats.images_downloaded(),
                stats.errors()
            );
        }
    }

    Ok(())
}
