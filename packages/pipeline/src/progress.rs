//! Batch progress reporting.
//!
//! [`crate::RunCoordinator`] reports at batch granularity: the product
//! count once the catalog is collected, then one call per finished batch.
//! The CLI renders this with `indicatif`; tests use [`NullProgress`].

use std::sync::Arc;

/// Receives progress from a harvest run.
///
/// Shared across the run behind an `Arc`, hence `Send + Sync`.
pub trait ProgressCallback: Send + Sync {
    /// The catalog has been collected and `products` will be processed.
    fn products_collected(&self, products: u64);

    /// A batch of `batch_len` products finished. `errors` is the run's
    /// error counter after the batch.
    fn batch_finished(&self, batch_len: u64, errors: u64);

    /// Every batch is done.
    fn finish(&self, processed: u64);

    /// The run ended with nothing to process; remove the indicator.
    fn abandon(&self);
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn products_collected(&self, _products: u64) {}
    fn batch_finished(&self, _batch_len: u64, _errors: u64) {}
    fn finish(&self, _processed: u64) {}
    fn abandon(&self) {}
}

#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
