//! Shared run counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use harvest_catalog_models::StatisticsSnapshot;

/// Counters updated by every pipeline stage.
///
/// Throttle hits live in the rate controller and are passed in when a
/// snapshot is taken.
#[derive(Debug, Default)]
pub struct RunStats {
    books_fetched: AtomicU64,
    images_downloaded: AtomicU64,
    errors: AtomicU64,
    start_time: Mutex<Option<DateTime<Utc>>>,
    end_time: Mutex<Option<DateTime<Utc>>>,
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_started(&self) {
        *self.start_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn mark_finished(&self) {
        *self.end_time.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn record_book(&self) {
        self.books_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_images(&self, count: u64) {
        self.images_downloaded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.record_errors(1);
    }

    #[must_use]
    pub fn books_fetched(&self) -> u64 {
        self.books_fetched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn images_downloaded(&self) -> u64 {
        self.images_downloaded.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self, throttle_hits: u64) -> StatisticsSnapshot {
        StatisticsSnapshot {
            books_fetched: self.books_fetched(),
            images_downloaded: self.images_downloaded(),
            errors: self.errors(),
            throttle_hits,
            start_time: *self.start_time.lock().unwrap_or_else(PoisonError::into_inner),
            end_time: *self.end_time.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}
