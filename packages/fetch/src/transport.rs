//! Admission-controlled request execution with throttle handling and retry.
//!
//! Every call acquires a slot on a counting semaphore first; that gate is
//! the only backpressure between pagination, metadata, and image work.
//! Each attempt resolves to an [`AttemptOutcome`] and the retry loop
//! branches on it:
//!
//! - `Success`: report to the rate controller and return the decoded body.
//! - `Throttled`: let the rate controller pick the wait, sleep while still
//!   holding the slot, and try again.
//! - `Transient`: release the slot, back off exponentially, and try again.
//!   A success status whose body fails to decode lands here too.
//! - `Fatal`: return the error immediately.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::client::HttpClient;
use crate::rate::{AdaptiveRateController, Pacing};
use crate::FetchError;

/// Retry budget and backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Attempts for binary downloads; JSON and HTML calls get two more as
    /// headroom for throttling.
    pub max_retries: u32,
    /// First backoff step.
    pub retry_wait_min: Duration,
    /// Backoff cap for binary downloads.
    pub retry_wait_max: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_wait_min: Duration::from_secs(2),
            retry_wait_max: Duration::from_secs(10),
        }
    }
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Throttled { retry_after: Option<String> },
    Transient(FetchError),
    Fatal(FetchError),
}

/// What [`RetryingTransport::download_binary`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file was fetched and written.
    Downloaded { bytes: usize },
    /// The destination already existed; no request was made.
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    attempts: u32,
    pacing: Pacing,
    backoff_cap: Option<Duration>,
}

/// Shared request engine. Cheap to share behind an [`Arc`].
pub struct RetryingTransport {
    client: Arc<dyn HttpClient>,
    gate: Semaphore,
    rate: AdaptiveRateController,
    retry: RetrySettings,
}

impl RetryingTransport {
    /// Creates a transport admitting at most `max_concurrent` requests at a
    /// time (at least one).
    #[must_use]
    pub fn new(
        client: Arc<dyn HttpClient>,
        max_concurrent: usize,
        rate: AdaptiveRateController,
        retry: RetrySettings,
    ) -> Self {
        Self {
            client,
            gate: Semaphore::new(max_concurrent.max(1)),
            rate,
            retry,
        }
    }

    /// The shared rate controller.
    #[must_use]
    pub const fn rate(&self) -> &AdaptiveRateController {
        &self.rate
    }

    /// Fetches `url` and decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once the attempt budget is spent or on a
    /// non-retryable status. A body that is not valid JSON is re-fetched
    /// like any transient failure.
    pub async fn fetch_json(
        &self,
        url: &str,
        pacing: Pacing,
    ) -> Result<serde_json::Value, FetchError> {
        self.execute(url, self.text_budget(pacing), |body| {
            Ok(serde_json::from_slice(&body)?)
        })
        .await
    }

    /// Fetches `url` and returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once the attempt budget is spent or on a
    /// non-retryable status.
    pub async fn fetch_html(&self, url: &str, pacing: Pacing) -> Result<String, FetchError> {
        self.execute(url, self.text_budget(pacing), |body| {
            Ok(String::from_utf8_lossy(&body).into_owned())
        })
        .await
    }

    /// Downloads `url` to `destination` unless the file already exists.
    ///
    /// The body is written to a sibling temporary file and renamed into
    /// place, so a partially-written file is never left at `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] once the attempt budget is spent, on a
    /// non-retryable status, or if the file cannot be written.
    pub async fn download_binary(
        &self,
        url: &str,
        destination: &Path,
    ) -> Result<DownloadOutcome, FetchError> {
        if tokio::fs::try_exists(destination).await? {
            log::debug!("Already downloaded: {}", destination.display());
            return Ok(DownloadOutcome::AlreadyPresent);
        }

        let budget = Budget {
            attempts: self.retry.max_retries.max(1),
            pacing: Pacing::Unpaced,
            backoff_cap: Some(self.retry.retry_wait_max),
        };
        let body = self.execute(url, budget, Ok).await?;

        let mut partial = destination.as_os_str().to_owned();
        partial.push(".part");
        let written = match tokio::fs::write(&partial, &body).await {
            Ok(()) => tokio::fs::rename(&partial, destination).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        log::debug!("Downloaded {} bytes to {}", body.len(), destination.display());
        Ok(DownloadOutcome::Downloaded { bytes: body.len() })
    }

    const fn text_budget(&self, pacing: Pacing) -> Budget {
        Budget {
            attempts: self.retry.max_retries.saturating_add(2),
            pacing,
            backoff_cap: None,
        }
    }

    fn backoff(&self, attempt: u32, cap: Option<Duration>) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        let wait = self.retry.retry_wait_min.saturating_mul(factor);
        cap.map_or(wait, |cap| wait.min(cap))
    }

    async fn execute<T>(
        &self,
        url: &str,
        budget: Budget,
        decode: impl Fn(Vec<u8>) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        for attempt in 0..budget.attempts {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| FetchError::GateClosed)?;

            let delay = self.rate.delay_before_request(budget.pacing);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            log::debug!(
                "GET {url} (attempt {}/{}, delay {delay:?})",
                attempt + 1,
                budget.attempts
            );

            match self.attempt(url, &decode).await {
                AttemptOutcome::Success(body) => {
                    self.rate.on_success();
                    return Ok(body);
                }
                AttemptOutcome::Throttled { retry_after } => {
                    let wait = self.rate.on_throttled(retry_after.as_deref(), attempt);
                    log::warn!(
                        "Rate limit hit (429) for {url}. Waiting {wait:?} before retry {}/{}. \
                         New base delay: {:?}",
                        attempt + 1,
                        budget.attempts,
                        self.rate.current_delay(),
                    );
                    tokio::time::sleep(wait).await;
                    drop(permit);
                }
                AttemptOutcome::Transient(e) => {
                    drop(permit);
                    if attempt + 1 >= budget.attempts {
                        log::warn!("Giving up on {url} after {} attempts: {e}", budget.attempts);
                        return Err(e);
                    }
                    let wait = self.backoff(attempt, budget.backoff_cap);
                    log::warn!("Error fetching {url}: {e}. Retrying in {wait:?}...");
                    tokio::time::sleep(wait).await;
                }
                AttemptOutcome::Fatal(e) => return Err(e),
            }
        }

        Err(FetchError::RetriesExhausted {
            url: url.to_owned(),
            attempts: budget.attempts,
        })
    }

    async fn attempt<T>(
        &self,
        url: &str,
        decode: &impl Fn(Vec<u8>) -> Result<T, FetchError>,
    ) -> AttemptOutcome<T> {
        match self.client.get(url).await {
            Err(e) if e.is_transient() => AttemptOutcome::Transient(e),
            Err(e) => AttemptOutcome::Fatal(e),
            Ok(response) if response.is_throttled() => AttemptOutcome::Throttled {
                retry_after: response.retry_after,
            },
            Ok(response) if response.is_success() => match decode(response.body) {
                Ok(value) => AttemptOutcome::Success(value),
                Err(e) => AttemptOutcome::Transient(e),
            },
            Ok(response) => {
                let e = FetchError::Status {
                    status: response.status,
                    url: url.to_owned(),
                };
                if e.is_transient() {
                    AttemptOutcome::Transient(e)
                } else {
                    AttemptOutcome::Fatal(e)
                }
            }
        }
    }
}
