//! Shared adaptive request pacing.
//!
//! One [`AdaptiveRateController`] is shared by every in-flight request. It
//! holds a single base delay that doubles on each HTTP 429 (up to a
//! ceiling) and decays multiplicatively back toward a floor once the
//! throttling stops, so the harvester settles on whatever rate the server
//! tolerates.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Which pre-request delay a call receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Catalog listing pages.
    Listing,
    /// Product detail pages and single-product JSON.
    Detail,
    /// No pre-request delay.
    Unpaced,
}

/// Bounds and factors for the adaptive delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSettings {
    /// Resting delay for detail requests; the base delay never goes below it.
    pub floor: Duration,
    /// The base delay never goes above this.
    pub ceiling: Duration,
    /// Resting delay for listing requests.
    pub listing_delay: Duration,
    /// Multiplier applied on recovery, in `(0, 1)`.
    pub decay: f64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            floor: Duration::from_millis(100),
            ceiling: Duration::from_secs(10),
            listing_delay: Duration::from_millis(50),
            decay: 0.8,
        }
    }
}

#[derive(Debug)]
struct RateState {
    base_delay: Duration,
    consecutive_throttles: u32,
    total_throttles: u64,
}

/// Tracks the shared base delay and throttle counters.
///
/// State is only touched between awaits, so a plain mutex is enough even on
/// the multi-threaded runtime.
#[derive(Debug)]
pub struct AdaptiveRateController {
    settings: RateSettings,
    state: Mutex<RateState>,
}

impl AdaptiveRateController {
    /// Creates a controller resting at the floor.
    #[must_use]
    pub fn new(settings: RateSettings) -> Self {
        let base_delay = settings.floor.min(settings.ceiling);
        Self {
            settings,
            state: Mutex::new(RateState {
                base_delay,
                consecutive_throttles: 0,
                total_throttles: 0,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RateState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Delay to sleep before issuing a request.
    ///
    /// Listing requests scale their own resting delay by the same backoff
    /// factor the detail delay currently carries.
    #[must_use]
    pub fn delay_before_request(&self, pacing: Pacing) -> Duration {
        let base = self.current_delay();
        match pacing {
            Pacing::Unpaced => Duration::ZERO,
            Pacing::Detail => base,
            Pacing::Listing => {
                if self.settings.floor.is_zero() {
                    self.settings.listing_delay.max(base)
                } else {
                    let factor = base.as_secs_f64() / self.settings.floor.as_secs_f64();
                    self.settings.listing_delay.mul_f64(factor)
                }
            }
        }
    }

    /// Records a successful response and relaxes the delay once the
    /// throttle streak has been paid down.
    pub fn on_success(&self) {
        let floor = self.settings.floor;
        let decay = self.settings.decay;
        self.with_state(|state| {
            if state.consecutive_throttles > 0 {
                state.consecutive_throttles -= 1;
            }
            if state.consecutive_throttles == 0 && state.base_delay > floor {
                let decayed = state.base_delay.mul_f64(decay);
                state.base_delay = decayed.max(floor);
                log::debug!("Request delay relaxed to {:?}", state.base_delay);
            }
        });
    }

    /// Records an HTTP 429 and returns how long to wait before retrying.
    ///
    /// `attempt` is the zero-based index of the attempt that was throttled.
    /// A parseable `Retry-After` value wins over the computed wait.
    pub fn on_throttled(&self, retry_after: Option<&str>, attempt: u32) -> Duration {
        let ceiling = self.settings.ceiling;
        let base = self.with_state(|state| {
            state.consecutive_throttles += 1;
            state.total_throttles += 1;
            state.base_delay = state.base_delay.saturating_mul(2).min(ceiling);
            state.base_delay
        });

        retry_after
            .and_then(parse_retry_after)
            .unwrap_or_else(|| base.saturating_mul(attempt.saturating_add(1)))
    }

    /// Current base delay.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.with_state(|state| state.base_delay)
    }

    /// Throttle responses seen since the last fully-recovered success.
    #[must_use]
    pub fn consecutive_throttles(&self) -> u32 {
        self.with_state(|state| state.consecutive_throttles)
    }

    /// Total throttle responses seen over the controller's lifetime.
    #[must_use]
    pub fn throttle_hits(&self) -> u64 {
        self.with_state(|state| state.total_throttles)
    }
}

/// Parses a `Retry-After` value given either as delay-seconds or as an
/// HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }

    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.with_timezone(&chrono::Utc) - chrono::Utc::now();
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdaptiveRateController {
        AdaptiveRateController::new(RateSettings {
            floor: Duration::from_millis(100),
            ceiling: Duration::from_secs(10),
            listing_delay: Duration::from_millis(50),
            decay: 0.8,
        })
    }

    #[test]
    fn throttle_doubles_base_delay() {
        let rate = controller();
        rate.on_throttled(None, 0);
        assert_eq!(rate.current_delay(), Duration::from_millis(200));
        rate.on_throttled(None, 0);
        assert_eq!(rate.current_delay(), Duration::from_millis(400));
        assert_eq!(rate.throttle_hits(), 2);
        assert_eq!(rate.consecutive_throttles(), 2);
    }

    #[test]
    fn base_delay_never_exceeds_ceiling() {
        let rate = controller();
        let mut previous = rate.current_delay();
        for _ in 0..50 {
            rate.on_throttled(None, 0);
            let current = rate.current_delay();
            assert_eq!(current, (previous * 2).min(Duration::from_secs(10)));
            assert!(current <= Duration::from_secs(10));
            previous = current;
        }
    }

    #[test]
    fn computed_wait_scales_with_attempt_index() {
        let rate = controller();
        let wait = rate.on_throttled(None, 2);
        assert_eq!(wait, Duration::from_millis(600));
    }

    #[test]
    fn retry_after_seconds_override_computed_wait() {
        let rate = controller();
        assert_eq!(rate.on_throttled(Some("3"), 0), Duration::from_secs(3));
        assert_eq!(
            rate.on_throttled(Some(" 0.5 "), 4),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn unparseable_retry_after_falls_back_to_computed_wait() {
        let rate = controller();
        let wait = rate.on_throttled(Some("soon"), 0);
        assert_eq!(wait, Duration::from_millis(200));
    }

    #[test]
    fn past_retry_after_date_means_no_wait() {
        let rate = controller();
        let wait = rate.on_throttled(Some("Wed, 21 Oct 2015 07:28:00 GMT"), 0);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn successes_decay_monotonically_to_floor() {
        let rate = controller();
        for _ in 0..4 {
            rate.on_throttled(None, 0);
        }
        assert_eq!(rate.current_delay(), Duration::from_millis(1600));

        // Streak must be paid down before any decay happens.
        for _ in 0..3 {
            rate.on_success();
            assert_eq!(rate.current_delay(), Duration::from_millis(1600));
        }

        let mut previous = rate.current_delay();
        for _ in 0..40 {
            rate.on_success();
            let current = rate.current_delay();
            assert!(current <= previous);
            assert!(current >= Duration::from_millis(100));
            previous = current;
        }
        assert_eq!(rate.current_delay(), Duration::from_millis(100));
        assert_eq!(rate.consecutive_throttles(), 0);
    }

    #[test]
    fn success_at_rest_keeps_floor() {
        let rate = controller();
        rate.on_success();
        assert_eq!(rate.current_delay(), Duration::from_millis(100));
    }

    #[test]
    fn listing_delay_follows_backoff_factor() {
        let rate = controller();
        assert_eq!(
            rate.delay_before_request(Pacing::Listing),
            Duration::from_millis(50)
        );
        rate.on_throttled(None, 0);
        assert_eq!(
            rate.delay_before_request(Pacing::Listing),
            Duration::from_millis(100)
        );
        assert_eq!(
            rate.delay_before_request(Pacing::Detail),
            Duration::from_millis(200)
        );
        assert_eq!(rate.delay_before_request(Pacing::Unpaced), Duration::ZERO);
    }
}
