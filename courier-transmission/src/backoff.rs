use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::BackoffConfig;
use crate::status::ResponseStatus;

/// Exponent of the largest backoff window.
const MAX_EXPONENT: u32 = 30;

/// Computes delays after failed transmissions.
///
/// One instance is shared by all policies of a transmitter, so the delay grows with the number
/// of consecutive failures regardless of which policy reacts to them.
#[derive(Debug)]
pub struct BackoffLogic {
    config: BackoffConfig,
    consecutive_errors: AtomicU32,
}

impl BackoffLogic {
    /// Creates backoff logic without prior errors.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// The number of sends that failed since the last success.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors.load(Ordering::Relaxed)
    }

    /// Accounts for a completed send.
    ///
    /// A successful response resets the error count. Every other response, and every send
    /// without response, increments it.
    pub fn record(&self, status: Option<ResponseStatus>) {
        match status {
            Some(status) if status.is_success() => {
                self.consecutive_errors.store(0, Ordering::Relaxed);
            }
            _ => {
                self.consecutive_errors
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |errors| {
                        Some(errors.saturating_add(1))
                    })
                    .ok();
            }
        }
    }

    /// Returns how long to pause before sending again.
    ///
    /// A valid `Retry-After` value, given either in seconds or as HTTP date, takes precedence.
    /// Otherwise, the first failure waits one slot and subsequent failures wait a random
    /// number of slots from an exponentially growing window, bounded by the maximum delay.
    pub fn backoff_delay(&self, retry_after: Option<&str>) -> Duration {
        if let Some(delay) = retry_after.and_then(|value| parse_retry_after(value, Utc::now())) {
            return delay;
        }

        let slot_delay = self.config.slot_delay();
        let errors = self.consecutive_errors();
        if errors <= 1 {
            return slot_delay;
        }

        let window = ((1u64 << errors.min(MAX_EXPONENT)) - 1) as f64 / 2.0;
        let upper = (window * slot_delay.as_secs_f64()).max(1.0);
        let delay = Duration::from_secs_f64(rand::random_range(1.0..=upper));

        delay.clamp(slot_delay, self.config.max_delay())
    }
}

/// Parses the value of a `Retry-After` header relative to `now`.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    Some((date.with_timezone(&Utc) - now).to_std().unwrap_or(Duration::ZERO))
}
