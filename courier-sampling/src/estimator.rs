use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::{SamplingConfig, SamplingConfigError};
use crate::item::TelemetryType;

/// An exponential moving average of per-interval item counts.
#[derive(Clone, Copy, Debug)]
struct MovingAverage {
    ratio: f64,
    average: Option<f64>,
}

impl MovingAverage {
    fn new(ratio: f64) -> Self {
        Self {
            ratio,
            average: None,
        }
    }

    /// Folds the count of a completed interval into the average and returns it.
    fn add_interval(&mut self, count: f64) -> f64 {
        let average = match self.average {
            Some(average) => self.ratio * count + (1.0 - self.ratio) * average,
            None => count,
        };

        self.average = Some(average);
        average
    }
}

/// The outcome of one [`AdaptiveSamplingEstimator::evaluate`] call.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingEvaluation {
    /// Smoothed rate of items per second that passed sampling.
    pub after_sampling_rate: f64,
    /// Estimated rate of items per second before sampling.
    pub before_sampling_rate: f64,
    /// The sampling percentage that was applied during the interval.
    pub current_percentage: f64,
    /// The sampling percentage applied from now on.
    pub new_percentage: f64,
    /// `true` if `new_percentage` differs from `current_percentage`.
    pub changed: bool,
    /// The number of items observed in the interval, by type.
    pub observed_items: BTreeMap<TelemetryType, u64>,
}

#[derive(Debug)]
struct EstimatorState {
    average: MovingAverage,
    sampling_rate: u32,
    last_change: Instant,
}

/// Estimates the sampling percentage that keeps throughput below a target rate.
///
/// The estimator counts items that passed sampling and extrapolates the rate before sampling
/// from the sampling percentage in effect. Percentages are always `100 / n` for a whole
/// sampling rate `n`, so that one in `n` operations is kept.
///
/// Changes are damped: the percentage decreases only once the decrease timeout has passed
/// since the last change, and increases only once the longer increase timeout has passed.
#[derive(Debug)]
pub struct AdaptiveSamplingEstimator {
    config: SamplingConfig,
    counts: [AtomicU64; TelemetryType::ALL.len()],
    min_rate: u32,
    max_rate: u32,
    state: Mutex<EstimatorState>,
}

impl AdaptiveSamplingEstimator {
    /// Creates an estimator whose damping timeouts start at `now`.
    pub fn new(config: SamplingConfig, now: Instant) -> Result<Self, SamplingConfigError> {
        config.validate()?;

        let min_rate = to_rate(config.max_sampling_percentage);
        let max_rate = ((100.0 / config.min_sampling_percentage).floor() as u32).max(min_rate);
        let sampling_rate = to_rate(config.initial_sampling_percentage).clamp(min_rate, max_rate);

        Ok(Self {
            counts: Default::default(),
            min_rate,
            max_rate,
            state: Mutex::new(EstimatorState {
                average: MovingAverage::new(config.moving_average_ratio),
                sampling_rate,
                last_change: now,
            }),
            config,
        })
    }

    /// The configuration of this estimator.
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// The sampling percentage currently in effect.
    pub fn sampling_percentage(&self) -> f64 {
        to_percentage(self.state.lock().sampling_rate)
    }

    /// Counts an item that passed sampling.
    pub fn record(&self, ty: TelemetryType) {
        self.counts[ty.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Completes an evaluation interval and computes the next sampling percentage.
    pub fn evaluate(&self, now: Instant) -> SamplingEvaluation {
        let mut observed_items = BTreeMap::new();
        let mut total = 0;
        for ty in TelemetryType::ALL {
            let count = self.counts[ty.index()].swap(0, Ordering::Relaxed);
            if count > 0 {
                observed_items.insert(ty, count);
                total += count;
            }
        }

        let mut state = self.state.lock();
        let current_rate = state.sampling_rate;

        let average = state.average.add_interval(total as f64);
        let after_sampling_rate = average / self.config.evaluation_interval().as_secs_f64();
        let before_sampling_rate = after_sampling_rate * f64::from(current_rate);

        let suggested = (before_sampling_rate / self.config.max_telemetry_items_per_second).ceil();
        let suggested_rate = if suggested >= f64::from(self.max_rate) {
            self.max_rate
        } else {
            (suggested as u32).max(self.min_rate)
        };

        let timeout = match suggested_rate > current_rate {
            true => self.config.sampling_percentage_decrease_timeout(),
            false => self.config.sampling_percentage_increase_timeout(),
        };
        let changed = suggested_rate != current_rate
            && now.saturating_duration_since(state.last_change) >= timeout;

        if changed {
            state.sampling_rate = suggested_rate;
            state.last_change = now;
            state.average = MovingAverage::new(self.config.moving_average_ratio);
        }

        SamplingEvaluation {
            after_sampling_rate,
            before_sampling_rate,
            current_percentage: to_percentage(current_rate),
            new_percentage: to_percentage(state.sampling_rate),
            changed,
            observed_items,
        }
    }
}

fn to_rate(percentage: f64) -> u32 {
    ((100.0 / percentage).round() as u32).max(1)
}

fn to_percentage(rate: u32) -> f64 {
    100.0 / f64::from(rate)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record_rate(estimator: &AdaptiveSamplingEstimator, per_second: u64) {
        let interval = estimator.config().evaluation_interval;
        for _ in 0..per_second * interval {
            estimator.record(TelemetryType::Request);
        }
    }

    fn config() -> SamplingConfig {
        SamplingConfig {
            max_telemetry_items_per_second: 10.0,
            min_sampling_percentage: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_target_percentage() {
        let start = Instant::now();
        let estimator = AdaptiveSamplingEstimator::new(config(), start).unwrap();

        record_rate(&estimator, 100);
        let evaluation = estimator.evaluate(start + Duration::from_secs(120));

        assert!(evaluation.changed);
        assert_eq!(evaluation.before_sampling_rate, 100.0);
        assert_eq!(evaluation.current_percentage, 100.0);
        assert_eq!(evaluation.new_percentage, 10.0);
        assert_eq!(evaluation.observed_items[&TelemetryType::Request], 1500);
        assert_eq!(estimator.sampling_percentage(), 10.0);
    }

    #[test]
    fn test_minimum_percentage() {
        let start = Instant::now();
        let estimator = AdaptiveSamplingEstimator::new(config(), start).unwrap();

        record_rate(&estimator, 10_000);
        let evaluation = estimator.evaluate(start + Duration::from_secs(120));

        assert_eq!(evaluation.new_percentage, 1.0);
    }

    #[test]
    fn test_decrease_waits_for_timeout() {
        let start = Instant::now();
        let estimator = AdaptiveSamplingEstimator::new(config(), start).unwrap();

        record_rate(&estimator, 100);
        let evaluation = estimator.evaluate(start + Duration::from_secs(15));
        assert!(!evaluation.changed);
        assert_eq!(evaluation.new_percentage, 100.0);

        record_rate(&estimator, 100);
        let evaluation = estimator.evaluate(start + Duration::from_secs(120));
        assert!(evaluation.changed);
        assert_eq!(evaluation.new_percentage, 10.0);
    }

    #[test]
    fn test_increase_waits_for_longer_timeout() {
        let start = Instant::now();
        let estimator = AdaptiveSamplingEstimator::new(config(), start).unwrap();

        record_rate(&estimator, 100);
        let changed_at = start + Duration::from_secs(120);
        assert!(estimator.evaluate(changed_at).changed);

        // Traffic stops. Increasing is held back until the increase timeout passed.
        let evaluation = estimator.evaluate(changed_at + Duration::from_secs(600));
        assert!(!evaluation.changed);
        assert_eq!(evaluation.new_percentage, 10.0);

        let evaluation = estimator.evaluate(changed_at + Duration::from_secs(900));
        assert!(evaluation.changed);
        assert_eq!(evaluation.new_percentage, 100.0);
    }

    #[test]
    fn test_moving_average_smooths_bursts() {
        let mut average = MovingAverage::new(0.25);
        assert_eq!(average.add_interval(100.0), 100.0);
        assert_eq!(average.add_interval(0.0), 75.0);
        assert_eq!(average.add_interval(0.0), 56.25);
    }

    #[test]
    fn test_initial_percentage() {
        let config = SamplingConfig {
            initial_sampling_percentage: 25.0,
            ..Default::default()
        };
        let estimator = AdaptiveSamplingEstimator::new(config, Instant::now()).unwrap();
        assert_eq!(estimator.sampling_percentage(), 25.0);
    }
}
