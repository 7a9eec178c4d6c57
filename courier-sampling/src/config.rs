use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::item::TelemetryType;

/// An error returned when a [`SamplingConfig`] is invalid.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SamplingConfigError {
    /// A sampling percentage is outside of `(0, 100]`.
    #[error("sampling percentage {0} is outside of (0, 100]")]
    InvalidPercentage(f64),
    /// The minimum sampling percentage exceeds the maximum.
    #[error("minimum sampling percentage {min} exceeds the maximum {max}")]
    InvertedPercentageRange {
        /// The configured minimum.
        min: f64,
        /// The configured maximum.
        max: f64,
    },
    /// The target throughput is not positive.
    #[error("maximum telemetry items per second must be positive")]
    InvalidMaxItemsPerSecond,
    /// The moving average ratio is outside of `(0, 1]`.
    #[error("moving average ratio {0} is outside of (0, 1]")]
    InvalidMovingAverageRatio(f64),
    /// The evaluation interval is zero.
    #[error("the evaluation interval must not be zero")]
    ZeroEvaluationInterval,
}

/// Configuration of fixed and adaptive sampling.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    /// The interval in seconds at which the sampling percentage is evaluated.
    ///
    /// Defaults to `15` seconds.
    pub evaluation_interval: u64,

    /// The sampling percentage applied before the first evaluation.
    ///
    /// Defaults to `100`.
    pub initial_sampling_percentage: f64,

    /// The throughput after sampling that adaptive sampling aims for.
    ///
    /// Defaults to `5` items per second.
    pub max_telemetry_items_per_second: f64,

    /// The lowest sampling percentage adaptive sampling may apply.
    ///
    /// Defaults to `0.1`.
    pub min_sampling_percentage: f64,

    /// The highest sampling percentage adaptive sampling may apply.
    ///
    /// Defaults to `100`.
    pub max_sampling_percentage: f64,

    /// The weight of the latest interval in the moving average of the observed rate.
    ///
    /// Defaults to `0.25`. Higher values react faster to bursts.
    pub moving_average_ratio: f64,

    /// The time in seconds since the last change before the sampling percentage may decrease.
    ///
    /// Defaults to `120` seconds.
    pub sampling_percentage_decrease_timeout: u64,

    /// The time in seconds since the last change before the sampling percentage may increase.
    ///
    /// Defaults to `900` seconds.
    pub sampling_percentage_increase_timeout: u64,

    /// Types subject to sampling. Empty means all types.
    pub included_types: Vec<TelemetryType>,

    /// Types never sampled. Takes precedence over `included_types`.
    pub excluded_types: Vec<TelemetryType>,
}

impl SamplingConfig {
    /// Returns the evaluation interval as [`Duration`].
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval)
    }

    /// Returns the decrease timeout as [`Duration`].
    pub fn sampling_percentage_decrease_timeout(&self) -> Duration {
        Duration::from_secs(self.sampling_percentage_decrease_timeout)
    }

    /// Returns the increase timeout as [`Duration`].
    pub fn sampling_percentage_increase_timeout(&self) -> Duration {
        Duration::from_secs(self.sampling_percentage_increase_timeout)
    }

    /// Returns `true` if items of type `ty` are subject to sampling.
    pub fn is_sampling_applicable(&self, ty: TelemetryType) -> bool {
        if self.excluded_types.contains(&ty) {
            return false;
        }

        self.included_types.is_empty() || self.included_types.contains(&ty)
    }

    /// Checks that all values are within their valid ranges.
    pub fn validate(&self) -> Result<(), SamplingConfigError> {
        for percentage in [
            self.initial_sampling_percentage,
            self.min_sampling_percentage,
            self.max_sampling_percentage,
        ] {
            if !is_within(percentage, 0.0, 100.0) {
                return Err(SamplingConfigError::InvalidPercentage(percentage));
            }
        }

        if self.min_sampling_percentage > self.max_sampling_percentage {
            return Err(SamplingConfigError::InvertedPercentageRange {
                min: self.min_sampling_percentage,
                max: self.max_sampling_percentage,
            });
        }

        if !is_within(self.max_telemetry_items_per_second, 0.0, f64::MAX) {
            return Err(SamplingConfigError::InvalidMaxItemsPerSecond);
        }

        if !is_within(self.moving_average_ratio, 0.0, 1.0) {
            return Err(SamplingConfigError::InvalidMovingAverageRatio(
                self.moving_average_ratio,
            ));
        }

        if self.evaluation_interval == 0 {
            return Err(SamplingConfigError::ZeroEvaluationInterval);
        }

        Ok(())
    }
}

/// Returns `true` if `value` is in `(low, high]`. `NaN` is never within.
fn is_within(value: f64, low: f64, high: f64) -> bool {
    value > low && value <= high
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: 15,
            initial_sampling_percentage: 100.0,
            max_telemetry_items_per_second: 5.0,
            min_sampling_percentage: 0.1,
            max_sampling_percentage: 100.0,
            moving_average_ratio: 0.25,
            sampling_percentage_decrease_timeout: 120,
            sampling_percentage_increase_timeout: 900,
            included_types: Vec::new(),
            excluded_types: Vec::new(),
        }
    }
}
