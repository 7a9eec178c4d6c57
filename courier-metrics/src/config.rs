use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::TrackValueError;

/// The dimension value substituted for values in excess of a dimension's cap.
pub const DEFAULT_FALLBACK_VALUE: &str = "DIMENSION-CAPPED";

/// An error returned when a [`CubeConfig`] or [`MetricConfig`] is invalid.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CubeConfigError {
    /// The cube was configured without dimensions.
    #[error("a cube requires at least one dimension")]
    NoDimensions,
    /// A dimension was configured to hold no values.
    #[error("the values limit of dimension {0} must be positive")]
    InvalidDimensionLimit(usize),
    /// The cube was configured to hold no points.
    #[error("the total points limit must be positive")]
    InvalidTotalPointsLimit,
    /// Dimension capping was enabled with an empty fallback value.
    #[error("the dimension capping fallback value must not be empty")]
    EmptyFallbackValue,
}

/// Limits of a [`BoundedDimensionalCube`](crate::BoundedDimensionalCube).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CubeConfig {
    /// The maximum number of distinct values for each dimension.
    ///
    /// The length of this list is the dimensionality of the cube. Defaults to a single dimension
    /// with up to `100` values.
    pub dimension_limits: Vec<usize>,

    /// The maximum number of points across the entire cube.
    ///
    /// Defaults to `1000`. Once reached, creation is rejected regardless of per-dimension
    /// capacity.
    pub total_points_limit: usize,

    /// Redirects values in excess of a dimension's cap to [`fallback_value`](Self::fallback_value)
    /// instead of rejecting them.
    ///
    /// Defaults to `false`.
    pub dimension_capping: bool,

    /// The value substituted for capped dimension values.
    ///
    /// Defaults to `"DIMENSION-CAPPED"`. The fallback does not count towards a dimension's cap.
    pub fallback_value: String,
}

impl CubeConfig {
    /// Returns the number of dimensions of the cube.
    pub fn dimensions(&self) -> usize {
        self.dimension_limits.len()
    }

    /// Checks that all limits are positive.
    pub fn validate(&self) -> Result<(), CubeConfigError> {
        if self.dimension_limits.is_empty() {
            return Err(CubeConfigError::NoDimensions);
        }

        if let Some(index) = self.dimension_limits.iter().position(|limit| *limit == 0) {
            return Err(CubeConfigError::InvalidDimensionLimit(index));
        }

        if self.total_points_limit == 0 {
            return Err(CubeConfigError::InvalidTotalPointsLimit);
        }

        if self.dimension_capping && self.fallback_value.is_empty() {
            return Err(CubeConfigError::EmptyFallbackValue);
        }

        Ok(())
    }
}

impl Default for CubeConfig {
    fn default() -> Self {
        Self {
            dimension_limits: vec![100],
            total_points_limit: 1000,
            dimension_capping: false,
            fallback_value: DEFAULT_FALLBACK_VALUE.to_owned(),
        }
    }
}

/// The statistical aggregation applied to values of a series.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    /// Count, sum, min, max and standard deviation, reset every aggregation period.
    #[default]
    Measurement,
    /// A running sum, min and max that is never reset.
    Accumulator,
}

impl AggregationKind {
    /// Returns the moniker reported in [`MetricAggregate`](crate::MetricAggregate)s.
    pub fn moniker(self) -> &'static str {
        match self {
            Self::Measurement => "Microsoft.Azure.Measurement",
            Self::Accumulator => "Microsoft.Azure.Accumulator",
        }
    }

    /// Returns `true` if aggregators of this kind retain values across periods.
    pub fn requires_persistent_aggregation(self) -> bool {
        matches!(self, Self::Accumulator)
    }
}

/// Configuration of a single [`MetricSeries`](crate::MetricSeries).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SeriesConfig {
    /// The aggregation applied to tracked values.
    ///
    /// Defaults to `measurement`.
    pub kind: AggregationKind,

    /// Accepts only whole numbers in the range of an unsigned 32-bit integer.
    ///
    /// Defaults to `false`. When enabled, sums are rounded to whole numbers.
    pub restrict_to_u32_values: bool,
}

impl SeriesConfig {
    /// Returns `true` if the series must be aggregated across cycles.
    pub fn requires_persistent_aggregation(&self) -> bool {
        self.kind.requires_persistent_aggregation()
    }

    /// Checks whether `value` may be tracked by a series with this configuration.
    ///
    /// `NaN` is always accepted, since aggregators ignore it.
    pub fn validate_value(&self, value: f64) -> Result<(), TrackValueError> {
        if !self.restrict_to_u32_values || value.is_nan() {
            return Ok(());
        }

        if value.fract() != 0.0 || value.is_infinite() {
            return Err(TrackValueError::NotIntegral(value));
        }

        if value < 0.0 || value > f64::from(u32::MAX) {
            return Err(TrackValueError::OutOfRange(value));
        }

        Ok(())
    }
}

/// Limits and series configuration of a [`Metric`](crate::Metric).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricConfig {
    /// The maximum number of series of a multi-dimensional metric.
    ///
    /// Defaults to `1000`.
    pub series_count_limit: usize,

    /// The maximum number of distinct values per dimension.
    ///
    /// Defaults to `100`.
    pub values_per_dimension_limit: usize,

    /// Redirects values in excess of the per-dimension limit to a fallback value.
    ///
    /// Defaults to `false`.
    pub dimension_capping: bool,

    /// Configuration applied to every series of the metric.
    pub series: SeriesConfig,
}

impl MetricConfig {
    /// Returns the configuration of the cube backing a metric with `dimensions` dimensions.
    pub fn cube_config(&self, dimensions: usize) -> CubeConfig {
        CubeConfig {
            dimension_limits: vec![self.values_per_dimension_limit; dimensions],
            total_points_limit: self.series_count_limit,
            dimension_capping: self.dimension_capping,
            fallback_value: DEFAULT_FALLBACK_VALUE.to_owned(),
        }
    }

    /// Checks that all limits are positive.
    pub fn validate(&self) -> Result<(), CubeConfigError> {
        if self.values_per_dimension_limit == 0 {
            return Err(CubeConfigError::InvalidDimensionLimit(0));
        }

        if self.series_count_limit == 0 {
            return Err(CubeConfigError::InvalidTotalPointsLimit);
        }

        Ok(())
    }
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            series_count_limit: 1000,
            values_per_dimension_limit: 100,
            dimension_capping: false,
            series: SeriesConfig::default(),
        }
    }
}

/// Configuration of the [`AggregationCycleService`](crate::AggregationCycleService).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct AggregationConfig {
    /// The length of an aggregation period of the default cycle in seconds.
    ///
    /// Defaults to `60` seconds.
    pub period: u64,
}

impl AggregationConfig {
    /// Returns the aggregation period as [`Duration`].
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period)
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { period: 60 }
    }
}
