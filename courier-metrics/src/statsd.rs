use courier_statsd::{CounterMetric, DistributionMetric, GaugeMetric, TimerMetric};

/// Counter metrics for metric aggregation.
pub enum MetricCounters {
    /// Incremented every time a cube creates a new point.
    ///
    /// Tagged by `capped` if the point was created with a fallback dimension value.
    PointCreated,

    /// Incremented every time a cube rejects the creation of a point.
    ///
    /// Tagged by `reason`: `dimension_limit` or `total_limit`.
    PointRejected,

    /// Incremented every time a user-supplied filter returns an error.
    ///
    /// Filters fail open, so the series or value is consumed anyway. Tagged by `filter`:
    /// `series` or `value`.
    FilterFailed,
}

impl CounterMetric for MetricCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::PointCreated => "metrics.cube.created",
            Self::PointRejected => "metrics.cube.rejected",
            Self::FilterFailed => "metrics.filter.failed",
        }
    }
}

/// Gauge metrics for metric aggregation.
pub enum MetricGauges {
    /// The number of points held by a cube after a point was created.
    CubePoints,
}

impl GaugeMetric for MetricGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::CubePoints => "metrics.cube.points",
        }
    }
}

/// Distribution metrics for metric aggregation.
pub enum MetricDistributions {
    /// The number of aggregates emitted by a completed aggregation cycle.
    ///
    /// Tagged by the cycle `kind`.
    CycleAggregates,
}

impl DistributionMetric for MetricDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::CycleAggregates => "metrics.cycle.aggregates",
        }
    }
}

/// Timer metrics for metric aggregation.
pub enum MetricTimers {
    /// Time in milliseconds spent completing all aggregators of a cycle.
    ///
    /// Tagged by the cycle `kind`.
    CycleDuration,
}

impl TimerMetric for MetricTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::CycleDuration => "metrics.cycle.duration",
        }
    }
}
