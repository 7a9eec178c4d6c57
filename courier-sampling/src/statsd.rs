use courier_statsd::{CounterMetric, GaugeMetric};

/// Counter metrics for sampling.
pub enum SamplingCounters {
    /// Incremented for every item kept by the sampling processor.
    ///
    /// Tagged by `item_type` and `sampled`, which is `false` if the item bypassed
    /// sampling.
    ItemsKept,

    /// Incremented for every item dropped by the sampling processor.
    ///
    /// Tagged by `item_type`.
    ItemsDropped,

    /// Incremented every time adaptive sampling changes the sampling percentage.
    ///
    /// Tagged by `direction`: `increase` or `decrease`.
    PercentageChanged,
}

impl CounterMetric for SamplingCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ItemsKept => "sampling.items.kept",
            Self::ItemsDropped => "sampling.items.dropped",
            Self::PercentageChanged => "sampling.percentage.changed",
        }
    }
}

/// Gauge metrics for sampling.
pub enum SamplingGauges {
    /// The sampling percentage after every evaluation.
    Percentage,

    /// The estimated rate of items per second before sampling.
    BeforeSamplingRate,
}

impl GaugeMetric for SamplingGauges {
    fn name(&self) -> &'static str {
        match *self {
            Self::Percentage => "sampling.percentage",
            Self::BeforeSamplingRate => "sampling.rate.before_sampling",
        }
    }
}
