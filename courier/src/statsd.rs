use courier_statsd::{CounterMetric, DistributionMetric};

/// Counter metrics for the telemetry channel.
pub enum ChannelCounters {
    /// Incremented for every item passed to the channel.
    ///
    /// Tagged by `item_type` and `decision`, which is `keep` or `drop`.
    ItemsTracked,

    /// Incremented for every kept item that could not be serialized.
    ItemsInvalid,
}

impl CounterMetric for ChannelCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::ItemsTracked => "channel.items.tracked",
            Self::ItemsInvalid => "channel.items.invalid",
        }
    }
}

/// Distribution metrics for the telemetry channel.
pub enum ChannelDistributions {
    /// The number of items in every transmission created by the channel.
    ///
    /// Tagged by `trigger`: `full`, `interval` or `flush`.
    BatchItems,
}

impl DistributionMetric for ChannelDistributions {
    fn name(&self) -> &'static str {
        match *self {
            Self::BatchItems => "channel.batch.items",
        }
    }
}
