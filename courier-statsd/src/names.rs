/// Names a counter.
///
/// Counters are increased or decreased by the pipeline, for example once per dropped
/// transmission.
pub trait CounterMetric {
    /// The name sent to statsd, without the configured prefix.
    fn name(&self) -> &'static str;
}

/// Names a gauge, which holds the last reported value.
///
/// ```
/// use courier_statsd::{metric, GaugeMetric};
///
/// struct SamplingPercentage;
///
/// impl GaugeMetric for SamplingPercentage {
///     fn name(&self) -> &'static str {
///         "sampling.percentage"
///     }
/// }
///
/// metric!(gauge(SamplingPercentage) = 12.5);
/// ```
pub trait GaugeMetric {
    /// The name sent to statsd, without the configured prefix.
    fn name(&self) -> &'static str;
}

/// Names a distribution of arbitrary values, such as the number of items in a batch.
pub trait DistributionMetric {
    /// The name sent to statsd, without the configured prefix.
    fn name(&self) -> &'static str;
}

/// Names a timing.
///
/// Timings are reported as distributions in milliseconds. They can be given as a
/// [`Duration`](std::time::Duration) or measured around a block:
///
/// ```
/// use std::time::Instant;
///
/// use courier_statsd::{metric, TimerMetric};
///
/// struct SendDuration;
///
/// impl TimerMetric for SendDuration {
///     fn name(&self) -> &'static str {
///         "sender.duration"
///     }
/// }
///
/// let start = Instant::now();
/// metric!(timer(SendDuration) = start.elapsed());
///
/// let items = metric!(timer(SendDuration), endpoint = "primary", { 42 });
/// assert_eq!(items, 42);
/// ```
pub trait TimerMetric {
    /// The name sent to statsd, without the configured prefix.
    fn name(&self) -> &'static str;
}
