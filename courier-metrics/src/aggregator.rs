use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::aggregate::{self, MetricAggregate, ensure_finite};
use crate::buffer::{self, DEFAULT_CAPACITY, ValueBuffer, WriteResult};
use crate::config::{AggregationKind, SeriesConfig};
use crate::filter::{self, MetricValueFilter};
use crate::series::SeriesIdentity;

/// An error returned when tracking a value that a series does not accept.
#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum TrackValueError {
    /// The series only accepts whole numbers.
    #[error("value {0} is not a whole number")]
    NotIntegral(f64),
    /// The series only accepts values in the range of an unsigned 32-bit integer.
    #[error("value {0} is out of the unsigned 32-bit range")]
    OutOfRange(f64),
}

/// Running statistics of the values folded into an aggregator.
#[derive(Clone, Copy, Debug, PartialEq)]
struct RunningAggregate {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl RunningAggregate {
    /// Min and max hold sentinels until the first value arrives.
    const EMPTY: Self = Self {
        count: 0,
        sum: 0.0,
        sum_of_squares: 0.0,
        min: f64::MAX,
        max: f64::MIN,
    };

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_of_squares += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn std_dev(&self, sum: f64, sum_of_squares: f64) -> f64 {
        let count = self.count as f64;
        let mean = sum / count;
        let variance = sum_of_squares / count - mean * mean;

        // Rounding can push the variance of near-constant series below zero.
        match variance > 0.0 {
            true => variance.sqrt(),
            false => 0.0,
        }
    }
}

/// Whether a value reached an aggregator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TrackOutcome {
    /// The value was staged, or dropped by a filter.
    Accepted,
    /// The period of the aggregator was completed for good. The value was not tracked.
    Sealed,
}

struct AggregatorState {
    data: RunningAggregate,
    next_flush: usize,
    period_start: DateTime<Utc>,
}

/// Aggregates the values of one series for one aggregation cycle.
///
/// Values are staged in a [`ValueBuffer`] without locking. Whenever the buffer fills up, the
/// writer that filled it folds all staged values into the running aggregate under the state
/// lock. [`complete_aggregation`](Self::complete_aggregation) folds the staged remainder and
/// reads out the aggregate.
///
/// Once its collection is cycled out, the aggregator is sealed. Writers stage values under the
/// read side of the seal, so every value staged before sealing is part of the final aggregate
/// and every later value is refused.
pub struct MetricSeriesAggregator {
    series: Arc<SeriesIdentity>,
    config: SeriesConfig,
    value_filter: RwLock<Option<Arc<dyn MetricValueFilter>>>,
    buffer: ValueBuffer,
    sealed: RwLock<bool>,
    state: Mutex<AggregatorState>,
}

impl MetricSeriesAggregator {
    /// Creates an aggregator for `series` whose first period starts at `period_start`.
    pub fn new(
        series: Arc<SeriesIdentity>,
        config: SeriesConfig,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self::with_capacity(series, config, period_start, DEFAULT_CAPACITY)
    }

    fn with_capacity(
        series: Arc<SeriesIdentity>,
        config: SeriesConfig,
        period_start: DateTime<Utc>,
        capacity: usize,
    ) -> Self {
        Self {
            series,
            config,
            value_filter: RwLock::new(None),
            buffer: ValueBuffer::new(capacity),
            sealed: RwLock::new(false),
            state: Mutex::new(AggregatorState {
                data: RunningAggregate::EMPTY,
                next_flush: 0,
                period_start,
            }),
        }
    }

    /// The series aggregated by this aggregator.
    pub fn series(&self) -> &SeriesIdentity {
        &self.series
    }

    /// The configuration of the aggregated series.
    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    /// Discards all values and starts a new period with the given value filter.
    pub fn reset(
        &self,
        period_start: DateTime<Utc>,
        value_filter: Option<Arc<dyn MetricValueFilter>>,
    ) {
        *self.value_filter.write() = value_filter;

        let mut state = self.state.lock();
        self.fold_staged(&mut state);
        state.data = RunningAggregate::EMPTY;
        state.period_start = period_start;
    }

    /// Adds a value to the current period.
    ///
    /// `NaN` is ignored. Values rejected by the value filter are dropped, and so are values
    /// tracked after the aggregator was sealed by a cycle.
    pub fn track_value(&self, value: f64) -> Result<(), TrackValueError> {
        self.record(value).map(|_| ())
    }

    /// Adds a value, reporting whether the aggregator was already sealed.
    pub(crate) fn record(&self, value: f64) -> Result<TrackOutcome, TrackValueError> {
        if value.is_nan() {
            return Ok(TrackOutcome::Accepted);
        }

        self.config.validate_value(value)?;

        if let Some(ref value_filter) = *self.value_filter.read()
            && !filter::accepts_value(value_filter.as_ref(), &self.series, value)
        {
            return Ok(TrackOutcome::Accepted);
        }

        let sealed = self.sealed.read();
        if *sealed {
            return Ok(TrackOutcome::Sealed);
        }

        let mut spins = 0;
        loop {
            match self.buffer.write(value) {
                WriteResult::Written => break,
                WriteResult::Filled => {
                    let mut state = self.state.lock();
                    self.fold_staged(&mut state);
                    state.next_flush = 0;
                    self.buffer.reset();
                    break;
                }
                WriteResult::Full => buffer::backoff(&mut spins),
            }
        }

        drop(sealed);
        Ok(TrackOutcome::Accepted)
    }

    /// Refuses all further values and completes the current period.
    ///
    /// Waits for writers that are staging a value, so their values are part of the aggregate.
    pub(crate) fn seal(&self, period_end: DateTime<Utc>) -> Option<MetricAggregate> {
        *self.sealed.write() = true;
        self.complete_aggregation(period_end)
    }

    /// Returns `true` if the aggregator refuses values.
    pub fn is_sealed(&self) -> bool {
        *self.sealed.read()
    }

    /// Completes the current period and returns its aggregate.
    ///
    /// Returns `None` if no values were tracked. Measurements start a new period at
    /// `period_end`, accumulators keep their values.
    pub fn complete_aggregation(&self, period_end: DateTime<Utc>) -> Option<MetricAggregate> {
        let mut state = self.state.lock();
        self.fold_staged(&mut state);

        let data = state.data;
        let period_start = state.period_start;
        state.period_start = period_end;
        if self.config.kind == AggregationKind::Measurement {
            state.data = RunningAggregate::EMPTY;
        }
        drop(state);

        if data.count == 0 {
            return None;
        }

        Some(self.create_aggregate(data, period_start, period_end))
    }

    /// Folds all staged values that were not folded yet.
    ///
    /// A completed buffer is released by the writer that filled it, so only values up to the
    /// reserved mark are taken here.
    fn fold_staged(&self, state: &mut AggregatorState) {
        let reserved = self.buffer.reserved();
        if reserved > state.next_flush {
            let data = &mut state.data;
            self.buffer
                .drain(state.next_flush, reserved, |value| data.add(value));
            state.next_flush = reserved;
        }
    }

    fn create_aggregate(
        &self,
        data: RunningAggregate,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> MetricAggregate {
        let (sum, sum_of_squares) = match self.config.restrict_to_u32_values {
            true => (data.sum.round(), data.sum_of_squares.round()),
            false => (data.sum, data.sum_of_squares),
        };

        let mut values = BTreeMap::new();
        values.insert(aggregate::SUM, ensure_finite(sum));
        values.insert(aggregate::MIN, ensure_finite(data.min));
        values.insert(aggregate::MAX, ensure_finite(data.max));

        if self.config.kind == AggregationKind::Measurement {
            values.insert(aggregate::COUNT, data.count as f64);
            values.insert(
                aggregate::STD_DEV,
                ensure_finite(data.std_dev(sum, sum_of_squares)),
            );
        }

        MetricAggregate {
            namespace: self.series.namespace().to_owned(),
            metric_id: self.series.metric_id().to_owned(),
            aggregation_kind_moniker: self.config.kind.moniker(),
            period_start,
            period_duration: (period_end - period_start).to_std().unwrap_or_default(),
            dimensions: self.series.dimensions().clone(),
            data: values,
        }
    }
}

impl fmt::Debug for MetricSeriesAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSeriesAggregator")
            .field("series", &self.series)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::TimeZone;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::filter::FilterError;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn measurement() -> MetricSeriesAggregator {
        MetricSeriesAggregator::new(
            Arc::new(SeriesIdentity::new("ns", "duration", [("route", "/")])),
            SeriesConfig::default(),
            start(),
        )
    }

    #[test]
    fn test_ignores_nan() {
        let aggregator = measurement();
        for value in [1.0, 2.0, 3.0, f64::NAN, 5.0] {
            aggregator.track_value(value).unwrap();
        }

        let aggregate = aggregator
            .complete_aggregation(start() + chrono::Duration::seconds(60))
            .unwrap();

        assert_eq!(aggregate.value(aggregate::COUNT), Some(4.0));
        assert_eq!(aggregate.value(aggregate::SUM), Some(11.0));
        assert_eq!(aggregate.value(aggregate::MIN), Some(1.0));
        assert_eq!(aggregate.value(aggregate::MAX), Some(5.0));
        assert_eq!(aggregate.period_duration.as_secs(), 60);
    }

    #[test]
    fn test_aggregate_snapshot() {
        let aggregator = measurement();
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            aggregator.track_value(value).unwrap();
        }

        let aggregate = aggregator
            .complete_aggregation(start() + chrono::Duration::seconds(60))
            .unwrap();

        insta::assert_json_snapshot!(aggregate, @r###"
        {
          "namespace": "ns",
          "metricId": "duration",
          "aggregationKindMoniker": "Microsoft.Azure.Measurement",
          "periodStart": "2024-01-01T00:00:00Z",
          "periodDuration": {
            "secs": 60,
            "nanos": 0
          },
          "dimensions": {
            "route": "/"
          },
          "data": {
            "Count": 8.0,
            "Max": 9.0,
            "Min": 2.0,
            "StdDev": 2.0,
            "Sum": 40.0
          }
        }
        "###);
    }

    #[test]
    fn test_empty_period() {
        let aggregator = measurement();
        assert_eq!(aggregator.complete_aggregation(start()), None);

        aggregator.track_value(1.0).unwrap();
        assert!(aggregator.complete_aggregation(start()).is_some());
        assert_eq!(aggregator.complete_aggregation(start()), None);
    }

    #[test]
    fn test_flushes_full_buffer() {
        let aggregator = MetricSeriesAggregator::with_capacity(
            Arc::new(SeriesIdentity::new("ns", "id", [] as [(&str, &str); 0])),
            SeriesConfig::default(),
            start(),
            4,
        );

        for value in 1..=10 {
            aggregator.track_value(f64::from(value)).unwrap();
        }

        let aggregate = aggregator.complete_aggregation(start()).unwrap();
        assert_eq!(aggregate.value(aggregate::COUNT), Some(10.0));
        assert_eq!(aggregate.value(aggregate::SUM), Some(55.0));
    }

    #[test]
    fn test_accumulator_keeps_values() {
        let aggregator = MetricSeriesAggregator::new(
            Arc::new(SeriesIdentity::new("ns", "total", [] as [(&str, &str); 0])),
            SeriesConfig {
                kind: AggregationKind::Accumulator,
                restrict_to_u32_values: false,
            },
            start(),
        );

        aggregator.track_value(3.0).unwrap();
        let first = aggregator.complete_aggregation(start()).unwrap();
        aggregator.track_value(4.0).unwrap();
        let second = aggregator.complete_aggregation(start()).unwrap();

        assert_eq!(first.value(aggregate::SUM), Some(3.0));
        assert_eq!(second.value(aggregate::SUM), Some(7.0));
        assert_eq!(second.value(aggregate::COUNT), None);
        assert_eq!(second.aggregation_kind_moniker, "Microsoft.Azure.Accumulator");
    }

    #[test]
    fn test_integral_values() {
        let aggregator = MetricSeriesAggregator::new(
            Arc::new(SeriesIdentity::new("ns", "count", [] as [(&str, &str); 0])),
            SeriesConfig {
                kind: AggregationKind::Measurement,
                restrict_to_u32_values: true,
            },
            start(),
        );

        assert_eq!(
            aggregator.track_value(0.5),
            Err(TrackValueError::NotIntegral(0.5))
        );
        aggregator.track_value(3.0).unwrap();

        let aggregate = aggregator.complete_aggregation(start()).unwrap();
        assert_eq!(aggregate.value(aggregate::COUNT), Some(1.0));
    }

    #[test]
    fn test_infinite_values_are_finite() {
        let aggregator = measurement();
        aggregator.track_value(f64::INFINITY).unwrap();

        let aggregate = aggregator.complete_aggregation(start()).unwrap();
        assert_eq!(aggregate.value(aggregate::SUM), Some(f64::MAX));
        assert_eq!(aggregate.value(aggregate::MAX), Some(f64::MAX));
        assert!(aggregate.data.values().all(|value| value.is_finite()));
    }

    #[test]
    fn test_value_filter() {
        let aggregator = measurement();
        let filter =
            |_: &SeriesIdentity, value: f64| -> Result<bool, FilterError> { Ok(value < 10.0) };
        aggregator.reset(start(), Some(Arc::new(filter)));

        for value in [1.0, 20.0, 2.0] {
            aggregator.track_value(value).unwrap();
        }

        let aggregate = aggregator.complete_aggregation(start()).unwrap();
        assert_eq!(aggregate.value(aggregate::COUNT), Some(2.0));
    }

    #[test]
    fn test_sealed_refuses_values() {
        let aggregator = measurement();
        aggregator.track_value(1.0).unwrap();

        let aggregate = aggregator.seal(start()).unwrap();
        assert_eq!(aggregate.value(aggregate::COUNT), Some(1.0));
        assert!(aggregator.is_sealed());

        assert_eq!(aggregator.record(2.0), Ok(TrackOutcome::Sealed));
        aggregator.track_value(3.0).unwrap();
        assert_eq!(aggregator.complete_aggregation(start()), None);
    }

    #[test]
    fn test_concurrent_seal_accounts_every_value() {
        let aggregator = MetricSeriesAggregator::with_capacity(
            Arc::new(SeriesIdentity::new("ns", "id", [] as [(&str, &str); 0])),
            SeriesConfig::default(),
            start(),
            16,
        );

        let mut accepted = 0.0;
        let mut counted = 0.0;
        thread::scope(|scope| {
            let writer = scope.spawn(|| {
                let mut accepted = 0.0;
                for _ in 0..20_000 {
                    if aggregator.record(1.0) == Ok(TrackOutcome::Accepted) {
                        accepted += 1.0;
                    }
                }
                accepted
            });

            thread::yield_now();
            if let Some(aggregate) = aggregator.seal(start()) {
                counted = aggregate.value(aggregate::COUNT).unwrap_or_default();
            }
            accepted = writer.join().unwrap();
        });

        assert_eq!(counted, accepted);
    }

    #[test]
    fn test_concurrent_periods_account_every_value() {
        let aggregator = MetricSeriesAggregator::with_capacity(
            Arc::new(SeriesIdentity::new("ns", "id", [] as [(&str, &str); 0])),
            SeriesConfig::default(),
            start(),
            16,
        );

        let mut counted = 0.0;
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..5_000 {
                        aggregator.track_value(1.0).unwrap();
                    }
                });
            }

            for _ in 0..100 {
                if let Some(aggregate) = aggregator.complete_aggregation(start()) {
                    counted += aggregate.value(aggregate::COUNT).unwrap_or_default();
                }
                thread::yield_now();
            }
        });

        if let Some(aggregate) = aggregator.complete_aggregation(start()) {
            counted += aggregate.value(aggregate::COUNT).unwrap_or_default();
        }

        assert_eq!(counted, 20_000.0);
    }
}
