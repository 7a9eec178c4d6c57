use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use parking_lot::Mutex;

use crate::aggregator::{MetricSeriesAggregator, TrackOutcome, TrackValueError};
use crate::config::SeriesConfig;
use crate::manager::{AggregationManager, AggregatorCollection, CycleKind, Registration};

/// Identifies a single series: a metric and one value for each of its dimensions.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SeriesIdentity {
    namespace: String,
    metric_id: String,
    dimensions: BTreeMap<String, String>,
}

impl SeriesIdentity {
    /// Creates the identity of a series.
    pub fn new<I, K, V>(
        namespace: impl Into<String>,
        metric_id: impl Into<String>,
        dimensions: I,
    ) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            metric_id: metric_id.into(),
            dimensions: dimensions
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }

    /// The namespace of the metric.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The identifier of the metric.
    pub fn metric_id(&self) -> &str {
        &self.metric_id
    }

    /// Dimension names mapped to values.
    pub fn dimensions(&self) -> &BTreeMap<String, String> {
        &self.dimensions
    }
}

impl fmt::Display for SeriesIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.namespace.is_empty() {
            write!(f, "{}/", self.namespace)?;
        }
        write!(f, "{}", self.metric_id)?;

        for (index, (name, value)) in self.dimensions.iter().enumerate() {
            let separator = if index == 0 { '[' } else { ',' };
            write!(f, "{separator}{name}={value}")?;
        }
        if !self.dimensions.is_empty() {
            write!(f, "]")?;
        }

        Ok(())
    }
}

/// The aggregator of a series for one collection.
///
/// `aggregator` is `None` if the filter of the collection rejected the series.
struct CachedAggregator {
    collection: Weak<AggregatorCollection>,
    aggregator: Option<Arc<MetricSeriesAggregator>>,
}

impl CachedAggregator {
    fn belongs_to(&self, collection: &Arc<AggregatorCollection>) -> bool {
        std::ptr::eq(self.collection.as_ptr(), Arc::as_ptr(collection))
    }
}

/// A single series that routes tracked values to the aggregators of all active cycles.
///
/// The series caches its aggregator for every cycle kind. Once a cycle swaps in a new
/// collection, the next tracked value creates a fresh aggregator and registers it with the
/// [`AggregationManager`]. Values racing with a cycle are counted in exactly one period.
pub struct MetricSeries {
    identity: Arc<SeriesIdentity>,
    config: SeriesConfig,
    manager: Arc<AggregationManager>,
    persistent: OnceLock<Arc<MetricSeriesAggregator>>,
    cached: [ArcSwapOption<CachedAggregator>; 3],
    creation: Mutex<()>,
}

impl MetricSeries {
    /// Creates a series aggregated by `manager`.
    pub fn new(
        manager: Arc<AggregationManager>,
        identity: SeriesIdentity,
        config: SeriesConfig,
    ) -> Self {
        Self {
            identity: Arc::new(identity),
            config,
            manager,
            persistent: OnceLock::new(),
            cached: Default::default(),
            creation: Mutex::new(()),
        }
    }

    /// The identity of this series.
    pub fn identity(&self) -> &SeriesIdentity {
        &self.identity
    }

    /// The configuration of this series.
    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    /// Tracks a value in all active cycles.
    ///
    /// `NaN` is ignored.
    pub fn track_value(&self, value: f64) -> Result<(), TrackValueError> {
        if value.is_nan() {
            return Ok(());
        }

        self.config.validate_value(value)?;

        if self.config.requires_persistent_aggregation() {
            return self.persistent_aggregator().track_value(value);
        }

        for kind in CycleKind::ALL {
            // A sealed aggregator belongs to a collection that was just cycled out. Resolve the
            // aggregator again so the value lands in the next period.
            while let Some(aggregator) = self.aggregator(kind) {
                if aggregator.record(value)? == TrackOutcome::Accepted {
                    break;
                }
            }
        }

        Ok(())
    }

    fn persistent_aggregator(&self) -> &Arc<MetricSeriesAggregator> {
        self.persistent.get_or_init(|| {
            let aggregator = Arc::new(MetricSeriesAggregator::new(
                Arc::clone(&self.identity),
                self.config,
                Utc::now(),
            ));
            self.manager
                .add_aggregator(CycleKind::Default, Arc::clone(&aggregator));
            aggregator
        })
    }

    /// Returns the aggregator of the active collection of `kind`.
    fn aggregator(&self, kind: CycleKind) -> Option<Arc<MetricSeriesAggregator>> {
        let collection = self.manager.active_collection(kind)?;
        let slot = &self.cached[kind.index()];

        if let Some(cached) = &*slot.load()
            && cached.belongs_to(&collection)
        {
            return cached.aggregator.clone();
        }

        let _guard = self.creation.lock();
        if let Some(cached) = &*slot.load()
            && cached.belongs_to(&collection)
        {
            return cached.aggregator.clone();
        }

        let aggregator = Arc::new(MetricSeriesAggregator::new(
            Arc::clone(&self.identity),
            self.config,
            collection.period_start(),
        ));

        let cached = match self.manager.register(kind, Arc::clone(&aggregator)) {
            Registration::Accepted(collection) => CachedAggregator {
                collection: Arc::downgrade(&collection),
                aggregator: Some(aggregator),
            },
            Registration::Rejected(collection) => CachedAggregator {
                collection: Arc::downgrade(&collection),
                aggregator: None,
            },
            Registration::Inactive => return None,
        };

        let aggregator = cached.aggregator.clone();
        slot.store(Some(Arc::new(cached)));
        aggregator
    }
}

impl fmt::Debug for MetricSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricSeries")
            .field("identity", &self.identity)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::{DateTime, TimeZone};

    use super::*;
    use crate::aggregate;
    use crate::config::AggregationKind;
    use crate::filter::{FilterError, MetricSeriesFilter, SeriesDecision};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn series(manager: &Arc<AggregationManager>, config: SeriesConfig) -> MetricSeries {
        MetricSeries::new(
            Arc::clone(manager),
            SeriesIdentity::new("ns", "latency", [("region", "eu")]),
            config,
        )
    }

    #[test]
    fn test_display_identity() {
        let identity = SeriesIdentity::new("ns", "latency", [("b", "2"), ("a", "1")]);
        assert_eq!(identity.to_string(), "ns/latency[a=1,b=2]");

        let identity = SeriesIdentity::new("", "latency", [] as [(&str, &str); 0]);
        assert_eq!(identity.to_string(), "latency");
    }

    #[test]
    fn test_tracks_into_active_cycles() {
        courier_test::setup!();
        let manager = Arc::new(AggregationManager::new(start()));
        manager
            .start_or_cycle(CycleKind::Custom, start(), None)
            .unwrap();

        let series = series(&manager, SeriesConfig::default());
        series.track_value(1.0).unwrap();
        series.track_value(2.0).unwrap();

        let default = manager
            .start_or_cycle(CycleKind::Default, start(), None)
            .unwrap();
        let custom = manager.stop(CycleKind::Custom, start()).unwrap();

        for summary in [default, custom] {
            assert_eq!(summary.nonpersistent_aggregations.len(), 1);
            let aggregate = &summary.nonpersistent_aggregations[0];
            assert_eq!(aggregate.value(aggregate::SUM), Some(3.0));
            assert_eq!(aggregate.dimensions["region"], "eu");
        }
    }

    #[test]
    fn test_replaces_aggregator_after_cycle() {
        let manager = Arc::new(AggregationManager::new(start()));
        let series = series(&manager, SeriesConfig::default());

        series.track_value(1.0).unwrap();
        manager
            .start_or_cycle(CycleKind::Default, start(), None)
            .unwrap();

        series.track_value(5.0).unwrap();
        let summary = manager
            .start_or_cycle(CycleKind::Default, start(), None)
            .unwrap();

        let aggregate = &summary.nonpersistent_aggregations[0];
        assert_eq!(aggregate.value(aggregate::SUM), Some(5.0));
        assert_eq!(aggregate.value(aggregate::COUNT), Some(1.0));
    }

    #[test]
    fn test_filter_runs_once_per_cycle() {
        let manager = Arc::new(AggregationManager::new(start()));
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let filter: Arc<dyn MetricSeriesFilter> = Arc::new(
            move |_: &SeriesIdentity| -> Result<SeriesDecision, FilterError> {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(SeriesDecision::Reject)
            },
        );
        manager
            .start_or_cycle(CycleKind::QuickPulse, start(), Some(filter))
            .unwrap();

        let series = series(&manager, SeriesConfig::default());
        for value in 0..10 {
            series.track_value(f64::from(value)).unwrap();
        }

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let summary = manager.stop(CycleKind::QuickPulse, start()).unwrap();
        assert!(summary.nonpersistent_aggregations.is_empty());
    }

    #[test]
    fn test_persistent_series() {
        let manager = Arc::new(AggregationManager::new(start()));
        let config = SeriesConfig {
            kind: AggregationKind::Accumulator,
            restrict_to_u32_values: true,
        };
        let series = series(&manager, config);

        series.track_value(2.0).unwrap();
        assert!(series.track_value(2.5).is_err());

        let summary = manager
            .start_or_cycle(CycleKind::Default, start(), None)
            .unwrap();
        assert_eq!(summary.persistent_aggregations.len(), 1);
        assert!(summary.nonpersistent_aggregations.is_empty());
    }

    #[test]
    fn test_concurrent_tracking_creates_one_aggregator() {
        let manager = Arc::new(AggregationManager::new(start()));
        let series = series(&manager, SeriesConfig::default());

        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        series.track_value(1.0).unwrap();
                    }
                });
            }
        });

        let collection = manager.active_collection(CycleKind::Default).unwrap();
        assert_eq!(collection.len(), 1);

        let summary = manager
            .start_or_cycle(CycleKind::Default, start(), None)
            .unwrap();
        let aggregate = &summary.nonpersistent_aggregations[0];
        assert_eq!(aggregate.value(aggregate::COUNT), Some(8000.0));
    }

    #[test]
    fn test_cycling_while_tracking_counts_every_value() {
        let manager = Arc::new(AggregationManager::new(start()));
        let series = series(&manager, SeriesConfig::default());

        let writers = 4;
        let per_writer = 50_000;
        let done = std::sync::atomic::AtomicUsize::new(0);
        let mut counted = 0.0;

        let mut count = |summary: aggregate::AggregationPeriodSummary| {
            for aggregate in &summary.nonpersistent_aggregations {
                counted += aggregate.value(aggregate::COUNT).unwrap_or_default();
            }
        };

        thread::scope(|scope| {
            for _ in 0..writers {
                scope.spawn(|| {
                    for _ in 0..per_writer {
                        series.track_value(1.0).unwrap();
                    }
                    done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
            }

            while done.load(std::sync::atomic::Ordering::SeqCst) < writers {
                count(
                    manager
                        .start_or_cycle(CycleKind::Default, start(), None)
                        .unwrap(),
                );
            }
        });

        count(
            manager
                .start_or_cycle(CycleKind::Default, start(), None)
                .unwrap(),
        );

        assert_eq!(counted, (writers * per_writer) as f64);
    }
}
