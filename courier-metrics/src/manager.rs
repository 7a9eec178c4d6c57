use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use courier_statsd::metric;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationPeriodSummary, MetricAggregate};
use crate::aggregator::MetricSeriesAggregator;
use crate::filter::{self, MetricSeriesFilter, SeriesDecision};
use crate::statsd::{MetricDistributions, MetricTimers};

/// An error returned for operations that the default cycle does not support.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum AggregationError {
    /// The default cycle aggregates all series and does not accept a filter.
    #[error("the default aggregation cycle does not accept a series filter")]
    FilterNotAllowed,
    /// The default cycle is always active.
    #[error("the default aggregation cycle cannot be stopped")]
    StopNotAllowed,
}

/// A named scope over which aggregators are grouped and completed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleKind {
    /// The regular cycle. Always active, never filtered.
    Default,
    /// The live metrics stream.
    QuickPulse,
    /// A cycle controlled by the application.
    Custom,
}

impl CycleKind {
    /// All cycle kinds.
    pub const ALL: [Self; 3] = [Self::Default, Self::QuickPulse, Self::Custom];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Default => 0,
            Self::QuickPulse => 1,
            Self::Custom => 2,
        }
    }

    /// Returns the name of the cycle kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::QuickPulse => "quickpulse",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The aggregators of one period of one cycle kind.
///
/// A collection is published once and replaced as a whole at the end of its period. The cycle
/// that replaces it seals it, after which no aggregators can be added.
pub struct AggregatorCollection {
    period_start: DateTime<Utc>,
    filter: Option<Arc<dyn MetricSeriesFilter>>,
    members: Mutex<Members>,
}

#[derive(Default)]
struct Members {
    aggregators: Vec<Arc<MetricSeriesAggregator>>,
    sealed: bool,
}

impl AggregatorCollection {
    fn new(period_start: DateTime<Utc>, filter: Option<Arc<dyn MetricSeriesFilter>>) -> Self {
        Self {
            period_start,
            filter,
            members: Mutex::default(),
        }
    }

    /// The start of the period.
    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    /// The series filter of the period.
    pub fn filter(&self) -> Option<&dyn MetricSeriesFilter> {
        self.filter.as_deref()
    }

    /// Returns the number of aggregators added to this collection.
    pub fn len(&self) -> usize {
        self.members.lock().aggregators.len()
    }

    /// Returns `true` if no aggregators were added to this collection.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds an aggregator unless the collection was sealed.
    fn push(&self, aggregator: Arc<MetricSeriesAggregator>) -> bool {
        let mut members = self.members.lock();
        if !members.sealed {
            members.aggregators.push(aggregator);
        }
        !members.sealed
    }

    /// Refuses further aggregators and returns the added ones.
    fn seal(&self) -> Vec<Arc<MetricSeriesAggregator>> {
        let mut members = self.members.lock();
        members.sealed = true;
        members.aggregators.clone()
    }
}

impl fmt::Debug for AggregatorCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregatorCollection")
            .field("period_start", &self.period_start)
            .field("filtered", &self.filter.is_some())
            .field("aggregators", &self.len())
            .finish()
    }
}

/// Outcome of registering an aggregator with the active collection of a cycle.
pub(crate) enum Registration {
    /// The aggregator was added to the collection.
    Accepted(Arc<AggregatorCollection>),
    /// The filter of the collection rejected the series.
    Rejected(Arc<AggregatorCollection>),
    /// The cycle is not active.
    Inactive,
}

/// Owns the aggregators of all cycle kinds and completes them at cycle boundaries.
///
/// Every cycle kind holds its active [`AggregatorCollection`] behind an atomic pointer. Cycling
/// swaps in a fresh collection and completes the previous one afterwards, so writers are never
/// blocked by a cycle. Persistent aggregators are shared by all kinds and never swapped.
pub struct AggregationManager {
    cycles: [ArcSwapOption<AggregatorCollection>; 3],
    persistent: Mutex<Vec<Arc<MetricSeriesAggregator>>>,
}

impl AggregationManager {
    /// Creates a manager with an active default cycle starting at `period_start`.
    pub fn new(period_start: DateTime<Utc>) -> Self {
        let default = AggregatorCollection::new(period_start, None);

        Self {
            cycles: [
                ArcSwapOption::from_pointee(default),
                ArcSwapOption::empty(),
                ArcSwapOption::empty(),
            ],
            persistent: Mutex::new(Vec::new()),
        }
    }

    /// Returns the active collection of `kind`, if the cycle is active.
    pub fn active_collection(&self, kind: CycleKind) -> Option<Arc<AggregatorCollection>> {
        self.cycles[kind.index()].load_full()
    }

    /// Returns `true` if the cycle of `kind` is active.
    pub fn is_active(&self, kind: CycleKind) -> bool {
        self.cycles[kind.index()].load().is_some()
    }

    /// Starts a new period of `kind` at `timestamp` and completes the previous one.
    ///
    /// The new period aggregates only series accepted by `future_filter`. The default cycle
    /// does not accept a filter.
    pub fn start_or_cycle(
        &self,
        kind: CycleKind,
        timestamp: DateTime<Utc>,
        future_filter: Option<Arc<dyn MetricSeriesFilter>>,
    ) -> Result<AggregationPeriodSummary, AggregationError> {
        if kind == CycleKind::Default && future_filter.is_some() {
            return Err(AggregationError::FilterNotAllowed);
        }

        let next = AggregatorCollection::new(timestamp, future_filter);
        Ok(self.cycle(kind, timestamp, Some(Arc::new(next))))
    }

    /// Completes the current period of `kind` and deactivates the cycle.
    pub fn stop(
        &self,
        kind: CycleKind,
        timestamp: DateTime<Utc>,
    ) -> Result<AggregationPeriodSummary, AggregationError> {
        if kind == CycleKind::Default {
            return Err(AggregationError::StopNotAllowed);
        }

        Ok(self.cycle(kind, timestamp, None))
    }

    /// Adds an aggregator to the persistent group or the active collection of `kind`.
    ///
    /// Returns `false` if the cycle is inactive or its filter rejects the series.
    pub fn add_aggregator(&self, kind: CycleKind, aggregator: Arc<MetricSeriesAggregator>) -> bool {
        if aggregator.config().requires_persistent_aggregation() {
            self.persistent.lock().push(aggregator);
            return true;
        }

        matches!(self.register(kind, aggregator), Registration::Accepted(_))
    }

    /// Adds a non-persistent aggregator to the active collection of `kind`.
    ///
    /// The aggregator is reset to the period of the collection and the value filter chosen by
    /// the series filter.
    pub(crate) fn register(
        &self,
        kind: CycleKind,
        aggregator: Arc<MetricSeriesAggregator>,
    ) -> Registration {
        // A collection sealed between loading and pushing was cycled out. Retry with the
        // collection that replaced it.
        loop {
            let Some(collection) = self.active_collection(kind) else {
                return Registration::Inactive;
            };

            let value_filter =
                match filter::series_decision(collection.filter(), aggregator.series()) {
                    SeriesDecision::Reject => return Registration::Rejected(collection),
                    SeriesDecision::Accept => None,
                    SeriesDecision::AcceptWithValueFilter(value_filter) => Some(value_filter),
                };

            aggregator.reset(collection.period_start(), value_filter);
            if collection.push(Arc::clone(&aggregator)) {
                return Registration::Accepted(collection);
            }
        }
    }

    fn cycle(
        &self,
        kind: CycleKind,
        timestamp: DateTime<Utc>,
        next: Option<Arc<AggregatorCollection>>,
    ) -> AggregationPeriodSummary {
        metric!(timer(MetricTimers::CycleDuration), kind = kind.as_str(), {
            let previous = self.cycles[kind.index()].swap(next);

            let persistent = self.persistent.lock().clone();
            let persistent_aggregations = complete_persistent(
                &persistent,
                timestamp,
                previous.as_ref().and_then(|collection| collection.filter()),
            );

            let nonpersistent_aggregations = match previous {
                Some(collection) => collection
                    .seal()
                    .iter()
                    .filter_map(|aggregator| aggregator.seal(timestamp))
                    .collect(),
                None => Vec::new(),
            };

            let summary = AggregationPeriodSummary {
                persistent_aggregations,
                nonpersistent_aggregations,
            };

            metric!(
                distribution(MetricDistributions::CycleAggregates) = summary.len() as u64,
                kind = kind.as_str()
            );
            courier_log::trace!(
                kind = %kind,
                aggregates = summary.len(),
                "completed aggregation cycle"
            );

            summary
        })
    }
}

impl fmt::Debug for AggregationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("AggregationManager");
        for kind in CycleKind::ALL {
            debug.field(kind.as_str(), &self.active_collection(kind));
        }
        debug
            .field("persistent", &self.persistent.lock().len())
            .finish()
    }
}

/// Completes all persistent `aggregators` whose series pass `filter`.
fn complete_persistent(
    aggregators: &[Arc<MetricSeriesAggregator>],
    timestamp: DateTime<Utc>,
    filter: Option<&dyn MetricSeriesFilter>,
) -> Vec<MetricAggregate> {
    aggregators
        .iter()
        .filter(|aggregator| {
            filter.is_none()
                || !matches!(
                    filter::series_decision(filter, aggregator.series()),
                    SeriesDecision::Reject
                )
        })
        .filter_map(|aggregator| aggregator.complete_aggregation(timestamp))
        .collect()
}
