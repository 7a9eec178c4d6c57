use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Data key of the number of values in a period.
pub const COUNT: &str = "Count";
/// Data key of the sum of all values.
pub const SUM: &str = "Sum";
/// Data key of the smallest value.
pub const MIN: &str = "Min";
/// Data key of the largest value.
pub const MAX: &str = "Max";
/// Data key of the standard deviation of all values.
pub const STD_DEV: &str = "StdDev";

/// The completed aggregation of a single series over one period.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricAggregate {
    /// The namespace of the metric.
    pub namespace: String,
    /// The identifier of the metric within its namespace.
    pub metric_id: String,
    /// Identifies the aggregation kind and therefore the keys of `data`.
    pub aggregation_kind_moniker: &'static str,
    /// The start of the aggregation period.
    pub period_start: DateTime<Utc>,
    /// The length of the aggregation period.
    pub period_duration: Duration,
    /// Dimension names mapped to the values of this series.
    pub dimensions: BTreeMap<String, String>,
    /// Aggregated values keyed by [`COUNT`], [`SUM`], [`MIN`], [`MAX`] and [`STD_DEV`].
    pub data: BTreeMap<&'static str, f64>,
}

impl MetricAggregate {
    /// Returns the aggregated value for `key`.
    pub fn value(&self, key: &str) -> Option<f64> {
        self.data.get(key).copied()
    }
}

/// All aggregates completed by a single cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationPeriodSummary {
    /// Aggregates of persistent aggregators, which are never reset.
    pub persistent_aggregations: Vec<MetricAggregate>,
    /// Aggregates of the aggregators that belonged to the completed period.
    pub nonpersistent_aggregations: Vec<MetricAggregate>,
}

impl AggregationPeriodSummary {
    /// Returns the total number of aggregates.
    pub fn len(&self) -> usize {
        self.persistent_aggregations.len() + self.nonpersistent_aggregations.len()
    }

    /// Returns `true` if the summary holds no aggregates.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all aggregates, persistent ones first.
    pub fn iter(&self) -> impl Iterator<Item = &MetricAggregate> {
        self.persistent_aggregations
            .iter()
            .chain(&self.nonpersistent_aggregations)
    }
}

/// Replaces values that cannot be reported with the closest finite value.
///
/// `NaN` becomes `0` and infinities become the largest finite value of the same sign.
pub fn ensure_finite(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else if value == f64::INFINITY {
        f64::MAX
    } else if value == f64::NEG_INFINITY {
        f64::MIN
    } else {
        value
    }
}
