//! User-supplied filters selecting which series and values a cycle aggregates.
//!
//! Filters are user code. An error returned by a filter is logged and treated as acceptance, so
//! that a faulty filter never silently drops all metrics.

use std::fmt;
use std::sync::Arc;

use courier_log::LogError;
use courier_statsd::metric;

use crate::series::SeriesIdentity;
use crate::statsd::MetricCounters;

/// An error returned by a user-supplied filter.
pub type FilterError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The decision of a [`MetricSeriesFilter`] for a series.
#[derive(Clone)]
pub enum SeriesDecision {
    /// The series is not aggregated in this cycle.
    Reject,
    /// All values of the series are aggregated.
    Accept,
    /// Values of the series are aggregated if the value filter accepts them.
    AcceptWithValueFilter(Arc<dyn MetricValueFilter>),
}

impl fmt::Debug for SeriesDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reject => write!(f, "Reject"),
            Self::Accept => write!(f, "Accept"),
            Self::AcceptWithValueFilter(_) => write!(f, "AcceptWithValueFilter(..)"),
        }
    }
}

/// Decides which series an aggregation cycle consumes.
pub trait MetricSeriesFilter: Send + Sync {
    /// Returns whether values of `series` are aggregated.
    fn will_consume(&self, series: &SeriesIdentity) -> Result<SeriesDecision, FilterError>;
}

impl<F> MetricSeriesFilter for F
where
    F: Fn(&SeriesIdentity) -> Result<SeriesDecision, FilterError> + Send + Sync,
{
    fn will_consume(&self, series: &SeriesIdentity) -> Result<SeriesDecision, FilterError> {
        self(series)
    }
}

/// Decides which values of an accepted series are aggregated.
pub trait MetricValueFilter: Send + Sync {
    /// Returns `true` if `value` is aggregated for `series`.
    fn will_consume(&self, series: &SeriesIdentity, value: f64) -> Result<bool, FilterError>;
}

impl<F> MetricValueFilter for F
where
    F: Fn(&SeriesIdentity, f64) -> Result<bool, FilterError> + Send + Sync,
{
    fn will_consume(&self, series: &SeriesIdentity, value: f64) -> Result<bool, FilterError> {
        self(series, value)
    }
}

/// Evaluates `filter`, accepting the series if there is no filter or it fails.
pub(crate) fn series_decision(
    filter: Option<&dyn MetricSeriesFilter>,
    series: &SeriesIdentity,
) -> SeriesDecision {
    let Some(filter) = filter else {
        return SeriesDecision::Accept;
    };

    match filter.will_consume(series) {
        Ok(decision) => decision,
        Err(error) => {
            courier_log::warn!(
                error = %LogError(&*error),
                series = %series,
                "series filter failed, accepting series"
            );
            metric!(counter(MetricCounters::FilterFailed) += 1, filter = "series");
            SeriesDecision::Accept
        }
    }
}

/// Evaluates `filter` for a single value, accepting it if the filter fails.
pub(crate) fn accepts_value(
    filter: &dyn MetricValueFilter,
    series: &SeriesIdentity,
    value: f64,
) -> bool {
    match filter.will_consume(series, value) {
        Ok(accepted) => accepted,
        Err(error) => {
            courier_log::debug!(
                error = %LogError(&*error),
                series = %series,
                "value filter failed, accepting value"
            );
            metric!(counter(MetricCounters::FilterFailed) += 1, filter = "value");
            true
        }
    }
}
