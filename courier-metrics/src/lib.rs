//! Multidimensional metric aggregation.
//!
//! Applications track raw values on a [`Metric`]. Every combination of dimension values is a
//! [`MetricSeries`], stored in a [`BoundedDimensionalCube`] that bounds the number of distinct
//! values per dimension and the number of series in total.
//!
//! Values of a series are aggregated by one [`MetricSeriesAggregator`] per active aggregation
//! cycle. The [`AggregationManager`] owns the aggregators of all cycles and completes them at
//! the end of every period into an [`AggregationPeriodSummary`]:
//!
//! - **Default**: always active and cycled by the [`AggregationCycleService`].
//! - **QuickPulse** and **Custom**: started, cycled and stopped by the application, optionally
//!   with a [`MetricSeriesFilter`] selecting the series they aggregate.
//! - **Persistent**: aggregators that retain their values across periods, such as
//!   [`AggregationKind::Accumulator`]. They are completed by every cycle.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use courier_metrics::{AggregationManager, CycleKind, Metric, MetricConfig, MetricIdentifier};
//!
//! let manager = Arc::new(AggregationManager::new(Utc::now()));
//! let metric = Metric::new(
//!     manager.clone(),
//!     MetricIdentifier::new("app", "request.duration", ["route"]),
//!     MetricConfig::default(),
//! )
//! .unwrap();
//!
//! metric.track_value(&["/index"], 12.5).unwrap();
//!
//! let summary = manager
//!     .start_or_cycle(CycleKind::Default, Utc::now(), None)
//!     .unwrap();
//! assert_eq!(summary.nonpersistent_aggregations.len(), 1);
//! ```
#![warn(missing_docs)]

mod aggregate;
mod aggregator;
mod buffer;
mod config;
mod cube;
mod filter;
mod manager;
mod metric;
mod series;
mod service;
mod statsd;

pub use self::aggregate::*;
pub use self::aggregator::*;
pub use self::config::*;
pub use self::cube::*;
pub use self::filter::*;
pub use self::manager::{AggregationError, AggregationManager, AggregatorCollection, CycleKind};
pub use self::metric::*;
pub use self::series::*;
pub use self::service::*;
