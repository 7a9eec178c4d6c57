//! Internal statsd measurements of the telemetry pipeline.
//!
//! The pipeline reports on itself through this crate: sampling percentages, sender and buffer
//! capacities, dropped transmissions and aggregation cycles. These measurements go to a statsd
//! server and are never mixed with the telemetry the pipeline transports.
//!
//! Every measurement is declared as a variant of an enum implementing one of
//! [`CounterMetric`], [`GaugeMetric`], [`DistributionMetric`] or [`TimerMetric`]. The trait
//! only supplies the name, but it ties each name to exactly one kind of metric. Measurements are
//! then emitted with the [`metric!`] macro:
//!
//! ```
//! use courier_statsd::{metric, CounterMetric};
//!
//! enum SenderCounters {
//!     Retried,
//! }
//!
//! impl CounterMetric for SenderCounters {
//!     fn name(&self) -> &'static str {
//!         match self {
//!             Self::Retried => "sender.retried",
//!         }
//!     }
//! }
//!
//! metric!(counter(SenderCounters::Retried) += 1, status = "503");
//! ```
//!
//! Until [`init`] is called, emitting a metric does nothing:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! # use courier_statsd::MetricsClientConfig;
//! courier_statsd::init(MetricsClientConfig {
//!     prefix: "courier",
//!     host: "127.0.0.1:8125",
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//! })
//! .ok();
//! ```

#![warn(missing_docs)]

mod client;
mod macros;
mod names;

pub use cadence::MetricError;

pub use self::client::*;
pub use self::names::*;

#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}
