//! Sampling of telemetry items.
//!
//! The [`SamplingProcessor`] keeps a fraction of all telemetry items. Its decision is derived
//! from the item's operation id, so every item of one logical operation shares the same fate,
//! also across processes running other SDKs.
//!
//! The [`AdaptiveSamplingProcessor`] additionally observes the throughput of kept items and
//! moves the sampling percentage so that it stays below a configured rate of items per second.
//!
//! # Example
//!
//! ```
//! use courier_sampling::{SamplingConfig, SamplingProcessor, Telemetry, TelemetryType};
//!
//! struct Request {
//!     operation_id: String,
//!     sampling_percentage: Option<f64>,
//! }
//!
//! impl Telemetry for Request {
//!     fn telemetry_type(&self) -> TelemetryType {
//!         TelemetryType::Request
//!     }
//!
//!     fn operation_id(&self) -> Option<&str> {
//!         Some(&self.operation_id)
//!     }
//!
//!     fn sampling_percentage(&self) -> Option<f64> {
//!         self.sampling_percentage
//!     }
//!
//!     fn set_sampling_percentage(&mut self, percentage: f64) {
//!         self.sampling_percentage = Some(percentage);
//!     }
//! }
//!
//! let processor = SamplingProcessor::new(SamplingConfig::default()).unwrap();
//! processor.set_sampling_percentage(25.0);
//!
//! let mut request = Request {
//!     operation_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_owned(),
//!     sampling_percentage: None,
//! };
//! let decision = processor.process(&mut request);
//! assert_eq!(request.sampling_percentage, Some(25.0));
//! # let _ = decision;
//! ```
#![warn(missing_docs)]

mod adaptive;
mod config;
mod estimator;
mod item;
mod processor;
mod score;
mod statsd;

pub use self::adaptive::*;
pub use self::config::*;
pub use self::estimator::*;
pub use self::item::*;
pub use self::processor::{SamplingDecision, SamplingProcessor};
pub use self::score::*;
