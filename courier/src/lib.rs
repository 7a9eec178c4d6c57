//! A client-side telemetry pipeline.
//!
//! Telemetry items enter the pipeline through a [`TelemetryChannel`]. The channel samples
//! items, serializes the kept ones as JSON lines and collects them into batches. Batches are
//! delivered by a [`Transmitter`](transmission::Transmitter), which reacts to throttling,
//! errors and partial acceptance by the backend through its transmission policies.
//!
//! Pre-aggregated metrics are collected with the types in [`metrics`]. A channel consumes the
//! aggregates of an [`AggregationCycleService`](metrics::AggregationCycleService) and reports
//! them as [`MetricTelemetry`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use courier::config::Config;
//! use courier::sampling::{Telemetry, TelemetryType};
//! use courier::transmission::{Transmission, TransmissionResponse, TransportError, Upstream};
//! use courier::TelemetryChannel;
//!
//! struct Accepting;
//!
//! #[async_trait]
//! impl Upstream for Accepting {
//!     async fn send(&self, _: &Transmission) -> Result<TransmissionResponse, TransportError> {
//!         Ok(TransmissionResponse::new(200))
//!     }
//! }
//!
//! #[derive(serde::Serialize)]
//! struct Request {
//!     name: String,
//! }
//!
//! impl Telemetry for Request {
//!     fn telemetry_type(&self) -> TelemetryType {
//!         TelemetryType::Request
//!     }
//!
//!     fn operation_id(&self) -> Option<&str> {
//!         None
//!     }
//!
//!     fn sampling_percentage(&self) -> Option<f64> {
//!         None
//!     }
//!
//!     fn set_sampling_percentage(&mut self, _: f64) {}
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = Config::from_yaml_str("channel:\n  compress: false").unwrap();
//! let channel = TelemetryChannel::new(&config, Arc::new(Accepting)).unwrap();
//!
//! channel.track(Request { name: "GET /".to_owned() }).unwrap();
//! assert!(channel.flush().await);
//! # }
//! ```
#![warn(missing_docs)]

mod channel;
mod item;
mod setup;
mod statsd;

pub use self::channel::*;
pub use self::item::*;
pub use self::setup::*;

pub use courier_config as config;
pub use courier_metrics as metrics;
pub use courier_sampling as sampling;
pub use courier_transmission as transmission;
