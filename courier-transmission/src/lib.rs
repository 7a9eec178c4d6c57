//! Delivery of telemetry batches to the ingestion endpoint.
//!
//! Serialized telemetry is sent in [`Transmission`]s. A [`Transmitter`] moves transmissions
//! through three stages: the [`TransmissionSender`] performs sends through an [`Upstream`], the
//! [`TransmissionBuffer`] holds transmissions in memory while all send slots are taken, and a
//! [`TransmissionStorage`] takes what does not fit into the buffer.
//!
//! The capacities of these stages are governed by [`TransmissionPolicy`]s. Each policy reacts
//! to the outcome of sends or to changes in the environment:
//!
//!  - [`ThrottlingPolicy`] pauses sending when the backend throttles.
//!  - [`ErrorHandlingPolicy`] retries after transient errors and drops rejected data.
//!  - [`PartialSuccessPolicy`] sends items again that were rejected in a partial success.
//!  - [`AuthenticationPolicy`] pauses on credential errors, if enabled.
//!  - [`NetworkAvailabilityPolicy`] stops sending while the network is down.
//!  - [`ApplicationLifecyclePolicy`] stops sending when the application shuts down.
//!
//! Pauses are lifted by a [`BackoffTimer`] after a delay computed by the shared
//! [`BackoffLogic`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use courier_transmission::{
//!     ContentEncoding, Transmission, TransmissionResponse, Transmitter, TransmitterConfig,
//!     TransportError, Upstream,
//! };
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
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transmitter = Transmitter::builder(TransmitterConfig::default(), Arc::new(Accepting))
//!     .build()
//!     .unwrap();
//!
//! let transmission = Transmission::from_lines(
//!     "https://ingest.example.com/v2/track",
//!     [r#"{"name":"Request"}"#],
//!     ContentEncoding::Gzip,
//! )
//! .unwrap();
//!
//! assert!(transmitter.flush(transmission).wait().await);
//! # }
//! ```
#![warn(missing_docs)]

mod backoff;
mod buffer;
mod config;
mod policy;
mod sender;
mod statsd;
mod status;
mod storage;
mod timer;
mod transmission;
mod transmitter;

pub use self::backoff::*;
pub use self::buffer::*;
pub use self::config::*;
pub use self::policy::*;
pub use self::sender::*;
pub use self::status::*;
pub use self::storage::*;
pub use self::timer::*;
pub use self::transmission::*;
pub use self::transmitter::*;
