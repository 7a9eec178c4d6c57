//! Logging for the courier telemetry pipeline.
//!
//! Every courier crate logs through the macros re-exported here: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`]. They come from `tracing` and take structured fields
//! next to the message.
//!
//! With the `init` feature, `init` installs a subscriber configured by a `LogConfig`, which is
//! usually read from the `logging` section of the pipeline configuration:
//!
//! ```ignore
//! courier_log::init(&courier_log::LogConfig {
//!     format: courier_log::LogFormat::Json,
//!     ..Default::default()
//! });
//! ```
//!
//! ## Levels
//!
//! Messages are lowercase without trailing punctuation. Values go into fields, not into the
//! message text.
//!
//! - [`error!`]: telemetry was lost for good, or a bug was hit.
//! - [`warn!`]: the backend throttles or rejects, or storage is failing.
//! - [`info!`]: startup and shutdown of the channel.
//! - [`debug!`]: capacity changes, backoff and sampling adjustments.
//! - [`trace!`]: single items and transmissions.
//!
//! ```
//! courier_log::debug!(capacity = 3, "sender capacity restored");
//! ```
//!
//! ## Errors
//!
//! [`LogError`] prints an error followed by its chain of sources.
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use courier_log::LogError;
//!
//! let error = Error::new(ErrorKind::Other, "disk full");
//! courier_log::warn!("could not persist transmission: {}", LogError(&error));
//! ```
//!
//! ## Tests
//!
//! With the `test` feature, the `init_test!` macro routes logs into the output of the test
//! runner instead. Most tests invoke it through `courier_test::setup!`,
//! which expands in the calling crate so that `module_path!` names the crate under test.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

#[cfg(any(feature = "init", feature = "test"))]
mod crates;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{Level, debug, enabled, error, event, info, trace, warn};
