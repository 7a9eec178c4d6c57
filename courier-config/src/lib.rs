//! Configuration for the courier telemetry pipeline.
//!
//! The [`Config`] aggregates the configuration of every component and is usually loaded from a
//! YAML file with [`Config::from_path`]. All sections and fields are optional:
//!
//! ```yaml
//! channel:
//!   endpoint: https://ingest.example.com/v2/track
//!   max_items_per_transmission: 200
//! adaptive_sampling: true
//! sampling:
//!   max_telemetry_items_per_second: 10
//! transmitter:
//!   max_sender_capacity: 5
//! ```
#![warn(missing_docs)]

mod config;

pub use self::config::*;
