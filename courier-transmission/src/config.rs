use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An error returned by [`TransmitterConfig::validate`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransmitterConfigError {
    /// The sender must be allowed at least one concurrent transmission.
    #[error("max sender capacity must be at least 1")]
    ZeroSenderCapacity,
    /// The slot delay is zero.
    #[error("backoff slot delay must be positive")]
    ZeroSlotDelay,
    /// The maximum delay is smaller than a single slot.
    #[error("backoff max delay ({max_delay}s) is smaller than the slot delay ({slot_delay}s)")]
    MaxDelayBelowSlotDelay {
        /// The configured slot delay in seconds.
        slot_delay: u64,
        /// The configured maximum delay in seconds.
        max_delay: u64,
    },
}

/// Parameters of the exponential backoff after failed transmissions.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay of a single backoff slot in seconds.
    ///
    /// The first failure after a success waits exactly one slot. Defaults to `10`.
    pub slot_delay: u64,

    /// Upper bound of any computed backoff delay in seconds.
    ///
    /// Delays requested by the backend through `Retry-After` are not bounded. Defaults to `3600`.
    pub max_delay: u64,
}

impl BackoffConfig {
    /// Delay of a single backoff slot.
    pub fn slot_delay(&self) -> Duration {
        Duration::from_secs(self.slot_delay)
    }

    /// Upper bound of any computed backoff delay.
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            slot_delay: 10,
            max_delay: 3600,
        }
    }
}

/// Parameters of the [`Transmitter`](crate::Transmitter).
///
/// The capacities are upper bounds. Transmission policies may lower them temporarily.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransmitterConfig {
    /// Maximum number of transmissions sent concurrently.
    ///
    /// Defaults to `3`.
    pub max_sender_capacity: usize,

    /// Maximum total size in bytes of transmissions waiting in memory.
    ///
    /// Defaults to 1 MiB.
    pub max_buffer_capacity: usize,

    /// Maximum total size in bytes of transmissions held by the storage.
    ///
    /// Defaults to 50 MiB.
    pub max_storage_capacity: usize,

    /// Backoff parameters after failed transmissions.
    pub backoff: BackoffConfig,

    /// Enables pausing transmission on credential errors instead of dropping data.
    ///
    /// Defaults to `false`.
    pub authentication_policy: bool,
}

impl TransmitterConfig {
    /// Checks that the configuration can be used to build a transmitter.
    pub fn validate(&self) -> Result<(), TransmitterConfigError> {
        if self.max_sender_capacity == 0 {
            return Err(TransmitterConfigError::ZeroSenderCapacity);
        }

        if self.backoff.slot_delay == 0 {
            return Err(TransmitterConfigError::ZeroSlotDelay);
        }

        if self.backoff.max_delay < self.backoff.slot_delay {
            return Err(TransmitterConfigError::MaxDelayBelowSlotDelay {
                slot_delay: self.backoff.slot_delay,
                max_delay: self.backoff.max_delay,
            });
        }

        Ok(())
    }
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            max_sender_capacity: 3,
            max_buffer_capacity: 1024 * 1024,
            max_storage_capacity: 50 * 1024 * 1024,
            backoff: BackoffConfig::default(),
            authentication_policy: false,
        }
    }
}
