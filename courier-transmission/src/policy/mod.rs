//! Policies that react to transmission outcomes and environment changes by constraining the
//! capacities of a [`Transmitter`].
//!
//! Every policy owns a [`PolicyCapacity`]. After changing it, the policy calls
//! [`Transmitter::apply_policies`], which combines the capacities of all policies and pushes the
//! result to the sender, buffer and storage stages. Policies that pause transmission restore
//! their capacity with a [`BackoffTimer`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_statsd::metric;
use parking_lot::Mutex;

use crate::statsd::TransmissionCounters;
use crate::timer::BackoffTimer;
use crate::transmission::TransmissionOutcome;
use crate::transmitter::Transmitter;

mod authentication;
mod error_handling;
mod lifecycle;
mod network;
mod partial_success;
mod throttling;

pub use self::authentication::*;
pub use self::error_handling::*;
pub use self::lifecycle::*;
pub use self::network::*;
pub use self::partial_success::*;
pub use self::throttling::*;

/// Upper bounds a policy imposes on the stages of a transmitter.
///
/// `None` leaves a stage unconstrained.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PolicyCapacity {
    /// Maximum number of concurrent sends.
    pub max_sender_capacity: Option<usize>,
    /// Maximum size of the in-memory buffer in bytes.
    pub max_buffer_capacity: Option<usize>,
    /// Maximum size of the storage in bytes.
    pub max_storage_capacity: Option<usize>,
}

impl PolicyCapacity {
    /// No constraints.
    pub const UNCONSTRAINED: Self = Self {
        max_sender_capacity: None,
        max_buffer_capacity: None,
        max_storage_capacity: None,
    };

    /// Stops sending. Transmissions queue up in the buffer and storage.
    pub const PAUSED: Self = Self {
        max_sender_capacity: Some(0),
        max_buffer_capacity: None,
        max_storage_capacity: None,
    };

    /// Stops sending and buffering. Transmissions can only be stored.
    pub const STORE_ONLY: Self = Self {
        max_sender_capacity: Some(0),
        max_buffer_capacity: Some(0),
        max_storage_capacity: None,
    };

    /// Refuses all transmissions.
    pub const CLOSED: Self = Self {
        max_sender_capacity: Some(0),
        max_buffer_capacity: Some(0),
        max_storage_capacity: Some(0),
    };

    /// Returns `true` if no stage is constrained.
    pub fn is_unconstrained(&self) -> bool {
        *self == Self::UNCONSTRAINED
    }
}

/// An event delivered to every policy of a transmitter.
#[derive(Debug)]
pub enum PolicyEvent<'a> {
    /// A send completed, with or without a response.
    TransmissionSent(&'a TransmissionOutcome),
    /// The network configuration of the host changed.
    NetworkChanged,
    /// The application is shutting down.
    ApplicationStopping,
}

/// Reacts to events by constraining the capacities of a transmitter.
///
/// Implementations update their capacity before calling [`Transmitter::apply_policies`], and
/// only then enqueue transmissions again, so that re-enqueued transmissions already observe
/// the new capacities.
pub trait TransmissionPolicy: fmt::Debug + Send + Sync {
    /// A short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// The capacities this policy currently allows.
    fn capacity(&self) -> PolicyCapacity;

    /// Called once after the transmitter has been built.
    fn initialize(&self, _transmitter: &Transmitter) {}

    /// Handles an event.
    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter);
}

/// Capacity and backoff timer shared by the built-in policies.
#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    capacity: Arc<Mutex<PolicyCapacity>>,
    timer: BackoffTimer,
}

impl PolicyState {
    pub fn capacity(&self) -> PolicyCapacity {
        *self.capacity.lock()
    }

    /// Sets the capacity and applies it to the transmitter.
    pub fn apply(&self, capacity: PolicyCapacity, transmitter: &Transmitter) {
        *self.capacity.lock() = capacity;
        transmitter.apply_policies();
    }

    /// Applies `capacity` and lifts all constraints again after `delay`.
    ///
    /// Pausing again before the delay has passed restarts the timer.
    pub fn pause(
        &self,
        policy: &'static str,
        capacity: PolicyCapacity,
        delay: Duration,
        transmitter: &Transmitter,
    ) {
        self.apply(capacity, transmitter);

        courier_log::debug!(policy, ?delay, ?capacity, "pausing transmission");
        metric!(
            counter(TransmissionCounters::PolicyBackoff) += 1,
            policy = policy
        );

        let cell = Arc::clone(&self.capacity);
        let runtime = transmitter.runtime();
        let transmitter = transmitter.downgrade();
        self.timer.start(runtime, delay, move || {
            *cell.lock() = PolicyCapacity::UNCONSTRAINED;
            if let Some(transmitter) = transmitter.upgrade() {
                courier_log::debug!(policy, "resuming transmission");
                transmitter.apply_policies();
            }
        });
    }
}
