use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use courier_statsd::metric;

use crate::statsd::{TransmissionCounters, TransmissionTimers};
use crate::transmission::{
    Transmission, TransmissionOutcome, TransmissionResponse, TransportError,
};

/// The ingestion endpoint that transmissions are sent to.
///
/// Implementations perform the actual request, for example over HTTP, and must return within
/// a reasonable time. The sender additionally enforces each transmission's timeout.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Sends a transmission and returns the backend's response.
    async fn send(
        &self,
        transmission: &Transmission,
    ) -> Result<TransmissionResponse, TransportError>;
}

/// The stage of a transmitter that performs sends.
///
/// Its capacity is the number of sends that may be in flight at the same time.
pub struct TransmissionSender {
    upstream: Arc<dyn Upstream>,
    capacity: AtomicUsize,
    in_flight: AtomicUsize,
}

impl TransmissionSender {
    /// Creates a sender that allows `capacity` concurrent sends.
    pub fn new(upstream: Arc<dyn Upstream>, capacity: usize) -> Self {
        Self {
            upstream,
            capacity: AtomicUsize::new(capacity),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// The number of sends allowed at the same time.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Changes the number of concurrent sends. Sends in flight are not interrupted.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    /// The number of sends in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Claims a slot for a send. Returns `false` if the sender is at capacity.
    pub(crate) fn try_reserve(&self) -> bool {
        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_flight| {
                (in_flight < self.capacity()).then_some(in_flight + 1)
            })
            .is_ok()
    }

    /// Returns a slot claimed with [`try_reserve`](Self::try_reserve).
    pub(crate) fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Sends a transmission through a slot claimed with [`try_reserve`](Self::try_reserve)
    /// and releases the slot.
    pub(crate) async fn send(&self, transmission: Transmission) -> TransmissionOutcome {
        let start = Instant::now();
        let timeout = transmission.timeout();

        let result = match tokio::time::timeout(timeout, self.upstream.send(&transmission)).await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        };

        self.release();

        let status = match result {
            Ok(ref response) => response.status.to_string(),
            Err(_) => "transport_error".to_owned(),
        };
        metric!(timer(TransmissionTimers::SendDuration) = start.elapsed());
        metric!(
            counter(TransmissionCounters::Sent) += 1,
            status = status.as_str()
        );

        TransmissionOutcome {
            transmission,
            result,
        }
    }
}

impl fmt::Debug for TransmissionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionSender")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}
