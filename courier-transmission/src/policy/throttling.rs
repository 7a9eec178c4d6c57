use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::status::ResponseStatus;
use crate::transmitter::Transmitter;

/// Pauses sending while the backend throttles.
///
/// On `429`, sending stops and buffered transmissions are kept for later. On `439`, the backend
/// asks to shed load for an extended time, so buffer and storage are closed as well and pending
/// transmissions are lost. In both cases the throttled transmission is enqueued again and all
/// constraints are lifted after the `Retry-After` delay, or the regular backoff delay.
#[derive(Debug, Default)]
pub struct ThrottlingPolicy {
    state: PolicyState,
}

impl ThrottlingPolicy {
    /// Creates the policy without constraints.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransmissionPolicy for ThrottlingPolicy {
    fn name(&self) -> &'static str {
        "throttling"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        let PolicyEvent::TransmissionSent(outcome) = event else {
            return;
        };

        let Some(status) = outcome.status().filter(|status| status.is_throttled()) else {
            return;
        };

        let capacity = match status {
            ResponseStatus::TOO_MANY_REQUESTS_EXTENDED => PolicyCapacity::CLOSED,
            _ => PolicyCapacity::PAUSED,
        };

        let delay = transmitter
            .backoff()
            .backoff_delay(outcome.retry_after());
        courier_log::warn!(%status, ?delay, "transmission throttled by the backend");

        self.state.pause(self.name(), capacity, delay, transmitter);
        transmitter.retry(outcome.transmission.clone(), self.name());
    }
}
