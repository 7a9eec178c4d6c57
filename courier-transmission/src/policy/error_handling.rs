use courier_statsd::metric;

use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::statsd::TransmissionCounters;
use crate::status::ResponseStatus;
use crate::transmitter::Transmitter;

/// Retries transmissions after transient backend failures and drops rejected ones.
///
/// Transient failures (`408`, `500`, `502`, `503`, `504` and unknown network errors) stop
/// sending and buffering until the backoff delay has passed, and the transmission is stored for
/// a later attempt. Any other error response, and any send that failed without a response, is
/// final and the transmission is lost.
#[derive(Debug, Default)]
pub struct ErrorHandlingPolicy {
    state: PolicyState,
    authentication_policy: bool,
}

impl ErrorHandlingPolicy {
    /// Creates the policy.
    ///
    /// With `authentication_policy`, credential errors are left to the
    /// [`AuthenticationPolicy`](crate::AuthenticationPolicy) instead of being treated as final.
    pub fn new(authentication_policy: bool) -> Self {
        Self {
            state: PolicyState::default(),
            authentication_policy,
        }
    }

    fn is_handled_elsewhere(&self, status: ResponseStatus) -> bool {
        status.is_success()
            || status == ResponseStatus::PARTIAL_SUCCESS
            || status.is_throttled()
            || (self.authentication_policy && status.is_authentication_error())
    }
}

impl TransmissionPolicy for ErrorHandlingPolicy {
    fn name(&self) -> &'static str {
        "error_handling"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        let PolicyEvent::TransmissionSent(outcome) = event else {
            return;
        };

        let transmission = &outcome.transmission;
        match outcome.result {
            Ok(ref response) if response.status.is_transient_error() => {
                let delay = transmitter
                    .backoff()
                    .backoff_delay(response.retry_after.as_deref());
                courier_log::warn!(
                    status = %response.status,
                    ?delay,
                    "transient backend error, retrying transmission later"
                );

                self.state
                    .pause(self.name(), PolicyCapacity::STORE_ONLY, delay, transmitter);
                transmitter.retry(transmission.clone(), self.name());
            }
            Ok(ref response) if self.is_handled_elsewhere(response.status) => (),
            Ok(ref response) => {
                courier_log::error!(
                    status = %response.status,
                    transmission = transmission.id(),
                    response = response.content.as_deref(),
                    "transmission rejected by the backend, dropping it"
                );
                metric!(
                    counter(TransmissionCounters::Dropped) += 1,
                    reason = "rejected"
                );
            }
            Err(ref error) => {
                courier_log::error!(
                    error = error as &dyn std::error::Error,
                    transmission = transmission.id(),
                    "failed to send transmission, dropping it"
                );
                metric!(
                    counter(TransmissionCounters::Dropped) += 1,
                    reason = "transport_error"
                );
            }
        }
    }
}
