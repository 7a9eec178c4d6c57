use std::time::Duration;

use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::transmitter::Transmitter;

/// How long sending pauses after a credential error.
pub const AUTHENTICATION_PAUSE: Duration = Duration::from_secs(60);

/// Pauses sending on credential errors instead of dropping data.
///
/// Responses `400`, `401` and `403` usually mean that an access token is missing or expired.
/// Sending stops for [`AUTHENTICATION_PAUSE`] while transmissions keep accumulating in the
/// buffer and storage, and the rejected transmission is enqueued again.
///
/// This policy is only installed if enabled in the
/// [`TransmitterConfig`](crate::TransmitterConfig).
#[derive(Debug, Default)]
pub struct AuthenticationPolicy {
    state: PolicyState,
}

impl AuthenticationPolicy {
    /// Creates the policy without constraints.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransmissionPolicy for AuthenticationPolicy {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        let PolicyEvent::TransmissionSent(outcome) = event else {
            return;
        };

        let Some(status) = outcome
            .status()
            .filter(|status| status.is_authentication_error())
        else {
            return;
        };

        courier_log::warn!(
            %status,
            "transmission rejected due to invalid credentials, pausing"
        );

        self.state.pause(
            self.name(),
            PolicyCapacity::PAUSED,
            AUTHENTICATION_PAUSE,
            transmitter,
        );
        transmitter.retry(outcome.transmission.clone(), self.name());
    }
}
