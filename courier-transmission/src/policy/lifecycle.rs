use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::transmitter::Transmitter;

/// Stops sending and buffering for good once the application is shutting down.
///
/// Transmissions enqueued afterwards can only go to the storage, which may persist them for
/// the next start of the application.
#[derive(Debug, Default)]
pub struct ApplicationLifecyclePolicy {
    state: PolicyState,
}

impl ApplicationLifecyclePolicy {
    /// Creates the policy without constraints.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransmissionPolicy for ApplicationLifecyclePolicy {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        if let PolicyEvent::ApplicationStopping = event {
            courier_log::debug!("application stopping, closing sender and buffer");
            self.state.apply(PolicyCapacity::STORE_ONLY, transmitter);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::transmitter::tests::{MockUpstream, settle, transmission, transmitter};

    #[tokio::test(start_paused = true)]
    async fn test_stopping_is_permanent() {
        courier_test::setup!();

        let upstream = MockUpstream::accepting();
        let transmitter = transmitter(&upstream);
        transmitter.application_stopping();

        transmitter.enqueue(transmission(["a"]));
        settle().await;

        assert_eq!(transmitter.effective_capacity().sender, Some(0));
        assert_eq!(transmitter.effective_capacity().buffer, Some(0));
        assert_eq!(transmitter.storage().len(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(upstream.sent().is_empty());
    }
}
