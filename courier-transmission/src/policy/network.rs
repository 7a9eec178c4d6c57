use std::error::Error;
use std::fmt;

use crate::policy::{PolicyCapacity, PolicyEvent, PolicyState, TransmissionPolicy};
use crate::transmitter::Transmitter;

/// Reports whether the host currently has network connectivity.
pub trait NetworkProbe: Send + Sync {
    /// Returns `true` if the network is available.
    fn is_available(&self) -> Result<bool, Box<dyn Error + Send + Sync>>;
}

impl<F> NetworkProbe for F
where
    F: Fn() -> Result<bool, Box<dyn Error + Send + Sync>> + Send + Sync,
{
    fn is_available(&self) -> Result<bool, Box<dyn Error + Send + Sync>> {
        self()
    }
}

/// Stops sending and buffering while the network is unavailable.
///
/// Availability is probed when the transmitter is built and on every
/// [`PolicyEvent::NetworkChanged`]. If the probe fails, the network is assumed to be available.
pub struct NetworkAvailabilityPolicy {
    state: PolicyState,
    probe: Box<dyn NetworkProbe>,
}

impl NetworkAvailabilityPolicy {
    /// Creates the policy with the given probe.
    pub fn new(probe: impl NetworkProbe + 'static) -> Self {
        Self {
            state: PolicyState::default(),
            probe: Box::new(probe),
        }
    }

    fn refresh(&self, transmitter: &Transmitter) {
        let available = match self.probe.is_available() {
            Ok(available) => available,
            Err(error) => {
                courier_log::warn!(
                    error = error.as_ref() as &dyn Error,
                    "failed to probe network availability, assuming it is available"
                );
                true
            }
        };

        let capacity = match available {
            true => PolicyCapacity::UNCONSTRAINED,
            false => PolicyCapacity::STORE_ONLY,
        };

        if capacity != self.state.capacity() {
            courier_log::info!(available, "network availability changed");
        }
        self.state.apply(capacity, transmitter);
    }
}

impl TransmissionPolicy for NetworkAvailabilityPolicy {
    fn name(&self) -> &'static str {
        "network"
    }

    fn capacity(&self) -> PolicyCapacity {
        self.state.capacity()
    }

    fn initialize(&self, transmitter: &Transmitter) {
        self.refresh(transmitter);
    }

    fn handle(&self, event: &PolicyEvent<'_>, transmitter: &Transmitter) {
        if let PolicyEvent::NetworkChanged = event {
            self.refresh(transmitter);
        }
    }
}

impl fmt::Debug for NetworkAvailabilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkAvailabilityPolicy")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::TransmitterConfig;
    use crate::transmitter::tests::{MockUpstream, settle, transmission};

    #[tokio::test(start_paused = true)]
    async fn test_follows_availability() {
        courier_test::setup!();

        let online = Arc::new(AtomicBool::new(false));
        let probe = {
            let online = Arc::clone(&online);
            move || -> Result<bool, Box<dyn Error + Send + Sync>> {
                Ok(online.load(Ordering::SeqCst))
            }
        };

        let upstream = MockUpstream::accepting();
        let transmitter = Transmitter::builder(TransmitterConfig::default(), upstream.clone())
            .network_probe(probe)
            .build()
            .unwrap();

        assert_eq!(transmitter.effective_capacity().sender, Some(0));
        transmitter.enqueue(transmission(["a"]));
        settle().await;
        assert_eq!(transmitter.storage().len(), 1);

        online.store(true, Ordering::SeqCst);
        transmitter.network_changed();
        settle().await;

        assert!(transmitter.effective_capacity().is_unconstrained());
        assert_eq!(upstream.sent().len(), 1);
        assert!(transmitter.storage().is_empty());
    }

    #[tokio::test]
    async fn test_probe_failure_fails_open() {
        courier_test::setup!();

        let probe =
            || -> Result<bool, Box<dyn Error + Send + Sync>> { Err("no interfaces".into()) };
        let upstream = MockUpstream::accepting();
        let transmitter = Transmitter::builder(TransmitterConfig::default(), upstream)
            .network_probe(probe)
            .build()
            .unwrap();

        assert!(transmitter.effective_capacity().is_unconstrained());
    }
}
