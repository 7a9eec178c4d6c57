use std::fmt;
use std::sync::{Arc, Weak};

use courier_statsd::metric;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::backoff::BackoffLogic;
use crate::buffer::TransmissionBuffer;
use crate::config::{TransmitterConfig, TransmitterConfigError};
use crate::policy::{
    ApplicationLifecyclePolicy, AuthenticationPolicy, ErrorHandlingPolicy,
    NetworkAvailabilityPolicy, NetworkProbe, PartialSuccessPolicy, PolicyCapacity, PolicyEvent,
    ThrottlingPolicy, TransmissionPolicy,
};
use crate::sender::{TransmissionSender, Upstream};
use crate::statsd::{TransmissionCounters, TransmissionGauges};
use crate::status::ResponseStatus;
use crate::storage::{MemoryStorage, TransmissionStorage};
use crate::transmission::{Transmission, TransmissionOutcome};

/// The capacities computed from all policies of a transmitter.
///
/// `None` means that no policy constrains the stage, and the configured maximum applies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EffectiveCapacity {
    /// Maximum number of concurrent sends.
    pub sender: Option<usize>,
    /// Maximum size of the in-memory buffer in bytes.
    pub buffer: Option<usize>,
    /// Maximum size of the storage in bytes.
    pub storage: Option<usize>,
}

impl EffectiveCapacity {
    /// Returns `true` if no policy constrains any stage.
    pub fn is_unconstrained(&self) -> bool {
        *self == Self::default()
    }

    fn restrict(self, capacity: PolicyCapacity) -> Self {
        Self {
            sender: min_capacity(self.sender, capacity.max_sender_capacity),
            buffer: min_capacity(self.buffer, capacity.max_buffer_capacity),
            storage: min_capacity(self.storage, capacity.max_storage_capacity),
        }
    }
}

fn min_capacity(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Resolves once the outcome of a flushed transmission is known.
#[derive(Debug)]
pub struct FlushHandle(oneshot::Receiver<bool>);

impl FlushHandle {
    /// Waits for the transmission and returns `true` if the backend accepted it.
    ///
    /// Transmissions that are retried keep the handle pending until a later attempt succeeds
    /// or fails for good. Returns `false` if the transmission was lost.
    pub async fn wait(self) -> bool {
        self.0.await.unwrap_or(false)
    }
}

/// Builds a [`Transmitter`] with its default policies.
pub struct TransmitterBuilder {
    config: TransmitterConfig,
    upstream: Arc<dyn Upstream>,
    storage: Option<Box<dyn TransmissionStorage>>,
    network_policy: Option<NetworkAvailabilityPolicy>,
    policies: Vec<Arc<dyn TransmissionPolicy>>,
}

impl TransmitterBuilder {
    /// Uses `storage` instead of an in-memory storage.
    pub fn storage(mut self, storage: impl TransmissionStorage + 'static) -> Self {
        self.storage = Some(Box::new(storage));
        self
    }

    /// Installs a [`NetworkAvailabilityPolicy`] with the given probe.
    pub fn network_probe(mut self, probe: impl NetworkProbe + 'static) -> Self {
        self.network_policy = Some(NetworkAvailabilityPolicy::new(probe));
        self
    }

    /// Installs an additional policy.
    pub fn policy(mut self, policy: impl TransmissionPolicy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Validates the configuration and builds the transmitter.
    ///
    /// Policies are initialized before this returns, so the initial capacities already reflect
    /// them. Sends and backoff timers run on the runtime this is called from, so the transmitter
    /// may afterwards be used from any thread.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Result<Transmitter, TransmitterConfigError> {
        let Self {
            config,
            upstream,
            storage,
            network_policy,
            policies: custom,
        } = self;

        config.validate()?;

        let mut policies: Vec<Arc<dyn TransmissionPolicy>> = Vec::new();
        if let Some(policy) = network_policy {
            policies.push(Arc::new(policy));
        }
        policies.push(Arc::new(ThrottlingPolicy::new()));
        policies.push(Arc::new(ErrorHandlingPolicy::new(
            config.authentication_policy,
        )));
        policies.push(Arc::new(PartialSuccessPolicy::new()));
        if config.authentication_policy {
            policies.push(Arc::new(AuthenticationPolicy::new()));
        }
        policies.push(Arc::new(ApplicationLifecyclePolicy::new()));
        policies.extend(custom);

        let storage =
            storage.unwrap_or_else(|| Box::new(MemoryStorage::new(config.max_storage_capacity)));

        let transmitter = Transmitter {
            inner: Arc::new(TransmitterInner {
                sender: TransmissionSender::new(upstream, config.max_sender_capacity),
                buffer: TransmissionBuffer::new(config.max_buffer_capacity),
                backoff: BackoffLogic::new(config.backoff.clone()),
                effective: Mutex::new(EffectiveCapacity::default()),
                flushes: Mutex::default(),
                retried: Mutex::default(),
                runtime: Handle::current(),
                storage,
                policies,
                config,
            }),
        };

        for policy in &transmitter.inner.policies {
            policy.initialize(&transmitter);
        }
        transmitter.apply_policies();

        Ok(transmitter)
    }
}

impl fmt::Debug for TransmitterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitterBuilder")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}

struct TransmitterInner {
    config: TransmitterConfig,
    sender: TransmissionSender,
    buffer: TransmissionBuffer,
    storage: Box<dyn TransmissionStorage>,
    policies: Vec<Arc<dyn TransmissionPolicy>>,
    backoff: BackoffLogic,
    effective: Mutex<EffectiveCapacity>,
    flushes: Mutex<HashMap<u64, oneshot::Sender<bool>>>,
    retried: Mutex<HashSet<u64>>,
    runtime: Handle,
}

/// Moves transmissions through the sender, buffer and storage stages.
///
/// A transmission enqueued on the transmitter is handed to the sender if it has a free slot,
/// otherwise to the buffer, and otherwise to the storage. If all stages refuse it, the
/// transmission is lost. Whenever a send completes or capacities change, waiting transmissions
/// move from the buffer and the storage to the sender.
///
/// The capacity of each stage is the configured maximum, lowered by the
/// [`TransmissionPolicy`]s of the transmitter. Every policy is informed about each completed
/// send and may pause stages, enqueue transmissions again, or drop them.
///
/// Cloning a transmitter is cheap and yields a handle to the same instance. Sends run as tasks
/// on the runtime the transmitter was built on, so it can be driven from threads outside of
/// that runtime.
#[derive(Clone)]
pub struct Transmitter {
    inner: Arc<TransmitterInner>,
}

impl Transmitter {
    /// Starts building a transmitter that sends to `upstream`.
    pub fn builder(config: TransmitterConfig, upstream: Arc<dyn Upstream>) -> TransmitterBuilder {
        TransmitterBuilder {
            config,
            upstream,
            storage: None,
            network_policy: None,
            policies: Vec::new(),
        }
    }

    /// The configuration of this transmitter.
    pub fn config(&self) -> &TransmitterConfig {
        &self.inner.config
    }

    /// The backoff logic shared by all policies.
    pub fn backoff(&self) -> &BackoffLogic {
        &self.inner.backoff
    }

    /// The capacities computed by the last [`apply_policies`](Self::apply_policies).
    pub fn effective_capacity(&self) -> EffectiveCapacity {
        *self.inner.effective.lock()
    }

    /// The sending stage.
    pub fn sender(&self) -> &TransmissionSender {
        &self.inner.sender
    }

    /// The in-memory buffer stage.
    pub fn buffer(&self) -> &TransmissionBuffer {
        &self.inner.buffer
    }

    /// The storage stage.
    pub fn storage(&self) -> &dyn TransmissionStorage {
        self.inner.storage.as_ref()
    }

    /// The runtime that runs sends and backoff timers.
    pub fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Creates a handle that does not keep the transmitter alive.
    pub fn downgrade(&self) -> WeakTransmitter {
        WeakTransmitter(Arc::downgrade(&self.inner))
    }

    /// Hands a transmission to the first stage that accepts it.
    ///
    /// This never fails. Transmissions refused by all stages are logged and dropped.
    pub fn enqueue(&self, transmission: Transmission) {
        let Err(transmission) = self.try_send(transmission) else {
            return;
        };

        let Err(transmission) = self.inner.buffer.try_push(transmission) else {
            metric!(
                gauge(TransmissionGauges::BufferedTransmissions) = self.inner.buffer.len() as u64
            );
            return;
        };

        let Err(transmission) = self.inner.storage.enqueue(transmission) else {
            return;
        };

        courier_log::warn!(
            transmission = transmission.id(),
            size = transmission.size(),
            "dropping transmission, all stages are at capacity"
        );
        metric!(
            counter(TransmissionCounters::Dropped) += 1,
            reason = "capacity"
        );
        self.resolve_flush(transmission.id(), false);
    }

    /// Enqueues a transmission and returns a handle that resolves with its outcome.
    pub fn flush(&self, transmission: Transmission) -> FlushHandle {
        let (tx, rx) = oneshot::channel();
        self.inner.flushes.lock().insert(transmission.id(), tx);
        self.enqueue(transmission);
        FlushHandle(rx)
    }

    /// Enqueues a transmission again on behalf of a policy.
    ///
    /// A pending flush of the transmission stays pending until the retried transmission
    /// completes.
    pub fn retry(&self, transmission: Transmission, policy: &'static str) {
        courier_log::trace!(transmission = transmission.id(), policy, "retrying transmission");
        metric!(
            counter(TransmissionCounters::Retried) += 1,
            policy = policy
        );

        self.inner.retried.lock().insert(transmission.id());
        self.enqueue(transmission);
    }

    /// Recomputes the effective capacities from all policies and pushes them to the stages.
    ///
    /// Safe to call concurrently. Waiting transmissions are sent if capacity became available.
    pub fn apply_policies(&self) {
        {
            let mut effective = self.inner.effective.lock();

            let capacity = self
                .inner
                .policies
                .iter()
                .fold(EffectiveCapacity::default(), |capacity, policy| {
                    capacity.restrict(policy.capacity())
                });

            let config = &self.inner.config;
            let sender = bounded(capacity.sender, config.max_sender_capacity);
            let buffer = bounded(capacity.buffer, config.max_buffer_capacity);
            let storage = bounded(capacity.storage, config.max_storage_capacity);

            self.inner.sender.set_capacity(sender);
            self.inner.buffer.set_capacity(buffer);
            self.inner.storage.set_capacity(storage);

            if *effective != capacity {
                courier_log::debug!(sender, buffer, storage, "applied transmission policies");
                metric!(gauge(TransmissionGauges::SenderCapacity) = sender as u64);
                metric!(gauge(TransmissionGauges::BufferCapacity) = buffer as u64);
                metric!(gauge(TransmissionGauges::StorageCapacity) = storage as u64);
            }

            *effective = capacity;
        }

        self.pump();
    }

    /// Informs the policies that the network configuration of the host changed.
    pub fn network_changed(&self) {
        self.dispatch(&PolicyEvent::NetworkChanged);
    }

    /// Informs the policies that the application is shutting down.
    pub fn application_stopping(&self) {
        self.dispatch(&PolicyEvent::ApplicationStopping);
    }

    fn dispatch(&self, event: &PolicyEvent<'_>) {
        for policy in &self.inner.policies {
            policy.handle(event, self);
        }
    }

    fn try_send(&self, transmission: Transmission) -> Result<(), Transmission> {
        if !self.inner.sender.try_reserve() {
            return Err(transmission);
        }

        self.spawn_send(transmission);
        Ok(())
    }

    fn spawn_send(&self, transmission: Transmission) {
        let transmitter = self.clone();
        self.inner.runtime.spawn(async move {
            let outcome = transmitter.inner.sender.send(transmission).await;
            transmitter.handle_outcome(outcome);
        });
    }

    /// Moves waiting transmissions to the sender while it has free slots.
    fn pump(&self) {
        while self.inner.sender.try_reserve() {
            let next = (self.inner.buffer.pop()).or_else(|| self.inner.storage.dequeue());

            match next {
                Some(transmission) => self.spawn_send(transmission),
                None => {
                    self.inner.sender.release();
                    break;
                }
            }
        }
    }

    fn handle_outcome(&self, outcome: TransmissionOutcome) {
        let id = outcome.transmission.id();
        let status = outcome.status();
        self.inner.backoff.record(status);

        match outcome.result {
            Ok(ref response) => courier_log::trace!(
                transmission = id,
                status = %response.status,
                "transmission sent"
            ),
            Err(ref error) => courier_log::debug!(
                error = error as &dyn std::error::Error,
                transmission = id,
                "transmission failed"
            ),
        }

        self.dispatch(&PolicyEvent::TransmissionSent(&outcome));

        if !self.inner.retried.lock().remove(&id) {
            let accepted = status.is_some_and(|status| {
                status.is_success() || status == ResponseStatus::PARTIAL_SUCCESS
            });
            self.resolve_flush(id, accepted);
        }

        self.pump();
    }

    fn resolve_flush(&self, id: u64, accepted: bool) {
        if let Some(tx) = self.inner.flushes.lock().remove(&id) {
            tx.send(accepted).ok();
        }
    }
}

fn bounded(capacity: Option<usize>, max: usize) -> usize {
    capacity.map_or(max, |capacity| capacity.min(max))
}

impl fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("config", &self.inner.config)
            .field("effective", &self.effective_capacity())
            .field("sender", &self.inner.sender)
            .field("buffer", &self.inner.buffer)
            .field("storage", &self.inner.storage)
            .field("policies", &self.inner.policies)
            .finish()
    }
}

/// A handle to a [`Transmitter`] that does not keep it alive.
#[derive(Clone, Debug)]
pub struct WeakTransmitter(Weak<TransmitterInner>);

impl WeakTransmitter {
    /// Returns the transmitter if it still exists.
    pub fn upgrade(&self) -> Option<Transmitter> {
        self.0.upgrade().map(|inner| Transmitter { inner })
    }
}

impl fmt::Debug for TransmitterInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitterInner").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::transmission::{ContentEncoding, TransmissionResponse, TransportError};

    #[derive(Debug)]
    pub enum Reply {
        Respond(TransmissionResponse),
        Disconnect,
    }

    /// Records sent transmissions and answers with scripted replies, then with `200`.
    #[derive(Debug, Default)]
    pub struct MockUpstream {
        replies: Mutex<VecDeque<Reply>>,
        sent: Mutex<Vec<Transmission>>,
        delay: Duration,
    }

    impl MockUpstream {
        pub fn accepting() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn new(responses: impl IntoIterator<Item = TransmissionResponse>) -> Arc<Self> {
            Self::with_replies(responses.into_iter().map(Reply::Respond))
        }

        pub fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Default::default()
            })
        }

        pub fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Default::default()
            })
        }

        pub fn sent(&self) -> Vec<Transmission> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn send(
            &self,
            transmission: &Transmission,
        ) -> Result<TransmissionResponse, TransportError> {
            self.sent.lock().push(transmission.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let reply = self.replies.lock().pop_front();
            match reply {
                Some(Reply::Respond(response)) => Ok(response),
                Some(Reply::Disconnect) => {
                    Err(TransportError::Connection("connection reset".into()))
                }
                None => Ok(TransmissionResponse::new(200)),
            }
        }
    }

    pub fn transmitter(upstream: &Arc<MockUpstream>) -> Transmitter {
        Transmitter::builder(TransmitterConfig::default(), upstream.clone())
            .build()
            .unwrap()
    }

    pub fn transmission<const N: usize>(lines: [&str; N]) -> Transmission {
        Transmission::from_lines("https://example.com/v2/track", lines, ContentEncoding::Identity)
            .unwrap()
    }

    pub fn decoded(transmission: &Transmission) -> String {
        String::from_utf8(transmission.decoded_content().unwrap().into_owned()).unwrap()
    }

    /// Lets spawned sends complete without advancing to pending backoff timers.
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[derive(Debug)]
    struct FixedPolicy(PolicyCapacity);

    impl TransmissionPolicy for FixedPolicy {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn capacity(&self) -> PolicyCapacity {
            self.0
        }

        fn handle(&self, _: &PolicyEvent<'_>, _: &Transmitter) {}
    }

    #[test]
    fn test_min_capacity() {
        assert_eq!(min_capacity(None, None), None);
        assert_eq!(min_capacity(Some(3), None), Some(3));
        assert_eq!(min_capacity(None, Some(0)), Some(0));
        assert_eq!(min_capacity(Some(3), Some(1)), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sender_capacity() {
        courier_test::setup!();

        let upstream = MockUpstream::with_delay(Duration::from_secs(1));
        let transmitter = transmitter(&upstream);

        for _ in 0..5 {
            transmitter.enqueue(transmission(["a"]));
        }
        settle().await;

        assert_eq!(upstream.sent().len(), 3);
        assert_eq!(transmitter.sender().in_flight(), 3);
        assert_eq!(transmitter.buffer().len(), 2);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(upstream.sent().len(), 5);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transmitter.sender().in_flight(), 0);
        assert!(transmitter.buffer().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_policies_combine_to_minimum() {
        courier_test::setup!();

        let upstream = MockUpstream::accepting();
        let transmitter = Transmitter::builder(TransmitterConfig::default(), upstream.clone())
            .policy(FixedPolicy(PolicyCapacity {
                max_sender_capacity: Some(1),
                max_buffer_capacity: Some(4096),
                max_storage_capacity: None,
            }))
            .policy(FixedPolicy(PolicyCapacity {
                max_sender_capacity: Some(2),
                max_buffer_capacity: None,
                max_storage_capacity: Some(0),
            }))
            .build()
            .unwrap();

        similar_asserts::assert_eq!(
            transmitter.effective_capacity(),
            EffectiveCapacity {
                sender: Some(1),
                buffer: Some(4096),
                storage: Some(0),
            }
        );
        assert_eq!(transmitter.sender().capacity(), 1);
        assert_eq!(transmitter.buffer().capacity(), 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_stages_drop() {
        courier_test::setup!();

        let upstream = MockUpstream::accepting();
        let transmitter = Transmitter::builder(TransmitterConfig::default(), upstream.clone())
            .policy(FixedPolicy(PolicyCapacity::CLOSED))
            .build()
            .unwrap();

        let handle = transmitter.flush(transmission(["a"]));
        assert!(!handle.wait().await);
        assert!(upstream.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_resolves_on_success() {
        courier_test::setup!();

        let upstream = MockUpstream::accepting();
        let transmitter = transmitter(&upstream);

        assert!(transmitter.flush(transmission(["a"])).wait().await);
        assert_eq!(upstream.sent().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_enqueue_from_foreign_thread() {
        courier_test::setup!();

        let upstream = MockUpstream::accepting();
        let transmitter = transmitter(&upstream);

        let handle = transmitter.clone();
        let flush = std::thread::spawn(move || handle.flush(transmission(["a"])))
            .join()
            .unwrap();

        assert!(flush.wait().await);

        assert_eq!(upstream.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_weak_handle() {
        let upstream = MockUpstream::accepting();
        let transmitter = transmitter(&upstream);
        let weak = transmitter.downgrade();

        assert!(weak.upgrade().is_some());
        drop(transmitter);
        assert!(weak.upgrade().is_none());
    }
}
