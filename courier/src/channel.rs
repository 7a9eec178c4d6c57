use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use courier_config::{ChannelConfig, ChannelConfigError, Config};
use courier_metrics::{AggregationPeriodSummary, MetricAggregateConsumer};
use courier_sampling::{
    AdaptiveSamplingProcessor, EvaluationCallback, SamplingConfig, SamplingConfigError,
    SamplingDecision, SamplingEvaluation, SamplingProcessor, Telemetry,
};
use courier_statsd::metric;
use courier_transmission::{
    ContentEncoding, NetworkProbe, Transmission, TransmissionPolicy, TransmissionStorage,
    Transmitter, TransmitterBuilder, TransmitterConfigError, Upstream,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::item::MetricTelemetry;
use crate::statsd::{ChannelCounters, ChannelDistributions};

/// An error creating a [`TelemetryChannel`] or tracking an item.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel section of the configuration is invalid.
    #[error("invalid channel configuration")]
    Channel(#[from] ChannelConfigError),
    /// The sampling section of the configuration is invalid.
    #[error("invalid sampling configuration")]
    Sampling(#[from] SamplingConfigError),
    /// The transmitter section of the configuration is invalid.
    #[error("invalid transmitter configuration")]
    Transmitter(#[from] TransmitterConfigError),
    /// A kept item could not be serialized.
    #[error("failed to serialize telemetry item")]
    Serialize(#[from] serde_json::Error),
}

enum Sampler {
    Fixed(SamplingProcessor),
    Adaptive(Arc<AdaptiveSamplingProcessor>),
}

impl Sampler {
    fn process<T>(&self, item: &mut T) -> SamplingDecision
    where
        T: Telemetry + ?Sized,
    {
        match self {
            Self::Fixed(processor) => processor.process(item),
            Self::Adaptive(processor) => processor.process(item),
        }
    }

    fn sampling_percentage(&self) -> f64 {
        match self {
            Self::Fixed(processor) => processor.sampling_percentage(),
            Self::Adaptive(processor) => processor.sampling_percentage(),
        }
    }
}

/// What caused a batch to be sent.
#[derive(Clone, Copy, Debug)]
enum Trigger {
    Full,
    Interval,
    Flush,
}

impl Trigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Interval => "interval",
            Self::Flush => "flush",
        }
    }
}

struct ChannelInner {
    config: ChannelConfig,
    sampler: Sampler,
    transmitter: Transmitter,
    batch: Mutex<Vec<String>>,
    shutdown: CancellationToken,
}

impl ChannelInner {
    /// Takes the current batch and turns it into a transmission.
    fn take_transmission(&self, trigger: Trigger) -> Option<Transmission> {
        let lines = std::mem::take(&mut *self.batch.lock());
        if lines.is_empty() {
            return None;
        }

        metric!(
            distribution(ChannelDistributions::BatchItems) = lines.len() as u64,
            trigger = trigger.as_str()
        );

        let encoding = match self.config.compress {
            true => ContentEncoding::Gzip,
            false => ContentEncoding::Identity,
        };

        match Transmission::from_lines(&self.config.endpoint, &lines, encoding) {
            Ok(transmission) => Some(transmission.with_timeout(self.config.timeout())),
            Err(error) => {
                courier_log::error!(
                    error = &error as &dyn std::error::Error,
                    items = lines.len(),
                    "dropping batch that could not be encoded"
                );
                None
            }
        }
    }

    fn send_batch(&self, trigger: Trigger) {
        if let Some(transmission) = self.take_transmission(trigger) {
            self.transmitter.enqueue(transmission);
        }
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builds a [`TelemetryChannel`].
///
/// Obtain a builder from [`TelemetryChannel::builder`].
pub struct ChannelBuilder {
    channel: ChannelConfig,
    sampling: SamplingConfig,
    adaptive_sampling: bool,
    transmitter: TransmitterBuilder,
    callback: Option<EvaluationCallback>,
}

impl ChannelBuilder {
    /// Uses `storage` for transmissions that do not fit into the buffer.
    pub fn storage(mut self, storage: impl TransmissionStorage + 'static) -> Self {
        self.transmitter = self.transmitter.storage(storage);
        self
    }

    /// Pauses sending while `probe` reports the network as unavailable.
    pub fn network_probe(mut self, probe: impl NetworkProbe + 'static) -> Self {
        self.transmitter = self.transmitter.network_probe(probe);
        self
    }

    /// Installs an additional transmission policy.
    pub fn policy(mut self, policy: impl TransmissionPolicy + 'static) -> Self {
        self.transmitter = self.transmitter.policy(policy);
        self
    }

    /// Registers a callback invoked after every evaluation of adaptive sampling.
    ///
    /// Has no effect if adaptive sampling is disabled.
    pub fn evaluation_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SamplingEvaluation, &SamplingConfig) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Validates the configuration and starts the channel.
    ///
    /// This spawns the background tasks of the channel and must be called from within a tokio
    /// runtime.
    pub fn build(self) -> Result<TelemetryChannel, ChannelError> {
        self.channel.validate()?;
        let transmitter = self.transmitter.build()?;

        let shutdown = CancellationToken::new();

        let sampler = match self.adaptive_sampling {
            true => {
                let mut processor = AdaptiveSamplingProcessor::new(self.sampling)?;
                if let Some(callback) = self.callback {
                    processor = processor.with_callback(callback);
                }
                let processor = Arc::new(processor);
                processor.spawn_evaluation(shutdown.child_token());
                Sampler::Adaptive(processor)
            }
            false => Sampler::Fixed(SamplingProcessor::new(self.sampling)?),
        };

        courier_log::info!(
            endpoint = self.channel.endpoint.as_str(),
            adaptive_sampling = self.adaptive_sampling,
            sampling_percentage = sampler.sampling_percentage(),
            "telemetry channel started"
        );

        let inner = Arc::new(ChannelInner {
            config: self.channel,
            sampler,
            transmitter,
            batch: Mutex::new(Vec::new()),
            shutdown,
        });

        if let Some(interval) = inner.config.flush_interval() {
            spawn_flush(&inner, interval);
        }

        Ok(TelemetryChannel { inner })
    }
}

impl fmt::Debug for ChannelBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelBuilder")
            .field("channel", &self.channel)
            .field("sampling", &self.sampling)
            .field("adaptive_sampling", &self.adaptive_sampling)
            .finish_non_exhaustive()
    }
}

fn spawn_flush(inner: &Arc<ChannelInner>, interval: Duration) {
    let weak: Weak<ChannelInner> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.send_batch(Trigger::Interval);
                }
            }
        }
    });
}

/// The entry point of the telemetry pipeline.
///
/// Tracked items are sampled, serialized as JSON lines and collected into a batch. A batch is
/// handed to the [`Transmitter`] when it is full, when the flush interval elapses, or when
/// [`flush`](Self::flush) is called.
///
/// Cloning a channel is cheap and yields a handle to the same batch. Background tasks stop
/// once the last handle is dropped.
#[derive(Clone)]
pub struct TelemetryChannel {
    inner: Arc<ChannelInner>,
}

impl TelemetryChannel {
    /// Creates a builder from the pipeline configuration.
    pub fn builder(config: &Config, upstream: Arc<dyn Upstream>) -> ChannelBuilder {
        ChannelBuilder {
            channel: config.channel.clone(),
            sampling: config.sampling.clone(),
            adaptive_sampling: config.adaptive_sampling,
            transmitter: Transmitter::builder(config.transmitter.clone(), upstream),
            callback: None,
        }
    }

    /// Creates a channel with the default transmission policies.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config, upstream: Arc<dyn Upstream>) -> Result<Self, ChannelError> {
        Self::builder(config, upstream).build()
    }

    /// The transmitter delivering the batches of this channel.
    pub fn transmitter(&self) -> &Transmitter {
        &self.inner.transmitter
    }

    /// The sampling percentage currently applied to new items.
    pub fn sampling_percentage(&self) -> f64 {
        self.inner.sampler.sampling_percentage()
    }

    /// The number of items waiting in the current batch.
    pub fn pending_items(&self) -> usize {
        self.inner.batch.lock().len()
    }

    /// Samples `item` and adds it to the current batch if it is kept.
    ///
    /// Returns the sampling decision. Dropped items are discarded without being serialized.
    pub fn track<T>(&self, mut item: T) -> Result<SamplingDecision, ChannelError>
    where
        T: Telemetry + Serialize,
    {
        let item_type = item.telemetry_type();
        let decision = self.inner.sampler.process(&mut item);

        metric!(
            counter(ChannelCounters::ItemsTracked) += 1,
            item_type = item_type.as_str(),
            decision = if decision.is_keep() { "keep" } else { "drop" },
        );

        if !decision.is_keep() {
            return Ok(decision);
        }

        let line = serde_json::to_string(&item).inspect_err(|_| {
            metric!(counter(ChannelCounters::ItemsInvalid) += 1);
        })?;

        let full = {
            let mut batch = self.inner.batch.lock();
            batch.push(line);
            batch.len() >= self.inner.config.max_items_per_transmission
        };

        if full {
            self.inner.send_batch(Trigger::Full);
        }

        Ok(decision)
    }

    /// Sends the current batch and waits for its outcome.
    ///
    /// Returns `true` if the batch was accepted or there was nothing to send. Items of earlier
    /// batches are not waited for.
    pub async fn flush(&self) -> bool {
        match self.inner.take_transmission(Trigger::Flush) {
            Some(transmission) => self.inner.transmitter.flush(transmission).wait().await,
            None => true,
        }
    }

    /// Stops the background tasks, flushes the current batch, and closes the transmitter.
    ///
    /// Waits at most `timeout` for the final batch. Transmissions that are still pending
    /// afterwards stay in the transmitter's storage.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        self.inner.shutdown.cancel();

        let flushed = tokio::time::timeout(timeout, self.flush())
            .await
            .unwrap_or(false);

        self.inner.transmitter.application_stopping();
        courier_log::debug!(flushed, "telemetry channel stopped");

        flushed
    }
}

impl MetricAggregateConsumer for TelemetryChannel {
    fn consume(&self, summary: AggregationPeriodSummary) {
        let aggregates = summary
            .persistent_aggregations
            .into_iter()
            .chain(summary.nonpersistent_aggregations);

        for aggregate in aggregates {
            if let Err(error) = self.track(MetricTelemetry::new(aggregate)) {
                courier_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to track metric aggregate"
                );
            }
        }
    }
}

impl fmt::Debug for TelemetryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryChannel")
            .field("config", &self.inner.config)
            .field("sampling_percentage", &self.sampling_percentage())
            .field("pending_items", &self.pending_items())
            .field("transmitter", &self.inner.transmitter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use courier_sampling::TelemetryType;
    use courier_transmission::{TransmissionResponse, TransportError};

    use super::*;

    #[derive(Debug, Default)]
    struct Recording(Mutex<Vec<Transmission>>);

    #[async_trait::async_trait]
    impl Upstream for Recording {
        async fn send(
            &self,
            transmission: &Transmission,
        ) -> Result<TransmissionResponse, TransportError> {
            self.0.lock().push(transmission.clone());
            Ok(TransmissionResponse::new(200))
        }
    }

    #[derive(Serialize)]
    struct Event {
        name: &'static str,
    }

    impl Telemetry for Event {
        fn telemetry_type(&self) -> TelemetryType {
            TelemetryType::Event
        }

        fn operation_id(&self) -> Option<&str> {
            None
        }

        fn sampling_percentage(&self) -> Option<f64> {
            None
        }

        fn set_sampling_percentage(&mut self, _: f64) {}
    }

    fn config(yaml: &str) -> Config {
        Config::from_yaml_str(yaml).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_until_full() {
        courier_test::setup!();

        let upstream = Arc::new(Recording::default());
        let channel = TelemetryChannel::new(
            &config("channel:\n  max_items_per_transmission: 3\n  flush_interval: 0\n"),
            upstream.clone(),
        )
        .unwrap();

        channel.track(Event { name: "a" }).unwrap();
        channel.track(Event { name: "b" }).unwrap();
        assert_eq!(channel.pending_items(), 2);

        channel.track(Event { name: "c" }).unwrap();
        assert_eq!(channel.pending_items(), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let sent = upstream.0.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content_encoding(), ContentEncoding::Gzip);
        assert_eq!(sent[0].timeout(), Duration::from_secs(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_empty_batch() {
        courier_test::setup!();

        let upstream = Arc::new(Recording::default());
        let channel = TelemetryChannel::new(&Config::default(), upstream.clone()).unwrap();

        assert!(channel.flush().await);
        assert!(upstream.0.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config() {
        courier_test::setup!();

        let mut config = Config::default();
        config.channel.max_items_per_transmission = 0;

        let result = TelemetryChannel::new(&config, Arc::new(Recording::default()));
        assert!(matches!(
            result,
            Err(ChannelError::Channel(
                ChannelConfigError::ZeroItemsPerTransmission
            ))
        ));
    }
}
