use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{
    BufferedUdpMetricSink, Metric, MetricBuilder, MetricSink, QueuingMetricSink, SpyMetricSink,
    StatsdClient,
};
use parking_lot::RwLock;
use rand::Rng;

use crate::MetricError;

/// Metrics queued beyond this are dropped instead of blocking the pipeline.
const QUEUE_CAPACITY: usize = 100_000;

/// The share of metrics sent to statsd, between `0.0` and `1.0`.
///
/// Values outside of that range are clamped. `NaN` disables sending.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleRate(f64);

impl SampleRate {
    /// Rolls whether a single metric is sent.
    fn admits(self) -> bool {
        match self.0 {
            r if r >= 1.0 => true,
            r if r <= 0.0 => false,
            r => rand::rng().random_bool(r),
        }
    }
}

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }
}

impl From<SampleRate> for f64 {
    fn from(rate: SampleRate) -> Self {
        rate.0
    }
}

/// Settings passed to [`init`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prepended to every metric name, separated by a dot.
    pub prefix: &'a str,
    /// Address of the statsd server.
    pub host: A,
    /// Tags appended to every metric after the tags given at the call site.
    pub default_tags: BTreeMap<String, String>,
    /// The share of metrics that is sent.
    pub default_sample_rate: SampleRate,
}

/// The statsd client that [`metric!`](crate::metric) reports to.
#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    default_tags: BTreeMap<String, String>,
    sample_rate: SampleRate,
}

impl MetricsClient {
    fn new<S>(
        prefix: &str,
        sink: S,
        default_tags: BTreeMap<String, String>,
        rate: SampleRate,
    ) -> Self
    where
        S: MetricSink + Sync + Send + std::panic::RefUnwindSafe + 'static,
    {
        Self {
            statsd: StatsdClient::from_sink(prefix, sink),
            default_tags,
            sample_rate: rate,
        }
    }

    /// Sends a metric after applying default tags and the sample rate.
    ///
    /// Failures are logged and otherwise ignored.
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        if !self.sample_rate.admits() {
            return;
        }

        for (key, value) in &self.default_tags {
            metric = metric.with_tag(key, value);
        }

        let rate = f64::from(self.sample_rate);
        if rate < 1.0 {
            metric = metric.with_sampling_rate(rate);
        }

        if let Err(error) = metric.try_send() {
            courier_log::error!(
                error = &error as &dyn std::error::Error,
                queue_capacity = QUEUE_CAPACITY,
                "failed to send internal metric",
            );
        }
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &Self::Target {
        &self.statsd
    }
}

static GLOBAL_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    /// Takes precedence over the global client on this thread.
    static THREAD_CLIENT: RefCell<Option<Arc<MetricsClient>>> = const { RefCell::new(None) };
}

fn install(client: Option<MetricsClient>) {
    *GLOBAL_CLIENT.write() = client.map(Arc::new);
}

/// Starts reporting to the statsd server at `config.host`.
///
/// Metrics are queued and sent over UDP from a background thread, so emitting one never blocks.
/// Calling this again replaces the previous client.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<'_, A>) -> Result<(), MetricError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_nonblocking(true)?;

    let sink = BufferedUdpMetricSink::from(config.host, socket)?;
    let sink = QueuingMetricSink::with_capacity(sink, QUEUE_CAPACITY);

    courier_log::debug!(
        prefix = config.prefix,
        sample_rate = f64::from(config.default_sample_rate),
        "reporting internal metrics to statsd",
    );

    install(Some(MetricsClient::new(
        config.prefix,
        sink,
        config.default_tags,
        config.default_sample_rate,
    )));

    Ok(())
}

/// Stops reporting. Subsequent metrics are discarded.
pub fn disable() {
    install(None);
}

/// Calls `f` with the active client, or returns `R::default()` if metrics are disabled.
///
/// Prefer the [`metric!`](crate::metric) macro.
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    let client = THREAD_CLIENT
        .with(|cell| cell.borrow().clone())
        .or_else(|| GLOBAL_CLIENT.read().clone());

    match client {
        Some(client) => f(&client),
        None => R::default(),
    }
}

fn capture(
    default_tags: BTreeMap<String, String>,
    rate: SampleRate,
    f: impl FnOnce(),
) -> Vec<String> {
    let (rx, sink) = SpyMetricSink::new();
    let client = Arc::new(MetricsClient::new("", sink, default_tags, rate));

    let previous = THREAD_CLIENT.with(|cell| cell.replace(Some(client)));
    f();
    THREAD_CLIENT.with(|cell| cell.replace(previous));

    rx.try_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

/// Runs `f` with a client that records metrics emitted on the current thread.
///
/// Returns the recorded metrics in statsd line format.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    capture(BTreeMap::new(), 1.0.into(), f)
}
