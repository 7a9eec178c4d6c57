use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use courier::TelemetryChannel;
use courier::config::Config;
use courier::metrics::{
    AggregationConfig, AggregationCycleService, AggregationManager, MetricSeries, SeriesConfig,
    SeriesIdentity,
};
use courier::sampling::{SamplingDecision, Telemetry, TelemetryType};
use courier::transmission::{
    ContentEncoding, Transmission, TransmissionResponse, TransportError, Upstream,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Request {
    name: String,
    operation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_percentage: Option<f64>,
}

impl Request {
    fn new(operation_id: impl Into<String>) -> Self {
        Self {
            name: "GET /".to_owned(),
            operation_id: operation_id.into(),
            sampling_percentage: None,
        }
    }
}

impl Telemetry for Request {
    fn telemetry_type(&self) -> TelemetryType {
        TelemetryType::Request
    }

    fn operation_id(&self) -> Option<&str> {
        Some(&self.operation_id)
    }

    fn sampling_percentage(&self) -> Option<f64> {
        self.sampling_percentage
    }

    fn set_sampling_percentage(&mut self, percentage: f64) {
        self.sampling_percentage = Some(percentage);
    }
}

/// Answers with scripted statuses and accepts everything afterwards.
#[derive(Debug, Default)]
struct Backend {
    statuses: Mutex<Vec<u16>>,
    sent: Mutex<Vec<Transmission>>,
    calls: AtomicUsize,
}

impl Backend {
    fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_statuses(statuses: impl IntoIterator<Item = u16>) -> Arc<Self> {
        let mut statuses: Vec<u16> = statuses.into_iter().collect();
        statuses.reverse();
        Arc::new(Self {
            statuses: Mutex::new(statuses),
            ..Default::default()
        })
    }

    fn sent(&self) -> Vec<Transmission> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Upstream for Backend {
    async fn send(
        &self,
        transmission: &Transmission,
    ) -> Result<TransmissionResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let status = self.statuses.lock().pop().unwrap_or(200);
        if status == 200 {
            self.sent.lock().push(transmission.clone());
        }
        Ok(TransmissionResponse::new(status))
    }
}

fn lines(transmission: &Transmission) -> Vec<serde_json::Value> {
    let content = transmission.decoded_content().unwrap();
    std::str::from_utf8(&content)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_batches_by_size_and_flush() {
    courier_test::setup!();

    let config = Config::from_yaml_str(
        "channel:\n  max_items_per_transmission: 2\n  compress: false\n  flush_interval: 0\n",
    )
    .unwrap();
    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&config, backend.clone()).unwrap();

    for index in 0..5 {
        let decision = channel.track(Request::new(format!("op-{index}"))).unwrap();
        assert_eq!(decision, SamplingDecision::Keep);
    }
    settle().await;

    assert_eq!(backend.sent().len(), 2);
    assert_eq!(channel.pending_items(), 1);

    assert!(channel.flush().await);
    let sent = backend.sent();
    assert_eq!(sent.len(), 3);

    let total: usize = sent.iter().map(|t| lines(t).len()).sum();
    assert_eq!(total, 5);

    let last = lines(&sent[2]);
    assert_eq!(last[0]["operationId"], "op-4");
    assert_eq!(sent[2].content_encoding(), ContentEncoding::Identity);
}

#[tokio::test(start_paused = true)]
async fn test_compressed_batches() {
    courier_test::setup!();

    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&Config::default(), backend.clone()).unwrap();

    channel.track(Request::new("abc")).unwrap();
    assert!(channel.flush().await);

    let sent = backend.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content_encoding(), ContentEncoding::Gzip);
    assert_eq!(lines(&sent[0])[0]["name"], "GET /");
}

#[tokio::test(start_paused = true)]
async fn test_fixed_sampling_stamps_items() {
    courier_test::setup!();

    let config = Config::from_yaml_str(
        "channel:\n  max_items_per_transmission: 1000\n  flush_interval: 0\n\
         sampling:\n  initial_sampling_percentage: 50\n",
    )
    .unwrap();
    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&config, backend.clone()).unwrap();
    assert_eq!(channel.sampling_percentage(), 50.0);

    let mut kept = 0;
    for index in 0..200 {
        let decision = channel.track(Request::new(format!("operation-{index}"))).unwrap();
        if decision == SamplingDecision::Keep {
            kept += 1;
        }
    }

    assert!(kept > 0 && kept < 200, "kept {kept} of 200 items");
    assert_eq!(channel.pending_items(), kept);

    assert!(channel.flush().await);
    let items = lines(&backend.sent()[0]);
    assert_eq!(items.len(), kept);
    assert!(items.iter().all(|item| item["samplingPercentage"] == 50.0));
}

#[tokio::test(start_paused = true)]
async fn test_periodic_flush() {
    courier_test::setup!();

    let config = Config::from_yaml_str("channel:\n  flush_interval: 30\n").unwrap();
    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&config, backend.clone()).unwrap();

    channel.track(Request::new("abc")).unwrap();

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert!(backend.sent().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(backend.sent().len(), 1);
    assert_eq!(channel.pending_items(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_flush_survives_transient_error() {
    courier_test::setup!();

    let backend = Backend::with_statuses([503]);
    let channel = TelemetryChannel::new(&Config::default(), backend.clone()).unwrap();

    channel.track(Request::new("abc")).unwrap();
    assert!(channel.flush().await);

    assert_eq!(backend.calls.load(Ordering::Relaxed), 2);
    assert_eq!(backend.sent().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_flush_reports_rejection() {
    courier_test::setup!();

    let backend = Backend::with_statuses([400]);
    let channel = TelemetryChannel::new(&Config::default(), backend.clone()).unwrap();

    channel.track(Request::new("abc")).unwrap();
    assert!(!channel.flush().await);
    assert!(backend.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reports_metric_aggregates() {
    courier_test::setup!();

    let config = Config::from_yaml_str("channel:\n  flush_interval: 0\n").unwrap();
    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&config, backend.clone()).unwrap();

    let manager = Arc::new(AggregationManager::new(Utc::now()));
    let shutdown = CancellationToken::new();
    let service = AggregationCycleService::new(
        AggregationConfig { period: 60 },
        Arc::clone(&manager),
        Arc::new(channel.clone()),
    );
    let handle = service.spawn_handler(shutdown.clone());

    let series = MetricSeries::new(
        Arc::clone(&manager),
        SeriesIdentity::new("app", "latency", [] as [(&str, &str); 0]),
        SeriesConfig::default(),
    );
    series.track_value(10.0).unwrap();
    series.track_value(30.0).unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(channel.pending_items(), 1);

    assert!(channel.flush().await);
    let items = lines(&backend.sent()[0]);
    assert_eq!(items[0]["type"], "Metric");
    assert_eq!(items[0]["metricId"], "latency");
    assert_eq!(items[0]["data"]["Sum"], 40.0);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_transmitter() {
    courier_test::setup!();

    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&Config::default(), backend.clone()).unwrap();
    let transmitter = channel.transmitter().clone();

    channel.track(Request::new("abc")).unwrap();
    assert!(channel.shutdown(Duration::from_secs(5)).await);
    assert_eq!(backend.sent().len(), 1);

    let capacity = transmitter.effective_capacity();
    assert_eq!(capacity.sender, Some(0));
    assert_eq!(capacity.buffer, Some(0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_track_from_application_thread() {
    courier_test::setup!();

    let config = Config::from_yaml_str(
        "channel:\n  max_items_per_transmission: 1\n  flush_interval: 0\n",
    )
    .unwrap();
    let backend = Backend::accepting();
    let channel = TelemetryChannel::new(&config, backend.clone()).unwrap();

    let handle = channel.clone();
    std::thread::spawn(move || {
        let decision = handle.track(Request::new("abc")).unwrap();
        handle.transmitter().network_changed();
        decision
    })
    .join()
    .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while backend.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(lines(&backend.sent()[0])[0]["operationId"], "abc");
}
