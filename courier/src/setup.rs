use courier_config::Config;
use courier_statsd::{MetricError, MetricsClientConfig};

/// An error initializing the ambient services of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// The statsd client could not be created.
    #[error("failed to initialize internal metrics")]
    Metrics(#[from] MetricError),
}

/// Initializes logging and internal metrics from the configuration.
///
/// Call this once at startup, before creating a [`TelemetryChannel`](crate::TelemetryChannel).
pub fn init(config: &Config) -> Result<(), SetupError> {
    courier_log::init(&config.logging);
    init_metrics(config)
}

/// Initializes the statsd client if a statsd address is configured.
pub fn init_metrics(config: &Config) -> Result<(), SetupError> {
    let Some(host) = config.metrics.statsd.as_deref() else {
        courier_log::debug!("internal metrics disabled");
        return Ok(());
    };

    courier_statsd::init(MetricsClientConfig {
        prefix: &config.metrics.prefix,
        host,
        default_tags: config.metrics.default_tags.clone(),
        default_sample_rate: config.metrics.sample_rate.into(),
    })?;

    courier_log::info!(host, "reporting internal metrics");
    Ok(())
}
