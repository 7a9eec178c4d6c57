use std::collections::BTreeMap;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use courier_log::LogConfig;
use courier_metrics::{AggregationConfig, MetricConfig};
use courier_sampling::SamplingConfig;
use courier_transmission::TransmitterConfig;
use serde::{Deserialize, Serialize};

/// The ingestion endpoint used if none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://dc.services.visualstudio.com/v2/track";

/// Indicates config related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to open or read the config file.
    #[error("could not open config file {}", path.display())]
    Io {
        /// The path that was opened.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Parsing YAML failed.
    #[error("could not parse yaml config")]
    Parse(#[from] serde_yaml::Error),
    /// A section of the config holds invalid values.
    #[error("invalid value in config section `{section}`")]
    Invalid {
        /// The name of the section as it appears in the file.
        section: &'static str,
        /// The validation error of the section.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl ConfigError {
    fn invalid<E>(section: &'static str, error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Invalid {
            section,
            source: Box::new(error),
        }
    }
}

/// An error returned by [`ChannelConfig::validate`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ChannelConfigError {
    /// No endpoint is configured.
    #[error("the endpoint must not be empty")]
    EmptyEndpoint,
    /// A transmission must be allowed to carry at least one item.
    #[error("max items per transmission must be at least 1")]
    ZeroItemsPerTransmission,
    /// The send timeout is zero.
    #[error("the transmission timeout must not be zero")]
    ZeroTimeout,
}

/// Batching and delivery options of the telemetry channel.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChannelConfig {
    /// The address of the ingestion endpoint.
    ///
    /// Defaults to [`DEFAULT_ENDPOINT`].
    pub endpoint: String,

    /// The number of items after which a batch is sent without waiting for a flush.
    ///
    /// Defaults to `500`.
    pub max_items_per_transmission: usize,

    /// Compresses payloads with gzip.
    ///
    /// Defaults to `true`.
    pub compress: bool,

    /// The time in seconds a single send may take.
    ///
    /// Defaults to `100` seconds.
    pub timeout: u64,

    /// The interval in seconds at which a partial batch is sent.
    ///
    /// Set to `0` to send batches only when they are full or flushed explicitly. Defaults to
    /// `30` seconds.
    pub flush_interval: u64,
}

impl ChannelConfig {
    /// Returns the send timeout as [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Returns the periodic flush interval, or `None` if periodic flushing is disabled.
    pub fn flush_interval(&self) -> Option<Duration> {
        match self.flush_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Checks that the endpoint is set and all limits are positive.
    pub fn validate(&self) -> Result<(), ChannelConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ChannelConfigError::EmptyEndpoint);
        }

        if self.max_items_per_transmission == 0 {
            return Err(ChannelConfigError::ZeroItemsPerTransmission);
        }

        if self.timeout == 0 {
            return Err(ChannelConfigError::ZeroTimeout);
        }

        Ok(())
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            max_items_per_transmission: 500,
            compress: true,
            timeout: 100,
            flush_interval: 30,
        }
    }
}

/// An error returned by [`MetricsConfig::validate`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MetricsConfigError {
    /// The sample rate is outside of `[0, 1]`.
    #[error("statsd sample rate {0} is outside of [0, 1]")]
    InvalidSampleRate(f64),
}

/// Controls the internal statsd metrics of the pipeline itself.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address of the statsd server, for example `127.0.0.1:8125`.
    ///
    /// Internal metrics are disabled if not set. Defaults to `None`.
    pub statsd: Option<String>,

    /// Prefix of every emitted metric name.
    ///
    /// Defaults to `"courier"`.
    pub prefix: String,

    /// Tags added to every emitted metric.
    pub default_tags: BTreeMap<String, String>,

    /// The share of metrics that is sent to the statsd server.
    ///
    /// Defaults to `1.0`.
    pub sample_rate: f64,
}

impl MetricsConfig {
    /// Checks that the sample rate is a valid ratio.
    pub fn validate(&self) -> Result<(), MetricsConfigError> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(MetricsConfigError::InvalidSampleRate(self.sample_rate));
        }

        Ok(())
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "courier".to_owned(),
            default_tags: BTreeMap::new(),
            sample_rate: 1.0,
        }
    }
}

/// The configuration of the whole telemetry pipeline.
///
/// Every section may be omitted from the file, in which case its defaults apply.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Logging of the pipeline.
    pub logging: LogConfig,

    /// Internal statsd metrics of the pipeline.
    pub metrics: MetricsConfig,

    /// Batching and delivery.
    pub channel: ChannelConfig,

    /// Sampling of telemetry items.
    pub sampling: SamplingConfig,

    /// Adjusts the sampling percentage to the observed throughput.
    ///
    /// If disabled, `sampling.initial_sampling_percentage` applies as a fixed percentage.
    /// Defaults to `false`.
    pub adaptive_sampling: bool,

    /// Capacities and backoff of the transmitter.
    pub transmitter: TransmitterConfig,

    /// Aggregation cycle of pre-aggregated metrics.
    pub aggregation: AggregationConfig,

    /// Limits applied to metrics created without explicit configuration.
    pub metric_defaults: MetricConfig,
}

impl Config {
    /// Parses and validates a configuration from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section, reporting the first invalid one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.metrics
            .validate()
            .map_err(|e| ConfigError::invalid("metrics", e))?;
        self.channel
            .validate()
            .map_err(|e| ConfigError::invalid("channel", e))?;
        self.sampling
            .validate()
            .map_err(|e| ConfigError::invalid("sampling", e))?;
        self.transmitter
            .validate()
            .map_err(|e| ConfigError::invalid("transmitter", e))?;
        self.metric_defaults
            .validate()
            .map_err(|e| ConfigError::invalid("metric_defaults", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use courier_log::LogLevel;
    use courier_metrics::AggregationKind;
    use courier_sampling::TelemetryType;

    use super::*;

    #[test]
    fn test_empty_config() {
        let config = Config::from_yaml_str("{}").unwrap();

        similar_asserts::assert_eq!(config.channel, ChannelConfig::default());
        similar_asserts::assert_eq!(config.transmitter, TransmitterConfig::default());
        similar_asserts::assert_eq!(config.sampling, SamplingConfig::default());
        assert!(!config.adaptive_sampling);
        assert_eq!(config.metrics.statsd, None);
    }

    #[test]
    fn test_channel_defaults() {
        insta::assert_json_snapshot!(ChannelConfig::default(), @r###"
        {
          "endpoint": "https://dc.services.visualstudio.com/v2/track",
          "max_items_per_transmission": 500,
          "compress": true,
          "timeout": 100,
          "flush_interval": 30
        }
        "###);
    }

    #[test]
    fn test_partial_sections() {
        let yaml = r#"
logging:
  level: debug
channel:
  endpoint: https://ingest.example.com/v2/track
  compress: false
  flush_interval: 0
sampling:
  max_telemetry_items_per_second: 20
  excluded_types: [Event]
adaptive_sampling: true
transmitter:
  max_sender_capacity: 5
  backoff:
    slot_delay: 2
metric_defaults:
  series:
    kind: accumulator
"#;
        let config = Config::from_yaml_str(yaml).unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.channel.endpoint, "https://ingest.example.com/v2/track");
        assert!(!config.channel.compress);
        assert_eq!(config.channel.flush_interval(), None);
        assert_eq!(config.channel.max_items_per_transmission, 500);
        assert_eq!(config.sampling.max_telemetry_items_per_second, 20.0);
        assert_eq!(config.sampling.excluded_types, vec![TelemetryType::Event]);
        assert!(config.adaptive_sampling);
        assert_eq!(config.transmitter.max_sender_capacity, 5);
        assert_eq!(config.transmitter.backoff.slot_delay, 2);
        assert_eq!(config.transmitter.backoff.max_delay, 3600);
        assert_eq!(
            config.metric_defaults.series.kind,
            AggregationKind::Accumulator
        );
    }

    #[test]
    fn test_invalid_section() {
        let error = Config::from_yaml_str("channel:\n  max_items_per_transmission: 0\n")
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                section: "channel",
                ..
            }
        ));

        let error = Config::from_yaml_str("sampling:\n  min_sampling_percentage: 0\n")
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                section: "sampling",
                ..
            }
        ));

        let error = Config::from_yaml_str("metrics:\n  sample_rate: 2.0\n").unwrap_err();
        assert!(matches!(
            error,
            ConfigError::Invalid {
                section: "metrics",
                ..
            }
        ));
    }

    #[test]
    fn test_bad_yaml() {
        let error = Config::from_yaml_str("channel: [").unwrap_err();
        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "channel:\n  timeout: 5").unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.channel.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yml");

        let error = Config::from_path(&path).unwrap_err();
        assert!(matches!(error, ConfigError::Io { path: p, .. } if p == path));
    }
}
