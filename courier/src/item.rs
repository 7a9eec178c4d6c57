use courier_metrics::MetricAggregate;
use courier_sampling::{Telemetry, TelemetryType};
use serde::Serialize;

/// A pre-aggregated metric reported through the telemetry channel.
///
/// Aggregates are never sampled, since they already summarize all tracked values.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTelemetry {
    #[serde(rename = "type")]
    telemetry_type: TelemetryType,
    #[serde(flatten)]
    aggregate: MetricAggregate,
    #[serde(skip_serializing_if = "Option::is_none")]
    sampling_percentage: Option<f64>,
}

impl MetricTelemetry {
    /// Wraps a completed aggregate.
    pub fn new(aggregate: MetricAggregate) -> Self {
        Self {
            telemetry_type: TelemetryType::Metric,
            aggregate,
            sampling_percentage: None,
        }
    }

    /// The wrapped aggregate.
    pub fn aggregate(&self) -> &MetricAggregate {
        &self.aggregate
    }
}

impl From<MetricAggregate> for MetricTelemetry {
    fn from(aggregate: MetricAggregate) -> Self {
        Self::new(aggregate)
    }
}

impl Telemetry for MetricTelemetry {
    fn telemetry_type(&self) -> TelemetryType {
        self.telemetry_type
    }

    fn operation_id(&self) -> Option<&str> {
        None
    }

    fn supports_sampling(&self) -> bool {
        false
    }

    fn sampling_percentage(&self) -> Option<f64> {
        self.sampling_percentage
    }

    fn set_sampling_percentage(&mut self, percentage: f64) {
        self.sampling_percentage = Some(percentage);
    }
}
