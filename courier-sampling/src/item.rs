use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The type of a telemetry item.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TelemetryType {
    /// An incoming request handled by the application.
    Request,
    /// A call from the application to an external component.
    Dependency,
    /// A custom event.
    Event,
    /// An exception.
    Exception,
    /// A page view in a browser.
    PageView,
    /// A log message.
    Trace,
    /// A pre-aggregated metric.
    Metric,
    /// The result of an availability test.
    Availability,
}

impl TelemetryType {
    /// All telemetry types.
    pub const ALL: [Self; 8] = [
        Self::Request,
        Self::Dependency,
        Self::Event,
        Self::Exception,
        Self::PageView,
        Self::Trace,
        Self::Metric,
        Self::Availability,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Returns the name of the type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Dependency => "Dependency",
            Self::Event => "Event",
            Self::Exception => "Exception",
            Self::PageView => "PageView",
            Self::Trace => "Trace",
            Self::Metric => "Metric",
            Self::Availability => "Availability",
        }
    }
}

impl fmt::Display for TelemetryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned when parsing an unknown [`TelemetryType`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown telemetry type {0:?}")]
pub struct ParseTelemetryTypeError(String);

impl FromStr for TelemetryType {
    type Err = ParseTelemetryTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseTelemetryTypeError(s.to_owned()))
    }
}

/// A telemetry item that can pass through sampling.
pub trait Telemetry {
    /// The type of the item.
    fn telemetry_type(&self) -> TelemetryType;

    /// The identifier of the logical operation the item belongs to.
    ///
    /// All items of an operation share their sampling decision.
    fn operation_id(&self) -> Option<&str>;

    /// Returns `true` if the item carries a sampling percentage.
    ///
    /// Items that do not support sampling are always kept.
    fn supports_sampling(&self) -> bool {
        true
    }

    /// The sampling percentage the item was stamped with, if any.
    fn sampling_percentage(&self) -> Option<f64>;

    /// Stamps the item with the sampling percentage applied to it.
    fn set_sampling_percentage(&mut self, percentage: f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_telemetry_type() {
        assert_eq!("request".parse(), Ok(TelemetryType::Request));
        assert_eq!(" PageView".parse(), Ok(TelemetryType::PageView));
        assert_eq!(
            "span".parse::<TelemetryType>(),
            Err(ParseTelemetryTypeError("span".to_owned()))
        );
    }

    #[test]
    fn test_indices_are_dense() {
        for (index, ty) in TelemetryType::ALL.into_iter().enumerate() {
            assert_eq!(ty.index(), index);
        }
    }
}
