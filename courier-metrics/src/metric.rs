use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use crate::aggregator::TrackValueError;
use crate::config::{CubeConfigError, MetricConfig};
use crate::cube::{BoundedDimensionalCube, CubeError, PointResult, PointResultCode};
use crate::manager::AggregationManager;
use crate::series::{MetricSeries, SeriesIdentity};

/// An error returned by [`Metric`] operations.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The number of dimension values does not match the number of dimension names.
    #[error("expected {expected} dimension values, got {actual}")]
    DimensionCountMismatch {
        /// The number of dimensions of the metric.
        expected: usize,
        /// The number of values passed.
        actual: usize,
    },
    /// The value of a dimension is empty.
    #[error("the value of dimension {0} is empty")]
    EmptyDimensionValue(usize),
    /// The series rejected the value.
    #[error(transparent)]
    TrackValue(#[from] TrackValueError),
}

impl From<CubeError<Infallible>> for MetricError {
    fn from(error: CubeError<Infallible>) -> Self {
        match error {
            CubeError::DimensionCountMismatch { expected, actual } => {
                Self::DimensionCountMismatch { expected, actual }
            }
            CubeError::InvalidCoordinate(index) => Self::EmptyDimensionValue(index),
            CubeError::Factory(never) => match never {},
        }
    }
}

/// Identifies a metric: its namespace, identifier and dimension names.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MetricIdentifier {
    namespace: String,
    metric_id: String,
    dimension_names: Vec<String>,
}

impl MetricIdentifier {
    /// Creates an identifier for a metric with the given dimension names.
    pub fn new<I>(
        namespace: impl Into<String>,
        metric_id: impl Into<String>,
        dimension_names: I,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            metric_id: metric_id.into(),
            dimension_names: dimension_names.into_iter().map(Into::into).collect(),
        }
    }

    /// The namespace of the metric.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The identifier of the metric within its namespace.
    pub fn metric_id(&self) -> &str {
        &self.metric_id
    }

    /// The names of all dimensions.
    pub fn dimension_names(&self) -> &[String] {
        &self.dimension_names
    }

    fn series_identity(&self, values: &[String]) -> SeriesIdentity {
        SeriesIdentity::new(
            self.namespace.as_str(),
            self.metric_id.as_str(),
            self.dimension_names
                .iter()
                .map(String::as_str)
                .zip(values.iter().map(String::as_str)),
        )
    }
}

enum SeriesStore {
    Single(Arc<MetricSeries>),
    Cube(BoundedDimensionalCube<MetricSeries, Infallible>),
}

/// A metric with any number of dimensions.
///
/// Every combination of dimension values is tracked by its own [`MetricSeries`]. The series
/// of a multi-dimensional metric are kept in a [`BoundedDimensionalCube`] that limits the
/// number of series.
pub struct Metric {
    identifier: MetricIdentifier,
    config: MetricConfig,
    series: SeriesStore,
}

impl Metric {
    /// Creates a metric whose series are aggregated by `manager`.
    pub fn new(
        manager: Arc<AggregationManager>,
        identifier: MetricIdentifier,
        config: MetricConfig,
    ) -> Result<Self, CubeConfigError> {
        config.validate()?;

        let dimensions = identifier.dimension_names.len();
        let series = if dimensions == 0 {
            let identity = identifier.series_identity(&[]);
            SeriesStore::Single(Arc::new(MetricSeries::new(
                manager,
                identity,
                config.series,
            )))
        } else {
            let factory_identifier = identifier.clone();
            let series_config = config.series;
            let cube = BoundedDimensionalCube::new(
                config.cube_config(dimensions),
                move |values: &[String]| {
                    Ok::<_, Infallible>(MetricSeries::new(
                        Arc::clone(&manager),
                        factory_identifier.series_identity(values),
                        series_config,
                    ))
                },
            )?;
            SeriesStore::Cube(cube)
        };

        Ok(Self {
            identifier,
            config,
            series,
        })
    }

    /// The identifier of this metric.
    pub fn identifier(&self) -> &MetricIdentifier {
        &self.identifier
    }

    /// The configuration of this metric.
    pub fn config(&self) -> &MetricConfig {
        &self.config
    }

    /// Returns the number of series of this metric.
    pub fn series_count(&self) -> usize {
        match &self.series {
            SeriesStore::Single(_) => 1,
            SeriesStore::Cube(cube) => cube.total_points_count(),
        }
    }

    /// Returns all series of this metric.
    pub fn all_series(&self) -> Vec<Arc<MetricSeries>> {
        match &self.series {
            SeriesStore::Single(series) => vec![Arc::clone(series)],
            SeriesStore::Cube(cube) => cube
                .get_all_points()
                .into_iter()
                .map(|(_, series)| series)
                .collect(),
        }
    }

    /// Looks up the series for `values`, creating it if `create` is set.
    pub fn try_get_series<S>(
        &self,
        values: &[S],
        create: bool,
    ) -> Result<PointResult<MetricSeries>, MetricError>
    where
        S: AsRef<str>,
    {
        match &self.series {
            SeriesStore::Single(series) => match values.len() {
                0 => Ok(PointResult::new(
                    PointResultCode::ExistingPointRetrieved,
                    Arc::clone(series),
                )),
                actual => Err(MetricError::DimensionCountMismatch {
                    expected: 0,
                    actual,
                }),
            },
            SeriesStore::Cube(cube) => match create {
                true => Ok(cube.try_get_or_create(values)?),
                false => Ok(cube.try_get(values)?),
            },
        }
    }

    /// Tracks `value` in the series for the dimension `values`.
    ///
    /// Returns `false` if the series does not exist and cannot be created because of the
    /// series or dimension limits.
    pub fn track_value<S>(&self, values: &[S], value: f64) -> Result<bool, MetricError>
    where
        S: AsRef<str>,
    {
        let result = self.try_get_series(values, true)?;
        let Some(series) = result.point() else {
            courier_log::trace!(
                metric = self.identifier.metric_id(),
                code = ?result.code(),
                "dropped value of capped metric"
            );
            return Ok(false);
        };

        series.track_value(value)?;
        Ok(true)
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("identifier", &self.identifier)
            .field("config", &self.config)
            .field("series", &self.series_count())
            .finish()
    }
}
