//! A bounded container of points addressed by string coordinates.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use courier_statsd::metric;
use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{CubeConfig, CubeConfigError};
use crate::statsd::{MetricCounters, MetricGauges};

/// The coordinates of a point as stored in the cube.
pub type Coordinates = Box<[String]>;

type Factory<T, E> = Box<dyn Fn(&[String]) -> Result<T, E> + Send + Sync>;

/// The outcome of a point lookup or creation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PointResultCode {
    /// A new point was created at the requested coordinates.
    NewPointCreated,
    /// A new point was created after substituting the fallback value for at least one
    /// coordinate.
    NewPointCreatedAboveDimCapLimit,
    /// The point already existed, either at the requested or at the capped coordinates.
    ExistingPointRetrieved,
    /// The point does not exist and creation was not requested.
    PointDoesNotExistCreationNotRequested,
    /// A dimension has reached its distinct value limit and dimension capping is disabled.
    SubdimensionsCountLimitReached,
    /// The cube has reached its total points limit.
    TotalPointsCountLimitReached,
}

impl PointResultCode {
    /// Returns `true` if the result carries a point.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            Self::NewPointCreated
                | Self::NewPointCreatedAboveDimCapLimit
                | Self::ExistingPointRetrieved
        )
    }

    /// Returns `true` if the point was created by this call.
    pub fn is_point_created(self) -> bool {
        matches!(
            self,
            Self::NewPointCreated | Self::NewPointCreatedAboveDimCapLimit
        )
    }

    /// Returns `true` if creation was rejected because of a cardinality limit.
    pub fn is_capacity_failure(self) -> bool {
        matches!(
            self,
            Self::SubdimensionsCountLimitReached | Self::TotalPointsCountLimitReached
        )
    }
}

/// The result of [`BoundedDimensionalCube::try_get`] and
/// [`BoundedDimensionalCube::try_get_or_create`].
#[derive(Debug)]
pub struct PointResult<T> {
    code: PointResultCode,
    point: Option<Arc<T>>,
    failed_dimension: Option<usize>,
}

impl<T> PointResult<T> {
    pub(crate) fn new(code: PointResultCode, point: Arc<T>) -> Self {
        Self {
            code,
            point: Some(point),
            failed_dimension: None,
        }
    }

    fn existing(point: Arc<T>) -> Self {
        Self::new(PointResultCode::ExistingPointRetrieved, point)
    }

    fn failure(code: PointResultCode, failed_dimension: Option<usize>) -> Self {
        Self {
            code,
            point: None,
            failed_dimension,
        }
    }

    /// The outcome of the operation.
    pub fn code(&self) -> PointResultCode {
        self.code
    }

    /// The point, if the operation succeeded.
    pub fn point(&self) -> Option<&Arc<T>> {
        self.point.as_ref()
    }

    /// Consumes the result and returns the point, if the operation succeeded.
    pub fn into_point(self) -> Option<Arc<T>> {
        self.point
    }

    /// The index of the dimension that rejected a new value.
    ///
    /// Only set for [`PointResultCode::SubdimensionsCountLimitReached`].
    pub fn failed_dimension(&self) -> Option<usize> {
        self.failed_dimension
    }

    /// Returns `true` if the result carries a point.
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns `true` if the point was created by this call.
    pub fn is_point_created(&self) -> bool {
        self.code.is_point_created()
    }
}

impl<T> Clone for PointResult<T> {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            point: self.point.clone(),
            failed_dimension: self.failed_dimension,
        }
    }
}

/// The result of [`BoundedDimensionalCube::try_get_or_create_async`].
#[derive(Debug)]
pub enum CreationResult<T> {
    /// The lookup completed without a capacity rejection.
    Success(PointResult<T>),
    /// Creation was rejected and no retry time was granted.
    CapacityExhausted(PointResult<T>),
    /// Creation was still rejected when the timeout elapsed.
    Timeout(PointResult<T>),
    /// The cancellation token fired before creation succeeded.
    Cancelled,
}

impl<T> CreationResult<T> {
    /// Returns the point if one was retrieved or created.
    pub fn point(&self) -> Option<&Arc<T>> {
        match self {
            Self::Success(result) => result.point(),
            _ => None,
        }
    }
}

/// An error returned for invalid coordinates or a failing point factory.
#[derive(Debug, thiserror::Error)]
pub enum CubeError<E> {
    /// The number of coordinates does not match the dimensionality of the cube.
    #[error("expected {expected} coordinates, got {actual}")]
    DimensionCountMismatch {
        /// The dimensionality of the cube.
        expected: usize,
        /// The number of coordinates passed.
        actual: usize,
    },
    /// The coordinate at the given dimension is empty.
    #[error("the coordinate of dimension {0} is empty")]
    InvalidCoordinate(usize),
    /// The point factory returned an error. No point was created.
    #[error("failed to create point")]
    Factory(#[source] E),
}

/// A concurrent map from coordinate tuples to lazily created points.
///
/// Every dimension holds a bounded number of distinct values, and the cube holds a bounded
/// number of points in total. With dimension capping enabled, values in excess of a
/// dimension's limit are replaced with the configured fallback value, which does not count
/// towards the limit.
///
/// Lookups of existing points take a shared lock. Creation is serialized, so the factory runs
/// at most once per coordinate tuple even under concurrent callers. The factory runs while
/// creation is locked and must not access the cube.
pub struct BoundedDimensionalCube<T, E> {
    config: CubeConfig,
    factory: Factory<T, E>,
    points: RwLock<HashMap<Coordinates, Arc<T>>>,
    dimension_values: Mutex<Vec<HashSet<String>>>,
    total_points: AtomicUsize,
}

impl<T, E> BoundedDimensionalCube<T, E> {
    /// Creates an empty cube that creates points with `factory`.
    pub fn new<F>(config: CubeConfig, factory: F) -> Result<Self, CubeConfigError>
    where
        F: Fn(&[String]) -> Result<T, E> + Send + Sync + 'static,
    {
        config.validate()?;

        let dimension_values = config
            .dimension_limits
            .iter()
            .map(|_| HashSet::new())
            .collect();

        Ok(Self {
            config,
            factory: Box::new(factory),
            points: RwLock::new(HashMap::new()),
            dimension_values: Mutex::new(dimension_values),
            total_points: AtomicUsize::new(0),
        })
    }

    /// Returns the configuration of this cube.
    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    /// Returns the number of dimensions.
    pub fn dimensions(&self) -> usize {
        self.config.dimensions()
    }

    /// Returns the number of points in the cube.
    pub fn total_points_count(&self) -> usize {
        self.total_points.load(Ordering::Acquire)
    }

    /// Returns the number of distinct values accepted at `dimension`.
    ///
    /// The fallback value is not counted.
    pub fn dimension_values_count(&self, dimension: usize) -> usize {
        self.dimension_values
            .lock()
            .get(dimension)
            .map_or(0, HashSet::len)
    }

    /// Looks up the point at `coordinates` without creating it.
    pub fn try_get<S>(&self, coordinates: &[S]) -> Result<PointResult<T>, CubeError<E>>
    where
        S: AsRef<str>,
    {
        let key = self.validate(coordinates)?;

        Ok(match self.lookup(&key) {
            Some(point) => PointResult::existing(point),
            None => PointResult::failure(
                PointResultCode::PointDoesNotExistCreationNotRequested,
                None,
            ),
        })
    }

    /// Looks up the point at `coordinates` and creates it if it does not exist.
    ///
    /// Capacity exhaustion is reported through the [`PointResultCode`], not as an error. An
    /// error from the factory is returned as [`CubeError::Factory`] and leaves the cube
    /// unchanged.
    pub fn try_get_or_create<S>(&self, coordinates: &[S]) -> Result<PointResult<T>, CubeError<E>>
    where
        S: AsRef<str>,
    {
        let mut key = self.validate(coordinates)?;

        if let Some(point) = self.lookup(&key) {
            return Ok(PointResult::existing(point));
        }

        let mut dimension_values = self.dimension_values.lock();

        // Another creator may have finished while we were waiting for the lock.
        if let Some(point) = self.lookup(&key) {
            return Ok(PointResult::existing(point));
        }

        let total_exhausted = self.total_points_count() >= self.config.total_points_limit;
        let mut capped = false;

        for (index, value) in key.iter_mut().enumerate() {
            let values = &dimension_values[index];
            if values.contains(value.as_str()) || values.len() < self.config.dimension_limits[index]
            {
                continue;
            }

            if !self.config.dimension_capping {
                metric!(
                    counter(MetricCounters::PointRejected) += 1,
                    reason = "dimension_limit"
                );
                return Ok(PointResult::failure(
                    PointResultCode::SubdimensionsCountLimitReached,
                    Some(index),
                ));
            }

            if total_exhausted {
                break;
            }

            value.clone_from(&self.config.fallback_value);
            capped = true;
        }

        if capped && let Some(point) = self.lookup(&key) {
            return Ok(PointResult::existing(point));
        }

        if total_exhausted {
            metric!(
                counter(MetricCounters::PointRejected) += 1,
                reason = "total_limit"
            );
            return Ok(PointResult::failure(
                PointResultCode::TotalPointsCountLimitReached,
                None,
            ));
        }

        let point = Arc::new((self.factory)(&key).map_err(CubeError::Factory)?);

        for (values, value) in dimension_values.iter_mut().zip(key.iter()) {
            let is_fallback = self.config.dimension_capping && *value == self.config.fallback_value;
            if !is_fallback && !values.contains(value.as_str()) {
                values.insert(value.clone());
            }
        }

        self.points
            .write()
            .insert(key.into_boxed_slice(), Arc::clone(&point));
        let total = self.total_points.fetch_add(1, Ordering::AcqRel) + 1;
        drop(dimension_values);

        metric!(
            counter(MetricCounters::PointCreated) += 1,
            capped = if capped { "true" } else { "false" }
        );
        metric!(gauge(MetricGauges::CubePoints) = total as u64);

        let code = match capped {
            true => PointResultCode::NewPointCreatedAboveDimCapLimit,
            false => PointResultCode::NewPointCreated,
        };

        Ok(PointResult::new(code, point))
    }

    /// Retries [`try_get_or_create`](Self::try_get_or_create) while it is rejected by a
    /// cardinality limit.
    ///
    /// Attempts are spaced by `sleep` and stop once `timeout` has elapsed or `cancel` fires. A
    /// zero `timeout` makes a single attempt and reports a rejection as
    /// [`CreationResult::CapacityExhausted`].
    pub async fn try_get_or_create_async<S>(
        &self,
        coordinates: &[S],
        sleep: Duration,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CreationResult<T>, CubeError<E>>
    where
        S: AsRef<str>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            if cancel.is_cancelled() {
                return Ok(CreationResult::Cancelled);
            }

            let result = self.try_get_or_create(coordinates)?;
            if !result.code().is_capacity_failure() {
                return Ok(CreationResult::Success(result));
            }

            if timeout.is_zero() {
                return Ok(CreationResult::CapacityExhausted(result));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(CreationResult::Timeout(result));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(CreationResult::Cancelled),
                _ = tokio::time::sleep(sleep.min(deadline - now)) => {}
            }
        }
    }

    /// Returns a snapshot of all points and their coordinates.
    ///
    /// Creators are not blocked while the snapshot is iterated.
    pub fn get_all_points(&self) -> Vec<(Coordinates, Arc<T>)> {
        self.points
            .read()
            .iter()
            .map(|(coordinates, point)| (coordinates.clone(), Arc::clone(point)))
            .collect()
    }

    fn validate<S>(&self, coordinates: &[S]) -> Result<Vec<String>, CubeError<E>>
    where
        S: AsRef<str>,
    {
        if coordinates.len() != self.dimensions() {
            return Err(CubeError::DimensionCountMismatch {
                expected: self.dimensions(),
                actual: coordinates.len(),
            });
        }

        coordinates
            .iter()
            .enumerate()
            .map(|(index, coordinate)| match coordinate.as_ref() {
                "" => Err(CubeError::InvalidCoordinate(index)),
                value => Ok(value.to_owned()),
            })
            .collect()
    }

    fn lookup(&self, key: &[String]) -> Option<Arc<T>> {
        self.points.read().get(key).cloned()
    }
}

impl<T, E> fmt::Debug for BoundedDimensionalCube<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedDimensionalCube")
            .field("config", &self.config)
            .field("total_points", &self.total_points_count())
            .finish_non_exhaustive()
    }
}
