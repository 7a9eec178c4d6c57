use std::sync::atomic::{AtomicU64, Ordering};

use courier_statsd::metric;

use crate::config::{SamplingConfig, SamplingConfigError};
use crate::item::Telemetry;
use crate::score::sampling_score;
use crate::statsd::SamplingCounters;

/// Percentages this close to `100` disable sampling.
const FULL_PERCENTAGE_EPSILON: f64 = 1e-12;

/// Whether a telemetry item continues down the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SamplingDecision {
    /// The item is forwarded.
    Keep,
    /// The item is discarded and never retried.
    Drop,
}

impl SamplingDecision {
    /// Returns `true` if the item is kept.
    pub fn is_keep(self) -> bool {
        matches!(self, Self::Keep)
    }
}

/// Applies a sampling percentage to telemetry items.
///
/// The decision for an item is a pure function of its operation id and the current
/// percentage, so all items of an operation are kept or dropped together. The percentage can be
/// changed at any time from other threads.
#[derive(Debug)]
pub struct SamplingProcessor {
    config: SamplingConfig,
    percentage: AtomicU64,
}

impl SamplingProcessor {
    /// Creates a processor that starts with the configured initial percentage.
    pub fn new(config: SamplingConfig) -> Result<Self, SamplingConfigError> {
        config.validate()?;

        let percentage = AtomicU64::new(config.initial_sampling_percentage.to_bits());
        Ok(Self { config, percentage })
    }

    /// The configuration of this processor.
    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    /// The sampling percentage currently applied.
    pub fn sampling_percentage(&self) -> f64 {
        f64::from_bits(self.percentage.load(Ordering::Relaxed))
    }

    /// Changes the sampling percentage for all subsequent items.
    ///
    /// The percentage is clamped to `[0, 100]`.
    pub fn set_sampling_percentage(&self, percentage: f64) {
        let percentage = match percentage.is_nan() {
            true => 100.0,
            false => percentage.clamp(0.0, 100.0),
        };
        self.percentage
            .store(percentage.to_bits(), Ordering::Relaxed);
    }

    /// Returns `true` if `item` is subject to sampling under this configuration.
    pub fn is_sampling_applicable<T>(&self, item: &T) -> bool
    where
        T: Telemetry + ?Sized,
    {
        item.supports_sampling() && self.config.is_sampling_applicable(item.telemetry_type())
    }

    /// Decides whether `item` is kept and stamps sampled items with the percentage.
    ///
    /// Items pass unchanged if sampling is disabled, their type is excluded, they do not
    /// support sampling, or they were already stamped by an earlier processor.
    pub fn process<T>(&self, item: &mut T) -> SamplingDecision
    where
        T: Telemetry + ?Sized,
    {
        let ty = item.telemetry_type();
        let percentage = self.sampling_percentage();

        if percentage >= 100.0 - FULL_PERCENTAGE_EPSILON
            || !self.is_sampling_applicable(item)
            || item.sampling_percentage().is_some()
        {
            metric!(
                counter(SamplingCounters::ItemsKept) += 1,
                item_type = ty.as_str(),
                sampled = "false",
            );
            return SamplingDecision::Keep;
        }

        item.set_sampling_percentage(percentage);

        let score = sampling_score(item.operation_id());
        if score < percentage {
            metric!(
                counter(SamplingCounters::ItemsKept) += 1,
                item_type = ty.as_str(),
                sampled = "true",
            );
            SamplingDecision::Keep
        } else {
            courier_log::trace!(
                item_type = %ty,
                operation_id = item.operation_id(),
                score,
                percentage,
                "dropping sampled out item"
            );
            metric!(
                counter(SamplingCounters::ItemsDropped) += 1,
                item_type = ty.as_str()
            );
            SamplingDecision::Drop
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::item::TelemetryType;

    #[derive(Clone, Debug, Default)]
    pub struct Item {
        pub ty: Option<TelemetryType>,
        pub operation_id: Option<String>,
        pub sampling_percentage: Option<f64>,
        pub unsupported: bool,
    }

    impl Item {
        pub fn new(operation_id: &str) -> Self {
            Self {
                operation_id: Some(operation_id.to_owned()),
                ..Default::default()
            }
        }
    }

    impl Telemetry for Item {
        fn telemetry_type(&self) -> TelemetryType {
            self.ty.unwrap_or(TelemetryType::Request)
        }

        fn operation_id(&self) -> Option<&str> {
            self.operation_id.as_deref()
        }

        fn supports_sampling(&self) -> bool {
            !self.unsupported
        }

        fn sampling_percentage(&self) -> Option<f64> {
            self.sampling_percentage
        }

        fn set_sampling_percentage(&mut self, percentage: f64) {
            self.sampling_percentage = Some(percentage);
        }
    }

    fn processor(percentage: f64) -> SamplingProcessor {
        let processor = SamplingProcessor::new(SamplingConfig::default()).unwrap();
        processor.set_sampling_percentage(percentage);
        processor
    }

    #[test]
    fn test_full_percentage_keeps_everything() {
        let processor = processor(100.0);
        let mut item = Item::new("op");

        assert_eq!(processor.process(&mut item), SamplingDecision::Keep);
        assert_eq!(item.sampling_percentage, None);
    }

    #[test]
    fn test_decision_is_stable() {
        courier_test::setup!();
        let processor = processor(50.0);

        for i in 0..100 {
            let id = format!("operation-{i}");
            let first = processor.process(&mut Item::new(&id));
            for _ in 0..5 {
                assert_eq!(processor.process(&mut Item::new(&id)), first);
            }
        }
    }

    #[test]
    fn test_decision_follows_score() {
        let id = "0af7651916cd43dd8448eb211c80319c";
        let score = sampling_score(Some(id));

        let above = processor((score + 1.0).min(99.0));
        let mut item = Item::new(id);
        assert_eq!(
            above.process(&mut item).is_keep(),
            score < above.sampling_percentage()
        );
        assert_eq!(item.sampling_percentage, Some(above.sampling_percentage()));

        let zero = processor(0.0);
        assert_eq!(zero.process(&mut Item::new(id)), SamplingDecision::Drop);
    }

    #[test]
    fn test_bypasses() {
        let processor = SamplingProcessor::new(SamplingConfig {
            excluded_types: vec![TelemetryType::Exception],
            ..Default::default()
        })
        .unwrap();
        processor.set_sampling_percentage(0.0);

        let mut excluded = Item {
            ty: Some(TelemetryType::Exception),
            ..Item::new("op")
        };
        assert_eq!(processor.process(&mut excluded), SamplingDecision::Keep);

        let mut unsupported = Item {
            unsupported: true,
            ..Item::new("op")
        };
        assert_eq!(processor.process(&mut unsupported), SamplingDecision::Keep);

        let mut stamped = Item {
            sampling_percentage: Some(20.0),
            ..Item::new("op")
        };
        assert_eq!(processor.process(&mut stamped), SamplingDecision::Keep);
        assert_eq!(stamped.sampling_percentage, Some(20.0));
    }
}
