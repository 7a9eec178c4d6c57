use std::fmt;
use std::sync::Arc;

use courier_statsd::metric;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{SamplingConfig, SamplingConfigError};
use crate::estimator::{AdaptiveSamplingEstimator, SamplingEvaluation};
use crate::item::Telemetry;
use crate::processor::{SamplingDecision, SamplingProcessor};
use crate::statsd::{SamplingCounters, SamplingGauges};

/// Invoked after every evaluation of the sampling percentage.
pub type EvaluationCallback = Box<dyn Fn(&SamplingEvaluation, &SamplingConfig) + Send + Sync>;

/// A [`SamplingProcessor`] whose percentage follows the observed throughput.
///
/// Kept items are counted by an [`AdaptiveSamplingEstimator`]. A background task spawned with
/// [`spawn_evaluation`](Self::spawn_evaluation) evaluates the estimator every evaluation
/// interval and applies the new percentage to the processor.
pub struct AdaptiveSamplingProcessor {
    processor: SamplingProcessor,
    estimator: AdaptiveSamplingEstimator,
    callback: Option<EvaluationCallback>,
}

impl AdaptiveSamplingProcessor {
    /// Creates an adaptive processor starting with the configured initial percentage.
    pub fn new(config: SamplingConfig) -> Result<Self, SamplingConfigError> {
        let estimator = AdaptiveSamplingEstimator::new(config.clone(), Instant::now())?;
        let processor = SamplingProcessor::new(config)?;
        processor.set_sampling_percentage(estimator.sampling_percentage());

        Ok(Self {
            processor,
            estimator,
            callback: None,
        })
    }

    /// Registers a callback that receives the outcome of every evaluation.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SamplingEvaluation, &SamplingConfig) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The sampling percentage currently applied.
    pub fn sampling_percentage(&self) -> f64 {
        self.processor.sampling_percentage()
    }

    /// Samples `item` and counts it towards the observed throughput if it is kept.
    pub fn process<T>(&self, item: &mut T) -> SamplingDecision
    where
        T: Telemetry + ?Sized,
    {
        let decision = self.processor.process(item);
        if decision.is_keep() && self.processor.is_sampling_applicable(item) {
            self.estimator.record(item.telemetry_type());
        }
        decision
    }

    /// Completes an evaluation interval and applies the resulting percentage.
    pub fn evaluate(&self, now: Instant) -> SamplingEvaluation {
        let evaluation = self.estimator.evaluate(now);

        if evaluation.changed {
            self.processor
                .set_sampling_percentage(evaluation.new_percentage);

            let direction = match evaluation.new_percentage < evaluation.current_percentage {
                true => "decrease",
                false => "increase",
            };
            courier_log::info!(
                from = evaluation.current_percentage,
                to = evaluation.new_percentage,
                rate = evaluation.before_sampling_rate,
                "changed sampling percentage"
            );
            metric!(
                counter(SamplingCounters::PercentageChanged) += 1,
                direction = direction
            );
        }

        metric!(gauge(SamplingGauges::Percentage) = evaluation.new_percentage);
        metric!(gauge(SamplingGauges::BeforeSamplingRate) = evaluation.before_sampling_rate);

        if let Some(ref callback) = self.callback {
            callback(&evaluation, self.estimator.config());
        }

        evaluation
    }

    /// Spawns the evaluation task onto the current runtime.
    ///
    /// The task runs until `shutdown` is cancelled.
    pub fn spawn_evaluation(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let processor = Arc::clone(self);

        tokio::spawn(async move {
            let interval = processor.estimator.config().evaluation_interval();
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,
                    now = ticker.tick() => {
                        processor.evaluate(now);
                    }
                }
            }
        })
    }
}

impl fmt::Debug for AdaptiveSamplingProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptiveSamplingProcessor")
            .field("processor", &self.processor)
            .field("estimator", &self.estimator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::processor::tests::Item;

    fn config() -> SamplingConfig {
        SamplingConfig {
            evaluation_interval: 1,
            max_telemetry_items_per_second: 10.0,
            min_sampling_percentage: 1.0,
            sampling_percentage_decrease_timeout: 0,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapts_to_throughput() {
        courier_test::setup!();

        let evaluations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluations);
        let processor = Arc::new(AdaptiveSamplingProcessor::new(config()).unwrap().with_callback(
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        ));

        let shutdown = CancellationToken::new();
        let handle = processor.spawn_evaluation(shutdown.clone());

        for i in 0..100 {
            let mut item = Item::new(&format!("operation-{i}"));
            assert!(processor.process(&mut item).is_keep());
        }

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);
        assert_eq!(processor.sampling_percentage(), 10.0);

        // Without traffic, the percentage is held for the increase timeout.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(processor.sampling_percentage(), 10.0);
        assert!(evaluations.load(Ordering::SeqCst) > 1);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_excluded_items_are_not_counted() {
        let processor = AdaptiveSamplingProcessor::new(SamplingConfig {
            excluded_types: vec![crate::TelemetryType::Event],
            ..config()
        })
        .unwrap();

        for _ in 0..100 {
            let mut item = Item {
                ty: Some(crate::TelemetryType::Event),
                ..Item::new("op")
            };
            processor.process(&mut item);
        }

        let evaluation = processor.evaluate(Instant::now());
        assert!(evaluation.observed_items.is_empty());
        assert!(!evaluation.changed);
    }
}
