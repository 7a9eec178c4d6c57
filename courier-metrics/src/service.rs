use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::aggregate::AggregationPeriodSummary;
use crate::config::AggregationConfig;
use crate::manager::{AggregationManager, CycleKind};

/// Receives the aggregates of every completed default cycle.
pub trait MetricAggregateConsumer: Send + Sync {
    /// Consumes the aggregates of one period. Empty periods are not reported.
    fn consume(&self, summary: AggregationPeriodSummary);
}

/// Cycles the default aggregation cycle in regular intervals.
///
/// Every period is completed on the manager and handed to the consumer. On shutdown, the
/// current period is completed early so no values are lost.
pub struct AggregationCycleService {
    config: AggregationConfig,
    manager: Arc<AggregationManager>,
    consumer: Arc<dyn MetricAggregateConsumer>,
}

impl AggregationCycleService {
    /// Creates a new cycle service for `manager`.
    pub fn new(
        config: AggregationConfig,
        manager: Arc<AggregationManager>,
        consumer: Arc<dyn MetricAggregateConsumer>,
    ) -> Self {
        Self {
            config,
            manager,
            consumer,
        }
    }

    /// Spawns the service onto the current runtime.
    ///
    /// The service runs until `shutdown` is cancelled.
    pub fn spawn_handler(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.config.period();
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            courier_log::debug!(?period, "aggregation cycle service started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.cycle(),
                }
            }

            self.cycle();
            courier_log::debug!("aggregation cycle service stopped");
        })
    }

    fn cycle(&self) {
        let summary = match self
            .manager
            .start_or_cycle(CycleKind::Default, Utc::now(), None)
        {
            Ok(summary) => summary,
            Err(error) => {
                courier_log::error!(
                    error = &error as &dyn std::error::Error,
                    "failed to cycle default aggregators"
                );
                return;
            }
        };

        if !summary.is_empty() {
            self.consumer.consume(summary);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::SeriesConfig;
    use crate::series::{MetricSeries, SeriesIdentity};

    #[derive(Default)]
    struct Collect(Mutex<Vec<AggregationPeriodSummary>>);

    impl MetricAggregateConsumer for Collect {
        fn consume(&self, summary: AggregationPeriodSummary) {
            self.0.lock().push(summary);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_every_period() {
        courier_test::setup!();

        let manager = Arc::new(AggregationManager::new(Utc::now()));
        let consumer = Arc::new(Collect::default());
        let shutdown = CancellationToken::new();

        let service = AggregationCycleService::new(
            AggregationConfig { period: 60 },
            Arc::clone(&manager),
            consumer.clone(),
        );
        let handle = service.spawn_handler(shutdown.clone());

        let series = MetricSeries::new(
            Arc::clone(&manager),
            SeriesIdentity::new("ns", "latency", [] as [(&str, &str); 0]),
            SeriesConfig::default(),
        );
        series.track_value(10.0).unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(consumer.0.lock().len(), 1);

        // Empty periods are not reported.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(consumer.0.lock().len(), 1);

        series.track_value(20.0).unwrap();
        shutdown.cancel();
        handle.await.unwrap();

        let summaries = consumer.0.lock();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[1].nonpersistent_aggregations[0].metric_id, "latency");
    }
}
