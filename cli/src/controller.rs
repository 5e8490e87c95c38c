//! Command execution against a wired pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ratefeed_coordinator::{PipelineState, RatePipeline, RefreshTask, TaskOutcome, TickReport};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Drives the pipeline for the CLI.
pub struct Controller {
    pipeline: Arc<RatePipeline>,
    tick_interval: Duration,
}

impl Controller {
    pub fn new(pipeline: Arc<RatePipeline>, tick_interval: Duration) -> Self {
        Self {
            pipeline,
            tick_interval,
        }
    }

    /// Tick on the configured interval until Ctrl+C or `duration` elapses.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<u64> {
        if self.pipeline.state().is_terminal() {
            anyhow::bail!("Pipeline already stopped");
        }
        info!(interval_secs = self.tick_interval.as_secs(), "Scheduler loop running");
        self.pipeline.set_state(PipelineState::Running);

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = async {
            match duration {
                Some(d) => {
                    tokio::time::sleep(d).await;
                    Ok(())
                }
                None => tokio::signal::ctrl_c().await,
            }
        };
        tokio::pin!(stop);

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                result = &mut stop => {
                    if let Err(e) = result {
                        error!(error = %e, "Failed to listen for Ctrl+C");
                    }
                    info!("Shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    let report = self.tick().await;
                    ticks += 1;
                    if report.failures() > 0 {
                        warn!(tick_id = %report.tick_id, failures = report.failures(), "Tick had failures");
                    }
                }
            }
        }

        self.pipeline.set_state(PipelineState::ShuttingDown);
        self.pipeline.set_state(PipelineState::Stopped);

        let metrics = self.pipeline.metrics().snapshot();
        info!(
            ticks = metrics.ticks_total,
            succeeded = metrics.tasks_succeeded,
            failed = metrics.tasks_failed,
            "Scheduler loop stopped"
        );
        Ok(ticks)
    }

    /// One scheduler evaluation at the current time.
    pub async fn tick(&self) -> TickReport {
        self.pipeline.run_tick(Utc::now()).await
    }

    pub async fn trigger(&self, task: RefreshTask) -> TaskOutcome {
        self.pipeline.trigger(task).await
    }

    pub fn pipeline(&self) -> &RatePipeline {
        &self.pipeline
    }
}

/// Render a value as pretty JSON.
pub fn render<T: Serialize>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratefeed_common::ExchangeRate;
    use ratefeed_coordinator::{LogNotifier, Scheduler, TieredRateCache};
    use ratefeed_sources::mock::{MockListingOrigin, MockOfficialOrigin, MockOrigin};
    use ratefeed_sources::{MarketplaceSampler, OfficialRateExtractor};
    use ratefeed_store::MemoryStore;

    fn controller(interval: Duration) -> (Controller, Arc<MockOrigin<Vec<ExchangeRate>>>) {
        let store = Arc::new(MemoryStore::new());
        let rate_list = Arc::new(MockOrigin::returning(Vec::new()));
        let pipeline = RatePipeline::new(
            Arc::new(OfficialRateExtractor::new(Arc::new(MockOfficialOrigin::new()))),
            Arc::new(MarketplaceSampler::new(Arc::new(MockListingOrigin::with_prices(&[
                "36.00",
            ])))),
            TieredRateCache::new(rate_list.clone(), store.clone(), chrono::Duration::seconds(300)),
            store,
            Arc::new(LogNotifier),
            Scheduler::default(),
        );
        (Controller::new(Arc::new(pipeline), interval), rate_list)
    }

    #[tokio::test]
    async fn test_run_stops_after_duration() {
        let (controller, _) = controller(Duration::from_millis(20));

        let ticks = controller.run(Some(Duration::from_millis(70))).await.unwrap();
        assert!(ticks >= 1);
        assert_eq!(controller.pipeline().state(), PipelineState::Stopped);
        assert_eq!(controller.pipeline().metrics().snapshot().ticks_total, ticks);

        let text = controller.pipeline().metrics().to_prometheus();
        assert!(text.contains(&format!("ratefeed_ticks_total {}", ticks)));

        assert!(controller.run(Some(Duration::from_millis(10))).await.is_err());
    }

    #[tokio::test]
    async fn test_trigger_cache_refresh() {
        let (controller, rate_list) = controller(Duration::from_secs(60));

        let outcome = controller.trigger(RefreshTask::CacheRefresh).await;
        assert!(outcome.is_success());
        assert_eq!(rate_list.calls(), 1);

        let json = render(&outcome).unwrap();
        assert!(json.contains("\"status\": \"succeeded\""));
    }
}
