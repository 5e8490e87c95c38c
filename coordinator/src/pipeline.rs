//! The refresh pipeline: fetch, change-detect, persist, notify.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use ratefeed_common::{
    Currency, ExchangeRate, MarketplaceQuote, RateFeedError, RateSample, RateType, Result,
    Source,
};
use ratefeed_sources::{
    HttpClient, HttpListingOrigin, HttpOfficialOrigin, HttpRateListOrigin, MarketplaceSampler,
    OfficialRateExtractor, OfficialRates, SampleOutcome,
};
use ratefeed_store::{CurrentRates, PersistentStore};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::change_detector::{ChangeDetector, RateChange};
use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::notification::{ChangedRatesPayload, NotificationTrigger};
use crate::scheduler::{RefreshTask, Scheduler};
use crate::state::PipelineState;
use crate::supervisor::{Supervisor, TaskOutcome, TaskSummary, TickReport};
use crate::tiered_cache::{CacheRead, TieredRateCache};

/// Default number of marketplace samples returned by history queries.
pub const DEFAULT_HISTORY_LIMIT: u32 = 24;

/// Store connectivity as reported by the health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
}

/// Health probe result.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub state: PipelineState,
    pub database: DatabaseStatus,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
}

/// Orchestrates the refresh tasks and answers queries.
pub struct RatePipeline {
    extractor: Arc<OfficialRateExtractor>,
    sampler: Arc<MarketplaceSampler>,
    cache: Arc<TieredRateCache<Vec<ExchangeRate>>>,
    detector: ChangeDetector,
    store: Arc<dyn PersistentStore>,
    notifier: Arc<dyn NotificationTrigger>,
    scheduler: Scheduler,
    supervisor: Supervisor,
    metrics: Arc<Metrics>,
    state: RwLock<PipelineState>,
}

impl RatePipeline {
    /// Assemble a pipeline from its parts.
    pub fn new(
        extractor: Arc<OfficialRateExtractor>,
        sampler: Arc<MarketplaceSampler>,
        cache: TieredRateCache<Vec<ExchangeRate>>,
        store: Arc<dyn PersistentStore>,
        notifier: Arc<dyn NotificationTrigger>,
        scheduler: Scheduler,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());

        Self {
            extractor,
            sampler,
            cache: Arc::new(cache.with_metrics(metrics.clone())),
            detector: ChangeDetector::new(store.clone()),
            store,
            notifier,
            scheduler,
            supervisor: Supervisor::new(metrics.clone()),
            metrics,
            state: RwLock::new(PipelineState::Starting),
        }
    }

    /// Wire HTTP origins from configuration around an existing store.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<dyn PersistentStore>,
        notifier: Arc<dyn NotificationTrigger>,
    ) -> Result<Self> {
        let http = HttpClient::new(config.sources.request_timeout)?;
        let ttl = Duration::from_std(config.cache.ttl)
            .map_err(|e| RateFeedError::Configuration(format!("cache TTL: {}", e)))?;

        let extractor = OfficialRateExtractor::new(Arc::new(HttpOfficialOrigin::new(
            http.clone(),
            &config.sources.official_url,
            &config.sources.fallback_url,
        )));
        let sampler = MarketplaceSampler::new(Arc::new(HttpListingOrigin::new(
            http.clone(),
            &config.sources.marketplace_url,
        )));
        let cache = TieredRateCache::new(
            Arc::new(HttpRateListOrigin::new(http, &config.sources.rate_list_url)),
            store.clone(),
            ttl,
        );

        Ok(Self::new(
            Arc::new(extractor),
            Arc::new(sampler),
            cache,
            store,
            notifier,
            Scheduler::new(&config.scheduler),
        ))
    }

    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    pub fn set_state(&self, state: PipelineState) {
        info!(from = ?self.state(), to = ?state, "Pipeline state change");
        *self.state.write() = state;
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Run whatever the scheduler selects for `now`.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let tasks = self.scheduler.select(now);
        self.run_tasks(now, &tasks).await
    }

    /// Run one task immediately, regardless of the clock.
    pub async fn trigger(&self, task: RefreshTask) -> TaskOutcome {
        let mut report = self.run_tasks(Utc::now(), &[task]).await;
        match report.outcomes.pop() {
            Some(outcome) => outcome,
            None => TaskOutcome::Failed {
                task,
                code: "INTERNAL",
                error: "task produced no outcome".to_string(),
            },
        }
    }

    async fn run_tasks(&self, now: DateTime<Utc>, tasks: &[RefreshTask]) -> TickReport {
        let tasks = if self.state().accepts_ticks() {
            tasks
        } else {
            warn!(state = ?self.state(), "Pipeline not accepting ticks");
            &[]
        };
        self.supervisor.run(now, tasks, |task| self.run_task(task)).await
    }

    /// Dispatch one task. Errors are left to the supervisor.
    pub async fn run_task(&self, task: RefreshTask) -> Result<TaskSummary> {
        match task {
            RefreshTask::OfficialRate => self.refresh_official().await,
            RefreshTask::Marketplace => self.refresh_marketplace().await,
            RefreshTask::CacheRefresh => self.refresh_cache().await,
        }
    }

    /// Scrape the official rates and record the ones that changed.
    ///
    /// Changes persisted before a storage failure are still notified.
    #[instrument(skip(self))]
    pub async fn refresh_official(&self) -> Result<TaskSummary> {
        let rates = self.extractor.scrape(true).await?;
        let mut summary = TaskSummary::new(RefreshTask::OfficialRate);

        let recorded = self.record_official(&rates, &mut summary.changes).await;
        self.notify(Source::Official, &summary.changes).await;
        recorded?;

        if !rates.eur_available() {
            summary = summary.with_note("EUR unavailable");
        }
        Ok(summary)
    }

    async fn record_official(&self, rates: &OfficialRates, changes: &mut Vec<RateChange>) -> Result<()> {
        for currency in [Currency::usd(), Currency::eur()] {
            let Some(value) = rates.get(&currency) else {
                warn!(currency = %currency, provenance = ?rates.provenance, "Rate unavailable, skipping");
                continue;
            };

            let Some(change) = self.detector.evaluate(Source::Official, &currency, value).await?
            else {
                continue;
            };

            let sample = RateSample::new(Source::Official, currency.clone(), RateType::Official, value)
                .with_evidence(json!({
                    "provenance": rates.provenance,
                    "extracted": rates.evidence,
                }));
            self.persist(&sample).await?;
            info!(currency = %currency, value = %value, previous = ?change.previous, "Official rate changed");
            changes.push(change);
        }
        Ok(())
    }

    /// Sample VES/USDT listings, store the quote and record a median change.
    #[instrument(skip(self))]
    pub async fn refresh_marketplace(&self) -> Result<TaskSummary> {
        let mut summary = TaskSummary::new(RefreshTask::Marketplace);

        let quote = match self.sampler.sample_usdt_ves().await {
            SampleOutcome::Quote(quote) => quote,
            SampleOutcome::NotFound(reason) => {
                warn!(reason = %reason, "No marketplace listings");
                return Ok(summary.with_note(format!("no listings: {}", reason)));
            }
            SampleOutcome::InvalidInput(e) | SampleOutcome::TransportFailure(e) => {
                return Err(e.into());
            }
        };

        self.store.append_marketplace_quote(&quote).await?;

        let Some(median) = quote.median_price else {
            return Ok(summary.with_note("quote has no prices"));
        };

        if let Some(change) = self
            .detector
            .evaluate(Source::Marketplace, &quote.asset, median)
            .await?
        {
            let sample = RateSample::new(Source::Marketplace, quote.asset.clone(), RateType::P2p, median)
                .with_aux_value(quote.average_price)
                .with_evidence(json!({
                    "fiat": quote.fiat,
                    "tradeType": quote.trade_type,
                    "prices": quote.prices,
                }))
                .observed_at(quote.observed_at);
            self.persist(&sample).await?;
            info!(median = %median, previous = ?change.previous, "Marketplace median changed");
            summary.changes.push(change);
        }

        self.notify(Source::Marketplace, &summary.changes).await;
        Ok(summary)
    }

    /// Re-fetch the rate list into both cache tiers.
    #[instrument(skip(self))]
    pub async fn refresh_cache(&self) -> Result<TaskSummary> {
        let summary = TaskSummary::new(RefreshTask::CacheRefresh);
        if self.cache.refresh().await {
            Ok(summary)
        } else {
            Ok(summary.with_note("origin unavailable, cached data kept"))
        }
    }

    async fn persist(&self, sample: &RateSample) -> Result<()> {
        self.store.append_rate_sample(sample).await?;
        self.metrics.sample_persisted();
        Ok(())
    }

    /// Hand changes to the notifier. Failures are logged, never raised.
    async fn notify(&self, source: Source, changes: &[RateChange]) {
        if changes.is_empty() {
            return;
        }

        let rates = match self.store.current_rates().await {
            Ok(rates) => rates.for_source(source),
            Err(e) => {
                error!(error = %e, source = %source, "Current rates unavailable, notifying changed keys only");
                changes
                    .iter()
                    .map(|c| (c.currency.clone(), c.current))
                    .collect()
            }
        };

        let payload = ChangedRatesPayload::new(source, rates, changes);
        match self.notifier.notify(&payload).await {
            Ok(()) => self.metrics.notification_sent(),
            Err(e) => warn!(error = %e, source = %source, "Notification failed"),
        }
    }

    /// Read the aggregated rate list through the cache tiers.
    pub async fn read_rates(&self) -> Result<CacheRead<Vec<ExchangeRate>>> {
        self.cache.read().await
    }

    /// Most recent VES/USDT marketplace quote.
    pub async fn latest_marketplace_quote(&self) -> Result<Option<MarketplaceQuote>> {
        self.store
            .latest_marketplace_quote(&Currency::ves(), &Currency::usdt())
            .await
    }

    /// VES/USDT marketplace quotes, newest first.
    pub async fn marketplace_history(&self, limit: Option<u32>) -> Result<Vec<MarketplaceQuote>> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
        if limit == 0 {
            return Err(RateFeedError::validation("limit", "must be at least 1"));
        }
        self.store
            .marketplace_history(&Currency::ves(), &Currency::usdt(), limit)
            .await
    }

    /// Latest persisted value per (source, currency).
    pub async fn current_rates(&self) -> Result<CurrentRates> {
        self.store.current_rates().await
    }

    /// Probe the store with a trivial round trip.
    pub async fn health(&self) -> HealthReport {
        let database = match self.store.ping().await {
            Ok(()) => DatabaseStatus::Connected,
            Err(e) => {
                warn!(error = %e, "Health probe failed");
                DatabaseStatus::Disconnected
            }
        };

        HealthReport {
            status: "ok",
            state: self.state(),
            database,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::RecordingNotifier;
    use chrono::TimeZone;
    use ratefeed_sources::mock::{MockListingOrigin, MockOfficialOrigin, MockOrigin};
    use ratefeed_sources::{FallbackQuote, SourceError};
    use ratefeed_store::MemoryStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::Ordering;

    const PAGE: &str = r#"
        <div id="euro"><span> EUR </span><strong> 39,81230000 </strong></div>
        <div id="dolar"><span> USD </span><strong> 36,52100000 </strong></div>
    "#;

    struct Harness {
        official: Arc<MockOfficialOrigin>,
        listings: Arc<MockListingOrigin>,
        rate_list: Arc<MockOrigin<Vec<ExchangeRate>>>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        pipeline: RatePipeline,
    }

    fn harness() -> Harness {
        let official = Arc::new(MockOfficialOrigin::new());
        official.set_page(PAGE);
        let listings = Arc::new(MockListingOrigin::with_prices(&["38.10", "36.50", "37.00"]));
        let rate_list = Arc::new(MockOrigin::returning(Vec::new()));
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());

        let pipeline = RatePipeline::new(
            Arc::new(OfficialRateExtractor::new(official.clone())),
            Arc::new(MarketplaceSampler::new(listings.clone())),
            TieredRateCache::new(rate_list.clone(), store.clone(), Duration::seconds(300)),
            store.clone(),
            notifier.clone(),
            Scheduler::default(),
        );

        Harness {
            official,
            listings,
            rate_list,
            store,
            notifier,
            pipeline,
        }
    }

    #[tokio::test]
    async fn test_official_refresh_persists_and_notifies() {
        let h = harness();

        let summary = h.pipeline.refresh_official().await.unwrap();
        assert_eq!(summary.changes.len(), 2);

        let current = h.store.current_rates().await.unwrap();
        let official = current.for_source(Source::Official);
        assert_eq!(official.get(&Currency::usd()), Some(&dec!(36.521)));
        assert_eq!(official.get(&Currency::eur()), Some(&dec!(39.8123)));

        let payloads = h.notifier.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].rates, official);
        assert!(payloads[0].deltas.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_official_rates_are_not_persisted() {
        let h = harness();
        h.pipeline.refresh_official().await.unwrap();

        let summary = h.pipeline.refresh_official().await.unwrap();
        assert!(summary.changes.is_empty());
        assert_eq!(h.store.samples().len(), 2);
        assert_eq!(h.notifier.payloads().len(), 1);
    }

    #[tokio::test]
    async fn test_changed_rate_carries_delta() {
        let h = harness();
        h.pipeline.refresh_official().await.unwrap();

        h.official.set_page(PAGE.replace("36,52100000", "36,62100000"));
        let summary = h.pipeline.refresh_official().await.unwrap();

        assert_eq!(summary.changes.len(), 1);
        let payload = h.notifier.payloads().pop().unwrap();
        assert_eq!(payload.deltas.get("USD"), Some(&dec!(0.1)));
        assert_eq!(payload.rates.get(&Currency::usd()), Some(&dec!(36.621)));
    }

    #[tokio::test]
    async fn test_fallback_skips_unavailable_eur() {
        let h = harness();
        h.official.fail_page(SourceError::Status {
            url: "mock://page".into(),
            status: 503,
        });
        h.official.set_fallback(FallbackQuote {
            promedio: Some(dec!(36.4)),
            venta: None,
            compra: None,
        });

        let summary = h.pipeline.refresh_official().await.unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert_eq!(summary.changes[0].currency, Currency::usd());
        assert_eq!(summary.note.as_deref(), Some("EUR unavailable"));

        let samples = h.store.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].raw_evidence["provenance"], "fallback");
    }

    #[tokio::test]
    async fn test_marketplace_refresh_tracks_median() {
        let h = harness();

        let summary = h.pipeline.refresh_marketplace().await.unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert_eq!(h.store.quote_count(), 1);

        let sample = h.store.samples().pop().unwrap();
        assert_eq!(sample.currency, Currency::usdt());
        assert_eq!(sample.rate_type, RateType::P2p);
        assert_eq!(sample.value, dec!(37.00));
        assert_eq!(sample.aux_value, Some(dec!(37.2)));

        // Same listings: the quote is stored again but nothing changed.
        let summary = h.pipeline.refresh_marketplace().await.unwrap();
        assert!(summary.changes.is_empty());
        assert_eq!(h.listings.request_count(), 2);
        assert_eq!(h.store.quote_count(), 2);
        assert_eq!(h.store.samples().len(), 1);

        let latest = h.pipeline.latest_marketplace_quote().await.unwrap().unwrap();
        assert_eq!(latest.median_price, Some(dec!(37.00)));
        assert_eq!(h.pipeline.marketplace_history(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_marketplace_without_listings_is_not_an_error() {
        let h = harness();
        h.listings.set_prices(&[]);

        let summary = h.pipeline.refresh_marketplace().await.unwrap();
        assert!(summary.changes.is_empty());
        assert!(summary.note.is_some());
        assert_eq!(h.store.quote_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_isolates_failures() {
        let h = harness();
        h.official.fail_page(SourceError::transport("mock://page", "timeout"));
        h.listings.fail(SourceError::transport("mock://p2p", "timeout"));

        // 16:00 UTC is 12:00 local: marketplace and cache refresh are due.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 16, 0, 0).unwrap();
        let report = h.pipeline.run_tick(now).await;

        let tasks: Vec<_> = report.outcomes.iter().map(TaskOutcome::task).collect();
        assert_eq!(tasks, vec![RefreshTask::Marketplace, RefreshTask::CacheRefresh]);
        assert!(!report.outcomes[0].is_success());
        assert!(report.outcomes[1].is_success());
        assert_eq!(h.rate_list.calls(), 1);
    }

    #[tokio::test]
    async fn test_trigger_reports_extraction_failure() {
        let h = harness();
        h.official.fail_page(SourceError::transport("mock://page", "timeout"));

        let outcome = h.pipeline.trigger(RefreshTask::OfficialRate).await;
        assert!(matches!(
            outcome,
            TaskOutcome::Failed { code: "EXTRACTION_FAILED", .. }
        ));
        assert_eq!(h.pipeline.metrics().snapshot().tasks_failed, 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_samples() {
        let h = harness();
        h.notifier.fail.store(true, Ordering::SeqCst);

        let summary = h.pipeline.refresh_official().await.unwrap();
        assert_eq!(summary.changes.len(), 2);
        assert_eq!(h.store.samples().len(), 2);
        assert_eq!(h.pipeline.metrics().snapshot().notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_storage_failure_still_notifies_persisted_changes() {
        let h = harness();
        // USD lookup and insert succeed, the EUR lookup hits the outage.
        h.store.set_offline_after(2);

        let err = h.pipeline.refresh_official().await.unwrap_err();
        assert!(matches!(err, RateFeedError::TransientStorage(_)));
        assert_eq!(h.store.samples().len(), 1);

        let payloads = h.notifier.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].rates.get(&Currency::usd()), Some(&dec!(36.521)));
        assert!(!payloads[0].rates.contains_key(&Currency::eur()));

        h.store.set_offline(false);
        let summary = h.pipeline.refresh_official().await.unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert_eq!(summary.changes[0].currency, Currency::eur());
        assert_eq!(h.notifier.payloads().len(), 2);
    }

    #[tokio::test]
    async fn test_stopped_pipeline_runs_nothing() {
        let h = harness();
        h.pipeline.set_state(PipelineState::Stopped);

        let now = Utc.with_ymd_and_hms(2026, 3, 2, 16, 0, 0).unwrap();
        let report = h.pipeline.run_tick(now).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(h.rate_list.calls(), 0);
    }

    #[tokio::test]
    async fn test_history_rejects_zero_limit() {
        let h = harness();
        let err = h.pipeline.marketplace_history(Some(0)).await.unwrap_err();
        assert!(matches!(err, RateFeedError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_health_reports_store_status() {
        let h = harness();
        assert_eq!(h.pipeline.health().await.database, DatabaseStatus::Connected);

        h.store.set_offline(true);
        let report = h.pipeline.health().await;
        assert_eq!(report.database, DatabaseStatus::Disconnected);
        assert_eq!(report.status, "ok");
    }
}
