//! Three-tier read-through cache with stale fallback.
//!
//! Reads consult, in order:
//!
//! 1. the in-process entry, if unexpired (no I/O at all)
//! 2. the persistent row, if younger than the TTL
//! 3. the origin, whose result is written back to both tiers
//! 4. the in-process entry regardless of age
//! 5. the persistent row regardless of age
//!
//! Tiers 4 and 5 return the data with a staleness warning. When every tier
//! is exhausted the read fails with `Unavailable`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use ratefeed_common::{age_at, is_expired_at, RateFeedError, Result};
use ratefeed_sources::Origin;
use ratefeed_store::{CachedBlob, PersistentStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::Metrics;

/// Warning attached to every stale read.
pub const STALE_WARNING: &str = "Using stale data - API unavailable";

/// Which tier answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheTier {
    Memory,
    Persistent,
    Origin,
    MemoryStale,
    PersistentStale,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Memory => "memory",
            CacheTier::Persistent => "persistent",
            CacheTier::Origin => "origin",
            CacheTier::MemoryStale => "memory-stale",
            CacheTier::PersistentStale => "persistent-stale",
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, CacheTier::MemoryStale | CacheTier::PersistentStale)
    }
}

/// The in-process tier.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        !is_expired_at(self.expires_at, now)
    }
}

/// Result of a read.
#[derive(Debug, Clone, Serialize)]
pub struct CacheRead<T> {
    pub data: T,
    pub source: CacheTier,
    pub cached_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl<T> CacheRead<T> {
    fn fresh(data: T, source: CacheTier, cached_at: DateTime<Utc>) -> Self {
        Self {
            data,
            source,
            cached_at,
            warning: None,
        }
    }

    fn stale(data: T, source: CacheTier, cached_at: DateTime<Utc>) -> Self {
        Self {
            data,
            source,
            cached_at,
            warning: Some(STALE_WARNING.to_string()),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.source.is_stale()
    }
}

/// Read-through cache of one origin value, backed by the store's singleton row.
pub struct TieredRateCache<T> {
    origin: Arc<dyn Origin<T>>,
    store: Arc<dyn PersistentStore>,
    ttl: Duration,
    memory: RwLock<Option<CacheEntry<T>>>,
    metrics: Arc<Metrics>,
}

impl<T> TieredRateCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(origin: Arc<dyn Origin<T>>, store: Arc<dyn PersistentStore>, ttl: Duration) -> Self {
        Self {
            origin,
            store,
            ttl,
            memory: RwLock::new(None),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Report tier hits into shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The in-process entry, fresh or not.
    pub fn memory_entry(&self) -> Option<CacheEntry<T>> {
        self.memory.read().clone()
    }

    /// Read at the current time.
    pub async fn read(&self) -> Result<CacheRead<T>> {
        self.read_at(Utc::now()).await
    }

    /// Read as of `now`.
    #[instrument(skip(self), fields(origin = self.origin.name()))]
    pub async fn read_at(&self, now: DateTime<Utc>) -> Result<CacheRead<T>> {
        if let Some(entry) = self.memory.read().as_ref().filter(|e| e.is_fresh_at(now)) {
            debug!("Served from memory");
            return Ok(self.hit(CacheRead::fresh(
                entry.value.clone(),
                CacheTier::Memory,
                entry.cached_at,
            )));
        }

        let persisted = self.load_persisted().await;

        if let Some((value, cached_at)) = &persisted {
            if age_at(*cached_at, now) < self.ttl {
                self.remember(value.clone(), *cached_at);
                debug!(cached_at = %cached_at, "Served from store");
                return Ok(self.hit(CacheRead::fresh(
                    value.clone(),
                    CacheTier::Persistent,
                    *cached_at,
                )));
            }
        }

        let origin_error = match self.fetch_origin(now).await {
            Ok(value) => return Ok(self.hit(CacheRead::fresh(value, CacheTier::Origin, now))),
            Err(e) => e,
        };

        if let Some(entry) = self.memory.read().clone() {
            warn!(cached_at = %entry.cached_at, error = %origin_error, "Serving stale memory entry");
            return Ok(self.hit(CacheRead::stale(
                entry.value,
                CacheTier::MemoryStale,
                entry.cached_at,
            )));
        }

        if let Some((value, cached_at)) = persisted {
            warn!(cached_at = %cached_at, error = %origin_error, "Serving stale stored entry");
            return Ok(self.hit(CacheRead::stale(
                value,
                CacheTier::PersistentStale,
                cached_at,
            )));
        }

        error!(error = %origin_error, "Every cache tier exhausted");
        self.metrics.cache_miss();
        Err(RateFeedError::Unavailable(format!(
            "{} unreachable and nothing cached: {}",
            self.origin.name(),
            origin_error
        )))
    }

    /// Write path: fetch from the origin into both tiers.
    ///
    /// Failures are logged and swallowed; returns whether the tiers were updated.
    pub async fn refresh(&self) -> bool {
        self.refresh_at(Utc::now()).await
    }

    pub async fn refresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.fetch_origin(now).await {
            Ok(_) => {
                info!(origin = self.origin.name(), "Cache refreshed");
                true
            }
            Err(e) => {
                warn!(origin = self.origin.name(), error = %e, "Cache refresh failed, keeping cached data");
                false
            }
        }
    }

    fn hit(&self, read: CacheRead<T>) -> CacheRead<T> {
        self.metrics.cache_hit(read.source);
        read
    }

    fn remember(&self, value: T, cached_at: DateTime<Utc>) {
        *self.memory.write() = Some(CacheEntry {
            value,
            cached_at,
            expires_at: cached_at + self.ttl,
        });
    }

    /// The persisted row, decoded. Store and decode failures count as a miss.
    async fn load_persisted(&self) -> Option<(T, DateTime<Utc>)> {
        let blob = match self.store.load_cached_blob().await {
            Ok(blob) => blob?,
            Err(e) => {
                warn!(error = %e, "Cached row unreadable, skipping store tier");
                return None;
            }
        };

        match serde_json::from_str(&blob.data) {
            Ok(value) => Some((value, blob.cached_at)),
            Err(e) => {
                warn!(error = %e, "Cached row undecodable, skipping store tier");
                None
            }
        }
    }

    /// Fetch from the origin, upsert the row and replace the in-process entry.
    ///
    /// A failed upsert is logged; the fetched value is still cached in memory.
    async fn fetch_origin(&self, now: DateTime<Utc>) -> Result<T> {
        let value = self.origin.fetch().await?;

        match serde_json::to_string(&value) {
            Ok(data) => {
                let blob = CachedBlob {
                    data,
                    cached_at: now,
                };
                if let Err(e) = self.store.upsert_cached_blob(&blob).await {
                    error!(error = %e, "Failed to persist cached row");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode cached row"),
        }

        self.remember(value.clone(), now);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratefeed_common::ExchangeRate;
    use ratefeed_sources::mock::MockOrigin;
    use ratefeed_sources::SourceError;
    use ratefeed_store::MemoryStore;
    use rust_decimal_macros::dec;

    fn rates(promedio: rust_decimal::Decimal) -> Vec<ExchangeRate> {
        vec![ExchangeRate {
            fuente: "oficial".into(),
            nombre: "Oficial".into(),
            compra: None,
            venta: None,
            promedio: Some(promedio),
            fecha_actualizacion: "2026-03-02T13:00:00.000Z".into(),
        }]
    }

    fn ttl() -> Duration {
        Duration::seconds(300)
    }

    struct Harness {
        origin: Arc<MockOrigin<Vec<ExchangeRate>>>,
        store: Arc<MemoryStore>,
        cache: TieredRateCache<Vec<ExchangeRate>>,
    }

    fn harness(origin: MockOrigin<Vec<ExchangeRate>>) -> Harness {
        let origin = Arc::new(origin);
        let store = Arc::new(MemoryStore::new());
        let cache = TieredRateCache::new(origin.clone(), store.clone(), ttl());
        Harness {
            origin,
            store,
            cache,
        }
    }

    async fn seed_store(store: &MemoryStore, value: &[ExchangeRate], cached_at: DateTime<Utc>) {
        let blob = CachedBlob {
            data: serde_json::to_string(value).unwrap(),
            cached_at,
        };
        store.upsert_cached_blob(&blob).await.unwrap();
    }

    fn origin_down() -> SourceError {
        SourceError::transport("mock://rates", "connection refused")
    }

    #[tokio::test]
    async fn test_cold_read_goes_to_origin_and_writes_back() {
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        let now = Utc::now();

        let read = h.cache.read_at(now).await.unwrap();
        assert_eq!(read.source, CacheTier::Origin);
        assert_eq!(read.cached_at, now);
        assert!(read.warning.is_none());

        let blob = h.store.load_cached_blob().await.unwrap().unwrap();
        assert_eq!(blob.cached_at, now);
        let stored: Vec<ExchangeRate> = serde_json::from_str(&blob.data).unwrap();
        assert_eq!(stored, read.data);

        let entry = h.cache.memory_entry().unwrap();
        assert_eq!(entry.expires_at, now + ttl());
    }

    #[tokio::test]
    async fn test_stored_row_keeps_rates_numeric() {
        let h = harness(MockOrigin::returning(rates(dec!(36.42))));
        let read = h.cache.read_at(Utc::now()).await.unwrap();

        let blob = h.store.load_cached_blob().await.unwrap().unwrap();
        assert!(blob.data.contains("\"promedio\":36.42"));
        let stored: serde_json::Value = serde_json::from_str(&blob.data).unwrap();
        assert!(stored[0]["promedio"].is_number());

        let served = serde_json::to_value(&read).unwrap();
        assert!(served["data"][0]["promedio"].is_number());
    }

    #[tokio::test]
    async fn test_fresh_memory_read_does_no_io() {
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        let now = Utc::now();
        h.cache.read_at(now).await.unwrap();

        let store_ops = h.store.operation_count();
        let origin_calls = h.origin.calls();

        let read = h.cache.read_at(now + Duration::seconds(299)).await.unwrap();
        assert_eq!(read.source, CacheTier::Memory);
        assert_eq!(read.cached_at, now);
        assert_eq!(h.store.operation_count(), store_ops);
        assert_eq!(h.origin.calls(), origin_calls);
    }

    #[tokio::test]
    async fn test_fresh_persistent_row_is_served_and_promoted() {
        let h = harness(MockOrigin::returning(rates(dec!(99))));
        let now = Utc::now();
        let cached_at = now - Duration::seconds(60);
        seed_store(&h.store, &rates(dec!(36.5)), cached_at).await;

        let read = h.cache.read_at(now).await.unwrap();
        assert_eq!(read.source, CacheTier::Persistent);
        assert_eq!(read.data, rates(dec!(36.5)));
        assert_eq!(read.cached_at, cached_at);
        assert_eq!(h.origin.calls(), 0);

        let entry = h.cache.memory_entry().unwrap();
        assert_eq!(entry.expires_at, cached_at + ttl());

        let again = h.cache.read_at(now).await.unwrap();
        assert_eq!(again.source, CacheTier::Memory);
    }

    #[tokio::test]
    async fn test_expired_row_goes_to_origin() {
        let h = harness(MockOrigin::returning(rates(dec!(37))));
        let now = Utc::now();
        seed_store(&h.store, &rates(dec!(36.5)), now - Duration::seconds(300)).await;

        let read = h.cache.read_at(now).await.unwrap();
        assert_eq!(read.source, CacheTier::Origin);
        assert_eq!(read.data, rates(dec!(37)));
    }

    #[tokio::test]
    async fn test_memory_stale_when_origin_fails() {
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        let t0 = Utc::now();
        h.cache.read_at(t0).await.unwrap();

        h.origin.fail(origin_down());
        let read = h.cache.read_at(t0 + Duration::seconds(301)).await.unwrap();

        assert_eq!(read.source, CacheTier::MemoryStale);
        assert_eq!(read.data, rates(dec!(36.5)));
        assert_eq!(read.cached_at, t0);
        assert_eq!(read.warning.as_deref(), Some(STALE_WARNING));

        let json = serde_json::to_value(&read).unwrap();
        assert_eq!(json["source"], CacheTier::MemoryStale.as_str());
    }

    #[tokio::test]
    async fn test_persistent_stale_on_cold_process() {
        let h = harness(MockOrigin::failing());
        let now = Utc::now();
        let cached_at = now - Duration::hours(1);
        seed_store(&h.store, &rates(dec!(36.5)), cached_at).await;

        let read = h.cache.read_at(now).await.unwrap();
        assert_eq!(read.source, CacheTier::PersistentStale);
        assert_eq!(read.cached_at, cached_at);
        assert!(read.is_stale());
    }

    #[tokio::test]
    async fn test_exhausted_tiers_are_unavailable() {
        let h = harness(MockOrigin::failing());

        let err = h.cache.read().await.unwrap_err();
        assert!(matches!(err, RateFeedError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_store_outage_does_not_block_origin() {
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        h.store.set_offline(true);

        let read = h.cache.read().await.unwrap();
        assert_eq!(read.source, CacheTier::Origin);
        assert!(h.cache.memory_entry().is_some());
    }

    #[tokio::test]
    async fn test_undecodable_row_is_a_miss() {
        let h = harness(MockOrigin::failing());
        let blob = CachedBlob {
            data: "not json".into(),
            cached_at: Utc::now(),
        };
        h.store.upsert_cached_blob(&blob).await.unwrap();

        let err = h.cache.read().await.unwrap_err();
        assert!(matches!(err, RateFeedError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_refresh_swallows_failure() {
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        let now = Utc::now();
        assert!(h.cache.refresh_at(now).await);

        h.origin.fail(origin_down());
        assert!(!h.cache.refresh_at(now + Duration::minutes(30)).await);

        let entry = h.cache.memory_entry().unwrap();
        assert_eq!(entry.cached_at, now);
        assert_eq!(entry.value, rates(dec!(36.5)));

        let later = now + Duration::hours(1);
        h.origin.set(rates(dec!(37)));
        assert!(h.cache.refresh_at(later).await);
        assert_eq!(h.cache.memory_entry().unwrap().value, rates(dec!(37)));
        assert_eq!(h.store.load_cached_blob().await.unwrap().unwrap().cached_at, later);
    }

    #[tokio::test]
    async fn test_tier_hits_are_counted() {
        let metrics = Arc::new(Metrics::new());
        let h = harness(MockOrigin::returning(rates(dec!(36.5))));
        let cache = h.cache.with_metrics(metrics.clone());
        let now = Utc::now();

        cache.read_at(now).await.unwrap();
        cache.read_at(now).await.unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_origin_hits, 1);
        assert_eq!(snapshot.cache_memory_hits, 1);
    }
}
