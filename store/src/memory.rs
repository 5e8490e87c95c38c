//! In-memory store, for tests and single-process deployments.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use ratefeed_common::{Currency, MarketplaceQuote, RateFeedError, RateSample, Result, Source};
use rust_decimal::Decimal;

use crate::store::{CachedBlob, CurrentRates, PersistentStore, RateKey};

/// Volatile implementation of [`PersistentStore`].
///
/// Can be switched offline to simulate a storage outage; every call made
/// while offline fails with `TransientStorage`.
#[derive(Default)]
pub struct MemoryStore {
    blob: RwLock<Option<CachedBlob>>,
    quotes: RwLock<Vec<MarketplaceQuote>>,
    samples: RwLock<Vec<RateSample>>,
    latest: DashMap<RateKey, RateSample>,
    offline: AtomicBool,
    offline_after: Mutex<Option<u64>>,
    operations: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage (or recover from one).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Go offline once `calls` more calls have succeeded.
    pub fn set_offline_after(&self, calls: u64) {
        *self.offline_after.lock() = Some(calls);
    }

    /// Number of store calls made so far, failed ones included.
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::SeqCst)
    }

    /// All samples appended so far, in insertion order.
    pub fn samples(&self) -> Vec<RateSample> {
        self.samples.read().clone()
    }

    pub fn quote_count(&self) -> usize {
        self.quotes.read().len()
    }

    fn begin(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        {
            let mut remaining = self.offline_after.lock();
            match remaining.as_mut() {
                Some(0) => {
                    self.offline.store(true, Ordering::SeqCst);
                    *remaining = None;
                }
                Some(n) => *n -= 1,
                None => {}
            }
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RateFeedError::TransientStorage(
                "memory store is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn pair_quotes(&self, fiat: &Currency, asset: &Currency) -> Vec<MarketplaceQuote> {
        let mut quotes: Vec<MarketplaceQuote> = self
            .quotes
            .read()
            .iter()
            .filter(|q| &q.fiat == fiat && &q.asset == asset)
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps; reverse for newest first.
        quotes.sort_by_key(|q| q.observed_at);
        quotes.reverse();
        quotes
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load_cached_blob(&self) -> Result<Option<CachedBlob>> {
        self.begin()?;
        Ok(self.blob.read().clone())
    }

    async fn upsert_cached_blob(&self, blob: &CachedBlob) -> Result<()> {
        self.begin()?;
        *self.blob.write() = Some(blob.clone());
        Ok(())
    }

    async fn append_marketplace_quote(&self, quote: &MarketplaceQuote) -> Result<()> {
        self.begin()?;
        self.quotes.write().push(quote.clone());
        Ok(())
    }

    async fn latest_marketplace_quote(
        &self,
        fiat: &Currency,
        asset: &Currency,
    ) -> Result<Option<MarketplaceQuote>> {
        self.begin()?;
        Ok(self.pair_quotes(fiat, asset).into_iter().next())
    }

    async fn marketplace_history(
        &self,
        fiat: &Currency,
        asset: &Currency,
        limit: u32,
    ) -> Result<Vec<MarketplaceQuote>> {
        self.begin()?;
        let mut quotes = self.pair_quotes(fiat, asset);
        quotes.truncate(limit as usize);
        Ok(quotes)
    }

    async fn append_rate_sample(&self, sample: &RateSample) -> Result<()> {
        self.begin()?;
        self.samples.write().push(sample.clone());

        let key = RateKey::new(sample.source, sample.currency.clone());
        let newer = self
            .latest
            .get(&key)
            .map(|existing| sample.observed_at >= existing.observed_at)
            .unwrap_or(true);
        if newer {
            self.latest.insert(key, sample.clone());
        }
        Ok(())
    }

    async fn last_known_value(
        &self,
        source: Source,
        currency: &Currency,
    ) -> Result<Option<Decimal>> {
        self.begin()?;
        Ok(self
            .latest
            .get(&RateKey::new(source, currency.clone()))
            .map(|s| s.value))
    }

    async fn current_rates(&self) -> Result<CurrentRates> {
        self.begin()?;
        let mut rates = CurrentRates::new();
        for entry in self.latest.iter() {
            rates.insert(entry.key().source, entry.key().currency.clone(), entry.value().value);
        }
        Ok(rates)
    }

    async fn ping(&self) -> Result<()> {
        self.begin()
    }
}
