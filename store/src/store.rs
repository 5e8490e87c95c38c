//! Persistent store interface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratefeed_common::{Currency, MarketplaceQuote, RateSample, Result, Source};
use rust_decimal::Decimal;

/// The singleton cached rate list: a JSON document and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub data: String,
    pub cached_at: DateTime<Utc>,
}

/// Key of the latest-value index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateKey {
    pub source: Source,
    pub currency: Currency,
}

impl RateKey {
    pub fn new(source: Source, currency: Currency) -> Self {
        Self { source, currency }
    }
}

/// Latest persisted value per (source, currency).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentRates(BTreeMap<RateKey, Decimal>);

impl CurrentRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: Source, currency: Currency, value: Decimal) {
        self.0.insert(RateKey::new(source, currency), value);
    }

    pub fn get(&self, source: Source, currency: &Currency) -> Option<Decimal> {
        self.0.get(&RateKey::new(source, currency.clone())).copied()
    }

    /// Currency → value map for one source.
    pub fn for_source(&self, source: Source) -> BTreeMap<Currency, Decimal> {
        self.0
            .iter()
            .filter(|(key, _)| key.source == source)
            .map(|(key, value)| (key.currency.clone(), *value))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RateKey, &Decimal)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Durable store the pipeline reads from and upserts into.
///
/// Every method may fail with `RateFeedError::TransientStorage`.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load the singleton cached rate list, if any.
    async fn load_cached_blob(&self) -> Result<Option<CachedBlob>>;

    /// Replace the singleton cached rate list.
    async fn upsert_cached_blob(&self, blob: &CachedBlob) -> Result<()>;

    /// Append one marketplace sample.
    async fn append_marketplace_quote(&self, quote: &MarketplaceQuote) -> Result<()>;

    /// Most recent marketplace sample for a pair.
    async fn latest_marketplace_quote(
        &self,
        fiat: &Currency,
        asset: &Currency,
    ) -> Result<Option<MarketplaceQuote>>;

    /// Marketplace samples for a pair, newest first.
    async fn marketplace_history(
        &self,
        fiat: &Currency,
        asset: &Currency,
        limit: u32,
    ) -> Result<Vec<MarketplaceQuote>>;

    /// Append one rate sample to the history.
    async fn append_rate_sample(&self, sample: &RateSample) -> Result<()>;

    /// Most recently persisted value for (source, currency).
    async fn last_known_value(&self, source: Source, currency: &Currency)
        -> Result<Option<Decimal>>;

    /// Latest value of every (source, currency) pair.
    async fn current_rates(&self) -> Result<CurrentRates>;

    /// Trivial round trip, used by the health probe.
    async fn ping(&self) -> Result<()>;
}
