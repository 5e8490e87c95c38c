//! Official-rate extraction with fallback and a short-lived memory cache.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use ratefeed_common::{constants, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{SourceError, SourceResult};
use crate::extract::{ExtractionStrategy, PatternExtraction};
use crate::http::HttpClient;

/// Default publication page.
pub const DEFAULT_OFFICIAL_URL: &str = "https://www.bcv.org.ve/";

/// Default fallback API (USD only).
pub const DEFAULT_FALLBACK_URL: &str = "https://ve.dolarapi.com/v1/dolares/oficial";

/// Reply of the fallback API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackQuote {
    #[serde(default)]
    pub promedio: Option<Decimal>,
    #[serde(default)]
    pub venta: Option<Decimal>,
    #[serde(default)]
    pub compra: Option<Decimal>,
}

impl FallbackQuote {
    /// First non-zero of promedio, venta, compra; zero when none is usable.
    pub fn usd(&self) -> Decimal {
        [self.promedio, self.venta, self.compra]
            .into_iter()
            .flatten()
            .find(|v| !v.is_zero())
            .unwrap_or(Decimal::ZERO)
    }
}

/// How a pair of official rates was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Served from the in-process cache, no I/O.
    Cached,
    /// Parsed from the publication page.
    Primary,
    /// Last-resort fallback API; EUR is unavailable.
    Fallback,
}

/// Official USD and EUR rates. A zero value means "unavailable".
#[derive(Debug, Clone, PartialEq)]
pub struct OfficialRates {
    pub usd: Decimal,
    pub eur: Decimal,
    pub provenance: Provenance,
    pub evidence: serde_json::Value,
}

impl OfficialRates {
    /// Rate for a currency, or `None` when it is unavailable.
    pub fn get(&self, currency: &Currency) -> Option<Decimal> {
        let value = match currency.code() {
            "USD" => self.usd,
            "EUR" => self.eur,
            _ => return None,
        };
        (value > Decimal::ZERO).then_some(value)
    }

    pub fn eur_available(&self) -> bool {
        self.eur > Decimal::ZERO
    }
}

/// Transport seam for the official-rate origins.
#[async_trait]
pub trait OfficialOrigin: Send + Sync {
    /// Fetch the publication page body.
    async fn fetch_page(&self) -> SourceResult<String>;

    /// Fetch the fallback API reply.
    async fn fetch_fallback(&self) -> SourceResult<FallbackQuote>;
}

/// HTTP implementation of [`OfficialOrigin`].
pub struct HttpOfficialOrigin {
    http: HttpClient,
    page_url: String,
    fallback_url: String,
}

impl HttpOfficialOrigin {
    pub fn new(
        http: HttpClient,
        page_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            page_url: page_url.into(),
            fallback_url: fallback_url.into(),
        }
    }
}

#[async_trait]
impl OfficialOrigin for HttpOfficialOrigin {
    async fn fetch_page(&self) -> SourceResult<String> {
        self.http.get_html(&self.page_url).await
    }

    async fn fetch_fallback(&self) -> SourceResult<FallbackQuote> {
        self.http.get_json(&self.fallback_url).await
    }
}

#[derive(Debug, Clone)]
struct CachedPair {
    rates: OfficialRates,
    updated_at: DateTime<Utc>,
}

/// Scrapes the official rates, falling back to a secondary API.
///
/// Owns the process-scoped cache of the last successful page parse. The cache
/// starts empty and lives as long as the extractor.
pub struct OfficialRateExtractor {
    origin: Arc<dyn OfficialOrigin>,
    strategy: Arc<dyn ExtractionStrategy>,
    ttl: Duration,
    cache: RwLock<Option<CachedPair>>,
}

impl OfficialRateExtractor {
    /// Create an extractor using pattern extraction and the default TTL.
    pub fn new(origin: Arc<dyn OfficialOrigin>) -> Self {
        Self {
            origin,
            strategy: Arc::new(PatternExtraction),
            ttl: constants::official_rate_ttl(),
            cache: RwLock::new(None),
        }
    }

    /// Replace the extraction strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the cache TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get the official rates.
    ///
    /// Unless `force_refresh` is set, a cached pair younger than the TTL is
    /// returned without I/O. Only a successful page parse refreshes the cache.
    #[instrument(skip(self))]
    pub async fn scrape(&self, force_refresh: bool) -> SourceResult<OfficialRates> {
        if !force_refresh {
            if let Some(rates) = self.fresh_cached(Utc::now()) {
                debug!("Returning cached official rates");
                return Ok(rates);
            }
        }

        let primary_error = match self.scrape_primary().await {
            Ok(rates) => {
                *self.cache.write() = Some(CachedPair {
                    rates: rates.clone(),
                    updated_at: Utc::now(),
                });
                info!(usd = %rates.usd, eur = %rates.eur, "Official rates scraped");
                return Ok(rates);
            }
            Err(e) => e,
        };

        warn!(error = %primary_error, "Official page scraping failed, trying fallback");

        match self.scrape_fallback().await {
            Ok(rates) => {
                info!(usd = %rates.usd, "Using fallback official rate");
                Ok(rates)
            }
            Err(fallback_error) => {
                error!(error = %fallback_error, "Fallback also failed");
                Err(match primary_error {
                    SourceError::Extraction(_) => primary_error,
                    other => SourceError::Extraction(other.to_string()),
                })
            }
        }
    }

    /// Last rates parsed from the page, regardless of age.
    pub fn cached_rates(&self) -> Option<OfficialRates> {
        self.cache.read().as_ref().map(|c| c.rates.clone())
    }

    /// When the cached pair was stored.
    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.cache.read().as_ref().map(|c| c.updated_at)
    }

    pub fn clear_cache(&self) {
        *self.cache.write() = None;
    }

    fn fresh_cached(&self, now: DateTime<Utc>) -> Option<OfficialRates> {
        let guard = self.cache.read();
        let cached = guard.as_ref()?;
        if now.signed_duration_since(cached.updated_at) < self.ttl {
            let mut rates = cached.rates.clone();
            rates.provenance = Provenance::Cached;
            Some(rates)
        } else {
            None
        }
    }

    async fn scrape_primary(&self) -> SourceResult<OfficialRates> {
        let html = self.origin.fetch_page().await?;
        let extracted = self.strategy.extract(&html);

        if !extracted.is_complete() {
            return Err(SourceError::Extraction(format!(
                "Failed to parse rates - USD: {}, EUR: {}",
                extracted.usd, extracted.eur
            )));
        }

        Ok(OfficialRates {
            usd: extracted.usd,
            eur: extracted.eur,
            provenance: Provenance::Primary,
            evidence: extracted.evidence(self.strategy.name()),
        })
    }

    async fn scrape_fallback(&self) -> SourceResult<OfficialRates> {
        let quote = self.origin.fetch_fallback().await?;
        let usd = quote.usd();

        if usd <= Decimal::ZERO {
            return Err(SourceError::Extraction(
                "Fallback reply carried no USD rate".to_string(),
            ));
        }

        Ok(OfficialRates {
            usd,
            eur: Decimal::ZERO,
            provenance: Provenance::Fallback,
            evidence: serde_json::to_value(&quote).unwrap_or_default(),
        })
    }
}
