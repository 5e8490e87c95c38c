//! Marketplace (P2P) listing sampler.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ratefeed_common::{Currency, MarketplaceQuote, TradeType, MAX_SAMPLE_ROWS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::{SourceError, SourceResult};
use crate::http::HttpClient;
use crate::stats::PriceStats;

/// Default listing search endpoint.
pub const DEFAULT_MARKETPLACE_URL: &str =
    "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search";

/// Application-level success code of the listing API.
pub const SUCCESS_CODE: &str = "000000";

/// Paged listing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    pub fiat: String,
    pub page: u32,
    pub rows: u32,
    pub trade_type: TradeType,
    pub asset: String,
}

/// Listing query reply. Only the fields the sampler reads are modelled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingResponse {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Vec<Listing>>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub adv: Advert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advert {
    pub price: String,
    #[serde(default)]
    pub adv_no: Option<String>,
    #[serde(default)]
    pub surplus_amount: Option<String>,
}

/// Transport seam for the listing API.
#[async_trait]
pub trait ListingOrigin: Send + Sync {
    async fn search(&self, request: &ListingRequest) -> SourceResult<ListingResponse>;
}

/// HTTP implementation of [`ListingOrigin`].
pub struct HttpListingOrigin {
    http: HttpClient,
    url: String,
}

impl HttpListingOrigin {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ListingOrigin for HttpListingOrigin {
    async fn search(&self, request: &ListingRequest) -> SourceResult<ListingResponse> {
        self.http.post_json(&self.url, request).await
    }
}

/// Result of one sampling attempt.
#[derive(Debug, Clone)]
pub enum SampleOutcome {
    /// Listings were found and summarized.
    Quote(MarketplaceQuote),
    /// The API answered but reported failure or returned no listings.
    NotFound(String),
    /// The request parameters were rejected before any I/O.
    InvalidInput(SourceError),
    /// The request failed or the reply could not be decoded.
    TransportFailure(SourceError),
}

impl SampleOutcome {
    pub fn into_quote(self) -> Option<MarketplaceQuote> {
        match self {
            SampleOutcome::Quote(quote) => Some(quote),
            _ => None,
        }
    }
}

/// Samples marketplace listings and reduces them to summary statistics.
pub struct MarketplaceSampler {
    origin: Arc<dyn ListingOrigin>,
}

impl MarketplaceSampler {
    pub fn new(origin: Arc<dyn ListingOrigin>) -> Self {
        Self { origin }
    }

    /// Sample the first page of listings for a pair.
    #[instrument(skip(self, fiat, asset), fields(fiat = %fiat, asset = %asset))]
    pub async fn sample(
        &self,
        fiat: &Currency,
        asset: &Currency,
        trade_type: TradeType,
        rows: u32,
    ) -> SampleOutcome {
        if rows == 0 || rows > MAX_SAMPLE_ROWS {
            return SampleOutcome::InvalidInput(SourceError::Validation {
                field: "rows".to_string(),
                message: format!("must be between 1 and {}, got {}", MAX_SAMPLE_ROWS, rows),
            });
        }

        let request = ListingRequest {
            fiat: fiat.code().to_string(),
            page: 1,
            rows,
            trade_type,
            asset: asset.code().to_string(),
        };

        let response = match self.origin.search(&request).await {
            Ok(response) => response,
            Err(e) => return SampleOutcome::TransportFailure(e),
        };

        let listings = match response.data {
            Some(listings) if response.code == SUCCESS_CODE && !listings.is_empty() => listings,
            _ => {
                return SampleOutcome::NotFound(format!(
                    "code={} message={}",
                    response.code,
                    response.message.unwrap_or_default()
                ))
            }
        };

        let prices = match collect_prices(&listings) {
            Ok(prices) => prices,
            Err(e) => return SampleOutcome::TransportFailure(e),
        };
        let stats = PriceStats::from_prices(&prices);

        info!(
            count = prices.len(),
            average = ?stats.average,
            median = ?stats.median,
            "Sampled marketplace prices"
        );

        SampleOutcome::Quote(MarketplaceQuote {
            fiat: fiat.clone(),
            asset: asset.clone(),
            trade_type,
            prices,
            average_price: stats.average,
            median_price: stats.median,
            observed_at: Utc::now(),
        })
    }

    /// Sample a pair, collapsing every non-quote outcome into `None`.
    ///
    /// Callers that need to tell "no listings" from "bad request" should use
    /// [`MarketplaceSampler::sample`].
    pub async fn get_pair(
        &self,
        fiat: &Currency,
        asset: &Currency,
        trade_type: TradeType,
        rows: u32,
    ) -> Option<MarketplaceQuote> {
        match self.sample(fiat, asset, trade_type, rows).await {
            SampleOutcome::Quote(quote) => Some(quote),
            SampleOutcome::NotFound(reason) => {
                warn!(reason = %reason, "Marketplace returned no listings");
                None
            }
            SampleOutcome::InvalidInput(e) | SampleOutcome::TransportFailure(e) => {
                warn!(error = %e, "Marketplace sampling failed");
                None
            }
        }
    }

    /// USDT bought with VES, full page.
    pub async fn sample_usdt_ves(&self) -> SampleOutcome {
        self.sample(&Currency::ves(), &Currency::usdt(), TradeType::Buy, MAX_SAMPLE_ROWS)
            .await
    }

    pub async fn get_usdt_ves(&self) -> Option<MarketplaceQuote> {
        self.get_pair(&Currency::ves(), &Currency::usdt(), TradeType::Buy, MAX_SAMPLE_ROWS)
            .await
    }
}

fn collect_prices(listings: &[Listing]) -> SourceResult<Vec<Decimal>> {
    listings
        .iter()
        .map(|listing| {
            Decimal::from_str(listing.adv.price.trim()).map_err(|e| {
                SourceError::Decode(format!("price '{}': {}", listing.adv.price, e))
            })
        })
        .collect()
}
