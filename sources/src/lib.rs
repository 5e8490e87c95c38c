//! RateFeed Sources
//!
//! Extractors for the upstream rate origins.
//!
//! # Features
//!
//! - Official-rate page scraping behind a pluggable extraction strategy,
//!   with a JSON fallback API and a short-lived in-process cache
//! - Marketplace listing sampling with average/median statistics
//! - Rate-list origin feeding the tiered cache
//!
//! # Example
//!
//! ```rust,ignore
//! use ratefeed_sources::{HttpClient, HttpOfficialOrigin, OfficialRateExtractor};
//!
//! let http = HttpClient::new(std::time::Duration::from_secs(10))?;
//! let origin = HttpOfficialOrigin::new(http, "https://www.bcv.org.ve/", fallback_url);
//! let extractor = OfficialRateExtractor::new(std::sync::Arc::new(origin));
//!
//! let rates = extractor.scrape(false).await?;
//! ```

pub mod error;
pub mod extract;
pub mod feed;
pub mod http;
pub mod marketplace;
pub mod official;
pub mod stats;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::{SourceError, SourceResult};
pub use extract::{parse_local_decimal, ExtractedRates, ExtractionStrategy, PatternExtraction};
pub use feed::{HttpRateListOrigin, Origin};
pub use http::HttpClient;
pub use marketplace::{
    HttpListingOrigin, ListingOrigin, ListingRequest, ListingResponse, MarketplaceSampler,
    SampleOutcome,
};
pub use official::{
    FallbackQuote, HttpOfficialOrigin, OfficialOrigin, OfficialRateExtractor, OfficialRates,
    Provenance,
};
pub use stats::PriceStats;
