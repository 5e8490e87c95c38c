//! Origins consulted by the tiered cache.

use async_trait::async_trait;
use ratefeed_common::ExchangeRate;

use crate::error::SourceResult;
use crate::http::HttpClient;

/// Default aggregated rate-list endpoint.
pub const DEFAULT_RATE_LIST_URL: &str = "https://ve.dolarapi.com/v1/dolares";

/// An authoritative source of `T`, consulted when no cache tier can answer.
#[async_trait]
pub trait Origin<T>: Send + Sync {
    /// Origin name, for logs.
    fn name(&self) -> &str;

    async fn fetch(&self) -> SourceResult<T>;
}

/// The aggregated rate list, fetched over HTTP.
pub struct HttpRateListOrigin {
    http: HttpClient,
    url: String,
}

impl HttpRateListOrigin {
    pub fn new(http: HttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Origin<Vec<ExchangeRate>> for HttpRateListOrigin {
    fn name(&self) -> &str {
        "rate-list"
    }

    async fn fetch(&self) -> SourceResult<Vec<ExchangeRate>> {
        self.http.get_json(&self.url).await
    }
}
