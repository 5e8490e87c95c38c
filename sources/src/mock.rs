//! In-memory origins for tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{SourceError, SourceResult};
use crate::feed::Origin;
use crate::marketplace::{Advert, Listing, ListingOrigin, ListingRequest, ListingResponse, SUCCESS_CODE};
use crate::official::{FallbackQuote, OfficialOrigin};

fn unset(what: &str) -> SourceError {
    SourceError::transport(format!("mock://{}", what), "no response configured")
}

/// Mock official-rate origin.
pub struct MockOfficialOrigin {
    page: Mutex<SourceResult<String>>,
    fallback: Mutex<SourceResult<FallbackQuote>>,
    page_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
}

impl MockOfficialOrigin {
    /// Create an origin whose page and fallback both fail until configured.
    pub fn new() -> Self {
        Self {
            page: Mutex::new(Err(unset("page"))),
            fallback: Mutex::new(Err(unset("fallback"))),
            page_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_page(&self, html: impl Into<String>) {
        *self.page.lock() = Ok(html.into());
    }

    pub fn fail_page(&self, error: SourceError) {
        *self.page.lock() = Err(error);
    }

    pub fn set_fallback(&self, quote: FallbackQuote) {
        *self.fallback.lock() = Ok(quote);
    }

    pub fn fail_fallback(&self, error: SourceError) {
        *self.fallback.lock() = Err(error);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockOfficialOrigin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfficialOrigin for MockOfficialOrigin {
    async fn fetch_page(&self) -> SourceResult<String> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.page.lock().clone()
    }

    async fn fetch_fallback(&self) -> SourceResult<FallbackQuote> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        self.fallback.lock().clone()
    }
}

/// Mock listing API.
pub struct MockListingOrigin {
    response: Mutex<SourceResult<ListingResponse>>,
    requests: Mutex<Vec<ListingRequest>>,
}

impl MockListingOrigin {
    /// A successful reply carrying one listing per price, in order.
    pub fn with_prices(prices: &[&str]) -> Self {
        let data = prices
            .iter()
            .enumerate()
            .map(|(i, price)| Listing {
                adv: Advert {
                    price: price.to_string(),
                    adv_no: Some(format!("adv-{}", i)),
                    surplus_amount: None,
                },
            })
            .collect::<Vec<_>>();

        Self {
            response: Mutex::new(Ok(ListingResponse {
                code: SUCCESS_CODE.to_string(),
                message: None,
                total: data.len() as u64,
                data: Some(data),
                success: true,
            })),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_prices(&self, prices: &[&str]) {
        let fresh = Self::with_prices(prices);
        *self.response.lock() = fresh.response.into_inner();
    }

    pub fn set_code(&self, code: &str) {
        if let Ok(response) = self.response.lock().as_mut() {
            response.code = code.to_string();
            response.success = false;
        }
    }

    pub fn fail(&self, error: SourceError) {
        *self.response.lock() = Err(error);
    }

    pub fn last_request(&self) -> Option<ListingRequest> {
        self.requests.lock().last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ListingOrigin for MockListingOrigin {
    async fn search(&self, request: &ListingRequest) -> SourceResult<ListingResponse> {
        self.requests.lock().push(request.clone());
        self.response.lock().clone()
    }
}

/// Mock origin for the tiered cache.
pub struct MockOrigin<T> {
    value: Mutex<SourceResult<T>>,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync> MockOrigin<T> {
    pub fn returning(value: T) -> Self {
        Self {
            value: Mutex::new(Ok(value)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            value: Mutex::new(Err(unset("origin"))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = Ok(value);
    }

    pub fn fail(&self, error: SourceError) {
        *self.value.lock() = Err(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> Origin<T> for MockOrigin<T> {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self) -> SourceResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.value.lock().clone()
    }
}
