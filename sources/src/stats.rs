//! Summary statistics over sampled listing prices.

use rust_decimal::Decimal;

/// Average and median of a price sample; both absent iff the sample is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriceStats {
    pub average: Option<Decimal>,
    pub median: Option<Decimal>,
}

impl PriceStats {
    /// Compute statistics without reordering `prices`.
    pub fn from_prices(prices: &[Decimal]) -> Self {
        if prices.is_empty() {
            return Self::default();
        }

        let count = Decimal::from(prices.len());
        let sum: Decimal = prices.iter().copied().sum();

        let mut sorted = prices.to_vec();
        sorted.sort();
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / Decimal::TWO
        } else {
            sorted[mid]
        };

        Self {
            average: Some(sum / count),
            median: Some(median),
        }
    }
}
