//! Exact-value change detection against the last persisted sample.

use std::sync::Arc;

use ratefeed_common::{Currency, Result, Source};
use ratefeed_store::PersistentStore;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

/// A value that differs from the last one persisted for its key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateChange {
    pub source: Source,
    pub currency: Currency,
    /// `None` for the first observation of the key.
    pub previous: Option<Decimal>,
    pub current: Decimal,
}

impl RateChange {
    /// Signed difference to the previous value.
    pub fn delta(&self) -> Option<Decimal> {
        self.previous.map(|previous| self.current - previous)
    }
}

/// Compares candidate values with the latest persisted value per key.
///
/// Equality is exact decimal equality. Any difference, however small, is a
/// change; `50.0` and `50.00` are the same value.
#[derive(Clone)]
pub struct ChangeDetector {
    store: Arc<dyn PersistentStore>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    /// The change `value` represents, if any.
    pub async fn evaluate(
        &self,
        source: Source,
        currency: &Currency,
        value: Decimal,
    ) -> Result<Option<RateChange>> {
        let previous = self.store.last_known_value(source, currency).await?;

        if previous == Some(value) {
            debug!(source = %source, currency = %currency, value = %value, "Rate unchanged");
            return Ok(None);
        }

        Ok(Some(RateChange {
            source,
            currency: currency.clone(),
            previous,
            current: value,
        }))
    }

    /// True iff no value exists for the key or it differs from `value`.
    pub async fn has_changed(
        &self,
        source: Source,
        currency: &Currency,
        value: Decimal,
    ) -> Result<bool> {
        Ok(self.evaluate(source, currency, value).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratefeed_common::{RateFeedError, RateSample, RateType};
    use ratefeed_store::MemoryStore;
    use rust_decimal_macros::dec;

    async fn detector_with(value: Option<Decimal>) -> (ChangeDetector, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        if let Some(value) = value {
            let sample = RateSample::new(Source::Official, Currency::usd(), RateType::Official, value);
            store.append_rate_sample(&sample).await.unwrap();
        }
        (ChangeDetector::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_first_observation_is_a_change() {
        let (detector, _) = detector_with(None).await;

        let change = detector
            .evaluate(Source::Official, &Currency::usd(), dec!(36.5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.previous, None);
        assert_eq!(change.delta(), None);
    }

    #[tokio::test]
    async fn test_equal_value_is_not_a_change() {
        let (detector, _) = detector_with(Some(dec!(50.0))).await;

        assert!(!detector
            .has_changed(Source::Official, &Currency::usd(), dec!(50.00))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_tiny_difference_is_a_change() {
        let (detector, _) = detector_with(Some(dec!(50.0))).await;

        let change = detector
            .evaluate(Source::Official, &Currency::usd(), dec!(50.0000001))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.delta(), Some(dec!(0.0000001)));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let (detector, _) = detector_with(Some(dec!(50.0))).await;

        assert!(detector
            .has_changed(Source::Marketplace, &Currency::usd(), dec!(50.0))
            .await
            .unwrap());
        assert!(detector
            .has_changed(Source::Official, &Currency::eur(), dec!(50.0))
            .await
            .unwrap());
    }

    proptest::proptest! {
        #[test]
        fn prop_change_iff_values_differ(prev in -1_000_000i64..1_000_000, next in -1_000_000i64..1_000_000, scale in 0u32..8) {
            let prev = Decimal::new(prev, scale);
            let next = Decimal::new(next, scale);

            let changed = tokio_test::block_on(async {
                let (detector, _) = detector_with(Some(prev)).await;
                detector.has_changed(Source::Official, &Currency::usd(), next).await.unwrap()
            });
            proptest::prop_assert_eq!(changed, prev != next);
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (detector, store) = detector_with(Some(dec!(50.0))).await;
        store.set_offline(true);

        let err = detector
            .has_changed(Source::Official, &Currency::usd(), dec!(51.0))
            .await
            .unwrap_err();
        assert!(matches!(err, RateFeedError::TransientStorage(_)));
    }
}
