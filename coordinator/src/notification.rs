//! Change notification seam.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratefeed_common::{Currency, Result, Source};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::change_detector::RateChange;

/// What subscribers receive after a refresh detected changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangedRatesPayload {
    pub source: Source,
    /// Latest persisted value of every currency of `source`.
    pub rates: BTreeMap<Currency, Decimal>,
    /// Signed delta per currency code, for keys that had a previous value.
    pub deltas: BTreeMap<String, Decimal>,
    pub generated_at: DateTime<Utc>,
}

impl ChangedRatesPayload {
    pub fn new(
        source: Source,
        rates: BTreeMap<Currency, Decimal>,
        changes: &[RateChange],
    ) -> Self {
        let deltas = changes
            .iter()
            .filter_map(|c| c.delta().map(|d| (c.currency.code().to_string(), d)))
            .collect();

        Self {
            source,
            rates,
            deltas,
            generated_at: Utc::now(),
        }
    }
}

/// Delivers change payloads. Delivery is at-most-once.
#[async_trait]
pub trait NotificationTrigger: Send + Sync {
    async fn notify(&self, payload: &ChangedRatesPayload) -> Result<()>;
}

/// Emits each payload as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationTrigger for LogNotifier {
    async fn notify(&self, payload: &ChangedRatesPayload) -> Result<()> {
        let body = serde_json::to_string(payload)?;
        info!(source = %payload.source, payload = %body, "Rates changed");
        Ok(())
    }
}

/// Records payloads for assertions.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub payloads: parking_lot::Mutex<Vec<ChangedRatesPayload>>,
    pub fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn payloads(&self) -> Vec<ChangedRatesPayload> {
        self.payloads.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl NotificationTrigger for RecordingNotifier {
    async fn notify(&self, payload: &ChangedRatesPayload) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ratefeed_common::RateFeedError::Transport(
                "subscriber unreachable".to_string(),
            ));
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payload_deltas_skip_first_observations() {
        let changes = vec![
            RateChange {
                source: Source::Official,
                currency: Currency::usd(),
                previous: Some(dec!(36.0)),
                current: dec!(36.5),
            },
            RateChange {
                source: Source::Official,
                currency: Currency::eur(),
                previous: None,
                current: dec!(39.8),
            },
        ];
        let mut rates = BTreeMap::new();
        rates.insert(Currency::usd(), dec!(36.5));
        rates.insert(Currency::eur(), dec!(39.8));

        let payload = ChangedRatesPayload::new(Source::Official, rates, &changes);
        assert_eq!(payload.deltas.len(), 1);
        assert_eq!(payload.deltas.get("USD"), Some(&dec!(0.5)));

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["source"], "official");
        assert_eq!(json["rates"]["EUR"], "39.8");
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_payload() {
        let payload = ChangedRatesPayload::new(Source::Marketplace, BTreeMap::new(), &[]);
        assert!(LogNotifier.notify(&payload).await.is_ok());
    }
}
