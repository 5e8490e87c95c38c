//! Rate types shared by the extractors, the store and the pipeline.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RateFeedError;

/// Maximum number of marketplace listings sampled per query.
pub const MAX_SAMPLE_ROWS: u32 = 20;

/// Currency or asset code, always upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    pub fn eur() -> Self {
        Self::new("EUR")
    }

    pub fn ves() -> Self {
        Self::new("VES")
    }

    pub fn usdt() -> Self {
        Self::new("USDT")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Where a rate sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Centrally published official rate.
    Official,
    /// Peer-to-peer marketplace listings.
    Marketplace,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Official => "official",
            Source::Marketplace => "marketplace",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = RateFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" => Ok(Source::Official),
            "marketplace" => Ok(Source::Marketplace),
            other => Err(RateFeedError::validation(
                "source",
                format!("unknown source '{}'", other),
            )),
        }
    }
}

/// Kind of rate carried by a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateType {
    Official,
    P2p,
}

impl RateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::Official => "official",
            RateType::P2p => "p2p",
        }
    }
}

impl FromStr for RateType {
    type Err = RateFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "official" => Ok(RateType::Official),
            "p2p" => Ok(RateType::P2p),
            other => Err(RateFeedError::validation(
                "rate_type",
                format!("unknown rate type '{}'", other),
            )),
        }
    }
}

/// Marketplace side being sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "BUY",
            TradeType::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeType {
    type Err = RateFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeType::Buy),
            "SELL" => Ok(TradeType::Sell),
            other => Err(RateFeedError::validation(
                "trade_type",
                format!("unknown trade type '{}'", other),
            )),
        }
    }
}

/// One observed rate, produced per successful extraction cycle.
///
/// Samples are immutable; only their persisted projection outlives the
/// refresh task that created them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSample {
    pub source: Source,
    pub currency: Currency,
    pub rate_type: RateType,
    pub value: Decimal,
    /// Secondary statistic (e.g. the marketplace average next to the median).
    pub aux_value: Option<Decimal>,
    /// Whatever the extractor saw, kept for debugging.
    pub raw_evidence: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

impl RateSample {
    /// Create a sample observed now.
    pub fn new(
        source: Source,
        currency: Currency,
        rate_type: RateType,
        value: Decimal,
    ) -> Self {
        Self {
            source,
            currency,
            rate_type,
            value,
            aux_value: None,
            raw_evidence: serde_json::Value::Null,
            observed_at: Utc::now(),
        }
    }

    pub fn with_aux_value(mut self, aux: Option<Decimal>) -> Self {
        self.aux_value = aux;
        self
    }

    pub fn with_evidence(mut self, evidence: serde_json::Value) -> Self {
        self.raw_evidence = evidence;
        self
    }

    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }
}

/// Summary of one marketplace listing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceQuote {
    pub fiat: Currency,
    pub asset: Currency,
    pub trade_type: TradeType,
    /// Prices in listing order; never re-sorted.
    #[serde(with = "float_seq")]
    pub prices: Vec<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub average_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub median_price: Option<Decimal>,
    #[serde(rename = "timestamp")]
    pub observed_at: DateTime<Utc>,
}

/// One entry of the aggregated rate list served by the tiered cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub fuente: String,
    pub nombre: String,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub compra: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub venta: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub promedio: Option<Decimal>,
    #[serde(rename = "fechaActualizacion")]
    pub fecha_actualizacion: String,
}

/// Decimal lists as JSON number arrays, e.g. the stored `prices` column.
pub mod float_seq {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(transparent)]
    struct Float(#[serde(with = "rust_decimal::serde::float")] Decimal);

    pub fn serialize<S: Serializer>(values: &[Decimal], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().copied().map(Float))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Decimal>, D::Error> {
        let floats = Vec::<Float>::deserialize(deserializer)?;
        Ok(floats.into_iter().map(|f| f.0).collect())
    }

    pub fn to_json(values: &[Decimal]) -> serde_json::Result<String> {
        let floats: Vec<Float> = values.iter().copied().map(Float).collect();
        serde_json::to_string(&floats)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Vec<Decimal>> {
        let floats: Vec<Float> = serde_json::from_str(raw)?;
        Ok(floats.into_iter().map(|f| f.0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_currency_is_uppercased() {
        assert_eq!(Currency::new("usdt"), Currency::usdt());
        assert_eq!(Currency::from("ves").code(), "VES");
    }

    #[test]
    fn test_enum_round_trip_through_strings() {
        for source in [Source::Official, Source::Marketplace] {
            assert_eq!(source.as_str().parse::<Source>().unwrap(), source);
        }
        assert_eq!("p2p".parse::<RateType>().unwrap(), RateType::P2p);
        assert_eq!("sell".parse::<TradeType>().unwrap(), TradeType::Sell);
        assert!("binance".parse::<Source>().is_err());
    }

    #[test]
    fn test_quote_serializes_with_wire_names() {
        let quote = MarketplaceQuote {
            fiat: Currency::ves(),
            asset: Currency::usdt(),
            trade_type: TradeType::Buy,
            prices: vec![dec!(36.5)],
            average_price: Some(dec!(36.5)),
            median_price: Some(dec!(36.5)),
            observed_at: Utc::now(),
        };

        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["tradeType"], "BUY");
        assert_eq!(json["fiat"], "VES");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("averagePrice").is_some());
    }

    #[test]
    fn test_exchange_rate_accepts_missing_prices() {
        let raw = r#"{
            "fuente": "oficial",
            "nombre": "Oficial",
            "compra": null,
            "venta": null,
            "promedio": 36.42,
            "fechaActualizacion": "2024-03-01T00:00:00.000Z"
        }"#;

        let rate: ExchangeRate = serde_json::from_str(raw).unwrap();
        assert_eq!(rate.promedio, Some(dec!(36.42)));
        assert_eq!(rate.compra, None);
    }

    #[test]
    fn test_wire_decimals_stay_json_numbers() {
        let raw = r#"{"fuente":"oficial","nombre":"Oficial","compra":null,"venta":36.5,"promedio":36.42,"fechaActualizacion":"2024-03-01"}"#;
        let rate: ExchangeRate = serde_json::from_str(raw).unwrap();

        let json = serde_json::to_value(&rate).unwrap();
        assert!(json["promedio"].is_number());
        assert!(json["venta"].is_number());
        assert!(json["compra"].is_null());
        assert_eq!(serde_json::to_string(&rate).unwrap(), raw);

        let quote = MarketplaceQuote {
            fiat: Currency::ves(),
            asset: Currency::usdt(),
            trade_type: TradeType::Buy,
            prices: vec![dec!(38.10), dec!(36.50)],
            average_price: Some(dec!(37.3)),
            median_price: None,
            observed_at: Utc::now(),
        };
        let json = serde_json::to_value(&quote).unwrap();
        assert!(json["prices"][0].is_number());
        assert!(json["averagePrice"].is_number());
        assert!(json["medianPrice"].is_null());
    }

    #[test]
    fn test_price_column_is_a_number_array() {
        let stored = float_seq::to_json(&[dec!(38.10), dec!(36.50)]).unwrap();
        assert_eq!(stored, "[38.1,36.5]");
        assert_eq!(
            float_seq::from_json(&stored).unwrap(),
            vec![dec!(38.1), dec!(36.5)]
        );
        assert!(float_seq::from_json(r#"["38.10"]"#).is_err());
    }
}
