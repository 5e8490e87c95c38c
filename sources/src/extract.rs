//! Extraction strategies for the official-rate publication page.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;

/// Rates found in a page. A zero value means "not found or invalid".
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRates {
    pub usd: Decimal,
    pub eur: Decimal,
    /// The literals the values were parsed from, for the sample evidence.
    pub usd_literal: Option<String>,
    pub eur_literal: Option<String>,
}

impl ExtractedRates {
    /// Both currencies parsed to a positive value.
    pub fn is_complete(&self) -> bool {
        self.usd > Decimal::ZERO && self.eur > Decimal::ZERO
    }

    pub fn evidence(&self, strategy: &str) -> serde_json::Value {
        json!({
            "strategy": strategy,
            "usd": self.usd_literal,
            "eur": self.eur_literal,
        })
    }
}

/// Turns the raw publication page into rates.
///
/// Implementations must not panic on unexpected markup; a missing marker is
/// reported as a zero value.
pub trait ExtractionStrategy: Send + Sync {
    /// Strategy name, recorded in the sample evidence.
    fn name(&self) -> &str;

    /// Extract the USD and EUR rates from an HTML document.
    fn extract(&self, html: &str) -> ExtractedRates;
}

static DOLAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<div[^>]*id="dolar"[^>]*>.*?<span>\s*USD\s*</span>.*?<strong>\s*([\d.,]+)"#)
        .expect("Invalid USD pattern")
});

static EURO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<div[^>]*id="euro"[^>]*>.*?<span>\s*EUR\s*</span>.*?<strong>\s*([\d.,]+)"#)
        .expect("Invalid EUR pattern")
});

/// Structural pattern matching: a currency block carrying its code label,
/// followed later by the numeric literal in a `<strong>` element.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtraction;

impl PatternExtraction {
    fn capture(pattern: &Regex, html: &str) -> Option<String> {
        pattern
            .captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl ExtractionStrategy for PatternExtraction {
    fn name(&self) -> &str {
        "pattern"
    }

    fn extract(&self, html: &str) -> ExtractedRates {
        let usd_literal = Self::capture(&DOLAR_PATTERN, html);
        let eur_literal = Self::capture(&EURO_PATTERN, html);

        ExtractedRates {
            usd: usd_literal.as_deref().map(parse_local_decimal).unwrap_or_default(),
            eur: eur_literal.as_deref().map(parse_local_decimal).unwrap_or_default(),
            usd_literal,
            eur_literal,
        }
    }
}

/// Parse a locally formatted number (`.` thousands, `,` decimals).
///
/// Returns zero for empty, non-numeric or non-positive input.
pub fn parse_local_decimal(value: &str) -> Decimal {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != '.' && !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match Decimal::from_str(&cleaned) {
        Ok(parsed) if parsed > Decimal::ZERO => parsed.normalize(),
        _ => Decimal::ZERO,
    }
}
