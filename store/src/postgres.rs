//! Postgres-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratefeed_common::{
    float_seq, Currency, MarketplaceQuote, RateFeedError, RateSample, Result, Source, TradeType,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, info, instrument};

use crate::store::{CachedBlob, CurrentRates, PersistentStore};

/// Idempotent table definitions. Migration tooling is out of scope.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rates_cache (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        data TEXT NOT NULL,
        cached_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS binance_p2p_rates (
        id BIGSERIAL PRIMARY KEY,
        fiat TEXT NOT NULL,
        asset TEXT NOT NULL,
        trade_type TEXT NOT NULL,
        average_price NUMERIC,
        median_price NUMERIC,
        prices TEXT NOT NULL,
        "timestamp" TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_binance_p2p_rates_pair_time
        ON binance_p2p_rates (fiat, asset, "timestamp" DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rate_samples (
        id BIGSERIAL PRIMARY KEY,
        source TEXT NOT NULL,
        currency TEXT NOT NULL,
        rate_type TEXT NOT NULL,
        value NUMERIC NOT NULL,
        aux_value NUMERIC,
        raw_evidence TEXT NOT NULL,
        observed_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_rate_samples_latest
        ON rate_samples (source, currency, observed_at DESC)
    "#,
];

/// Singleton row id of the cached rate list.
const CACHE_ROW_ID: i32 = 1;

fn storage(err: sqlx::Error) -> RateFeedError {
    error!(error = %err, "Store query failed");
    RateFeedError::TransientStorage(err.to_string())
}

/// [`PersistentStore`] on a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a small pool to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(storage)?;

        info!("Connected to rate store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        }
        debug!(statements = SCHEMA.len(), "Schema ensured");
        Ok(())
    }

    fn quote_from_row(row: &PgRow) -> Result<MarketplaceQuote> {
        let prices: String = row.try_get("prices").map_err(storage)?;
        let trade_type: String = row.try_get("trade_type").map_err(storage)?;

        Ok(MarketplaceQuote {
            fiat: Currency::new(row.try_get::<String, _>("fiat").map_err(storage)?),
            asset: Currency::new(row.try_get::<String, _>("asset").map_err(storage)?),
            trade_type: trade_type.parse::<TradeType>()?,
            prices: float_seq::from_json(&prices)?,
            average_price: row.try_get("average_price").map_err(storage)?,
            median_price: row.try_get("median_price").map_err(storage)?,
            observed_at: row.try_get("timestamp").map_err(storage)?,
        })
    }
}

#[async_trait]
impl PersistentStore for PgStore {
    async fn load_cached_blob(&self) -> Result<Option<CachedBlob>> {
        let row = sqlx::query("SELECT data, cached_at FROM rates_cache WHERE id = $1")
            .bind(CACHE_ROW_ID)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(|row| {
            Ok(CachedBlob {
                data: row.try_get("data").map_err(storage)?,
                cached_at: row.try_get::<DateTime<Utc>, _>("cached_at").map_err(storage)?,
            })
        })
        .transpose()
    }

    #[instrument(skip(self, blob), fields(cached_at = %blob.cached_at))]
    async fn upsert_cached_blob(&self, blob: &CachedBlob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rates_cache (id, data, cached_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                data = EXCLUDED.data,
                cached_at = EXCLUDED.cached_at
            "#,
        )
        .bind(CACHE_ROW_ID)
        .bind(&blob.data)
        .bind(blob.cached_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn append_marketplace_quote(&self, quote: &MarketplaceQuote) -> Result<()> {
        let prices = float_seq::to_json(&quote.prices)?;

        sqlx::query(
            r#"
            INSERT INTO binance_p2p_rates
                (fiat, asset, trade_type, average_price, median_price, prices, "timestamp")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(quote.fiat.code())
        .bind(quote.asset.code())
        .bind(quote.trade_type.as_str())
        .bind(quote.average_price)
        .bind(quote.median_price)
        .bind(prices)
        .bind(quote.observed_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn latest_marketplace_quote(
        &self,
        fiat: &Currency,
        asset: &Currency,
    ) -> Result<Option<MarketplaceQuote>> {
        let history = self.marketplace_history(fiat, asset, 1).await?;
        Ok(history.into_iter().next())
    }

    async fn marketplace_history(
        &self,
        fiat: &Currency,
        asset: &Currency,
        limit: u32,
    ) -> Result<Vec<MarketplaceQuote>> {
        let rows = sqlx::query(
            r#"
            SELECT fiat, asset, trade_type, average_price, median_price, prices, "timestamp"
            FROM binance_p2p_rates
            WHERE fiat = $1 AND asset = $2
            ORDER BY "timestamp" DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(fiat.code())
        .bind(asset.code())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(Self::quote_from_row).collect()
    }

    async fn append_rate_sample(&self, sample: &RateSample) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rate_samples
                (source, currency, rate_type, value, aux_value, raw_evidence, observed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(sample.source.as_str())
        .bind(sample.currency.code())
        .bind(sample.rate_type.as_str())
        .bind(sample.value)
        .bind(sample.aux_value)
        .bind(sample.raw_evidence.to_string())
        .bind(sample.observed_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn last_known_value(
        &self,
        source: Source,
        currency: &Currency,
    ) -> Result<Option<Decimal>> {
        let row = sqlx::query(
            r#"
            SELECT value FROM rate_samples
            WHERE source = $1 AND currency = $2
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(source.as_str())
        .bind(currency.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(|row| row.try_get::<Decimal, _>("value").map_err(storage))
            .transpose()
    }

    async fn current_rates(&self) -> Result<CurrentRates> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (source, currency) source, currency, value
            FROM rate_samples
            ORDER BY source, currency, observed_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        let mut rates = CurrentRates::new();
        for row in rows {
            let source: String = row.try_get("source").map_err(storage)?;
            let currency: String = row.try_get("currency").map_err(storage)?;
            let value: Decimal = row.try_get("value").map_err(storage)?;
            rates.insert(source.parse()?, Currency::new(currency), value);
        }
        Ok(rates)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }
}
