//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use ratefeed_common::{constants, DurationExt, DEFAULT_LOCAL_OFFSET_HOURS};
use ratefeed_sources::feed::DEFAULT_RATE_LIST_URL;
use ratefeed_sources::marketplace::DEFAULT_MARKETPLACE_URL;
use ratefeed_sources::official::{DEFAULT_FALLBACK_URL, DEFAULT_OFFICIAL_URL};

/// Upstream origin configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Official-rate publication page.
    pub official_url: String,
    /// Official-rate fallback API.
    pub fallback_url: String,
    /// Marketplace listing search endpoint.
    pub marketplace_url: String,
    /// Aggregated rate list served through the tiered cache.
    pub rate_list_url: String,
    /// Budget for a single origin request.
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            official_url: DEFAULT_OFFICIAL_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            marketplace_url: DEFAULT_MARKETPLACE_URL.to_string(),
            rate_list_url: DEFAULT_RATE_LIST_URL.to_string(),
            request_timeout: constants::request_timeout().as_std(),
        }
    }
}

/// Tiered cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age below which a cached rate list is served as primary.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::default_cache_ttl().as_std(),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed offset from UTC used to derive the local hour.
    pub local_offset_hours: i32,
    /// Local hours at which the official rate is refreshed.
    pub official_hours: Vec<u32>,
    /// External tick cadence.
    pub tick_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            local_offset_hours: DEFAULT_LOCAL_OFFSET_HOURS,
            official_hours: vec![9, 13, 17],
            tick_interval: constants::tick_interval().as_std(),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database URL.
    pub database_url: String,
    /// Origin configuration.
    pub sources: SourceConfig,
    /// Cache configuration.
    pub cache: CacheConfig,
    /// Scheduler configuration.
    pub scheduler: SchedulerConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/ratefeed".to_string(),
            sources: SourceConfig::default(),
            cache: CacheConfig::default(),
            scheduler: SchedulerConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse a comma-separated list of hours, skipping malformed entries.
pub fn parse_hours(value: &str) -> Vec<u32> {
    let mut hours: Vec<u32> = value
        .split(',')
        .filter_map(|h| h.trim().parse().ok())
        .collect();
    hours.sort_unstable();
    hours.dedup();
    hours
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(url) = std::env::var("OFFICIAL_RATE_URL") {
            config.sources.official_url = url;
        }

        if let Ok(url) = std::env::var("OFFICIAL_FALLBACK_URL") {
            config.sources.fallback_url = url;
        }

        if let Ok(url) = std::env::var("MARKETPLACE_URL") {
            config.sources.marketplace_url = url;
        }

        if let Ok(url) = std::env::var("DOLAR_API_URL") {
            config.sources.rate_list_url = url;
        }

        if let Some(secs) = env_parse::<u64>("REQUEST_TIMEOUT_SECS") {
            config.sources.request_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse::<u64>("CACHE_TTL_SECONDS") {
            config.cache.ttl = Duration::from_secs(secs);
        }

        if let Some(offset) = env_parse::<i32>("LOCAL_UTC_OFFSET_HOURS") {
            config.scheduler.local_offset_hours = offset;
        }

        if let Ok(hours) = std::env::var("OFFICIAL_REFRESH_HOURS") {
            let hours = parse_hours(&hours);
            if !hours.is_empty() {
                config.scheduler.official_hours = hours;
            }
        }

        if let Some(secs) = env_parse::<u64>("TICK_INTERVAL_SECS") {
            config.scheduler.tick_interval = Duration::from_secs(secs);
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        let urls = [
            ("official", &self.sources.official_url),
            ("fallback", &self.sources.fallback_url),
            ("marketplace", &self.sources.marketplace_url),
            ("rate list", &self.sources.rate_list_url),
        ];
        if let Some((name, _)) = urls.iter().find(|(_, url)| url.is_empty()) {
            return Err(format!("The {} URL cannot be empty", name));
        }

        if self.sources.request_timeout.is_zero() {
            return Err("Request timeout cannot be 0".to_string());
        }

        if self.cache.ttl.is_zero() {
            return Err("Cache TTL cannot be 0".to_string());
        }

        if !(-14..=14).contains(&self.scheduler.local_offset_hours) {
            return Err(format!(
                "Local UTC offset {} is out of range",
                self.scheduler.local_offset_hours
            ));
        }

        if let Some(hour) = self.scheduler.official_hours.iter().find(|h| **h >= 24) {
            return Err(format!("Official refresh hour {} is out of range", hour));
        }

        if self.scheduler.tick_interval.is_zero() {
            return Err("Tick interval cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.local_offset_hours, -4);
        assert!(config.scheduler.official_hours.contains(&9));
        assert!(!config.scheduler.official_hours.contains(&10));
        assert_eq!(config.cache.ttl, Duration::from_secs(300));
        assert_eq!(config.scheduler.tick_interval, Duration::from_secs(15 * 60));
        assert_eq!(config.sources.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.cache.ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.scheduler.official_hours = vec![9, 24];
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.sources.marketplace_url.clear();
        assert_eq!(
            config.validate().unwrap_err(),
            "The marketplace URL cannot be empty"
        );
    }

    #[test]
    fn test_parse_hours() {
        assert_eq!(parse_hours("17, 9,13,9"), vec![9, 13, 17]);
        assert_eq!(parse_hours("nine,10"), vec![10]);
        assert!(parse_hours("").is_empty());
    }
}
