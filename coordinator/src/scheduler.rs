//! Wall-clock task selection.
//!
//! The scheduler does not own a timer. An external trigger calls
//! [`Scheduler::select`] once per tick, nominally every 15 minutes, and the
//! selection depends only on the local hour and the UTC minute.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ratefeed_common::{local_clock, local_hour, RateFeedError};
use serde::Serialize;

use crate::config::SchedulerConfig;

/// Marketplace refresh cadence, in local hours.
pub const MARKETPLACE_EVERY_HOURS: u32 = 4;

/// Minutes of the hour at which the cache write path runs.
pub const CACHE_REFRESH_MINUTES: [u32; 2] = [0, 30];

/// A unit of refresh work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshTask {
    /// Scrape and change-detect the official USD/EUR rates.
    OfficialRate,
    /// Sample the marketplace and change-detect the USDT median.
    Marketplace,
    /// Re-fetch the aggregated rate list into the cache tiers.
    CacheRefresh,
}

impl RefreshTask {
    pub const ALL: [RefreshTask; 3] = [
        RefreshTask::OfficialRate,
        RefreshTask::Marketplace,
        RefreshTask::CacheRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTask::OfficialRate => "official",
            RefreshTask::Marketplace => "marketplace",
            RefreshTask::CacheRefresh => "cache",
        }
    }
}

impl fmt::Display for RefreshTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshTask {
    type Err = RateFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "official" => Ok(RefreshTask::OfficialRate),
            "marketplace" => Ok(RefreshTask::Marketplace),
            "cache" => Ok(RefreshTask::CacheRefresh),
            other => Err(RateFeedError::validation(
                "task",
                format!("unknown task '{}'", other),
            )),
        }
    }
}

/// Selects the refresh tasks due at a given instant.
#[derive(Debug, Clone)]
pub struct Scheduler {
    offset_hours: i32,
    official_hours: Vec<u32>,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            offset_hours: config.local_offset_hours,
            official_hours: config.official_hours.clone(),
        }
    }

    pub fn offset_hours(&self) -> i32 {
        self.offset_hours
    }

    /// Tasks due at `now`.
    pub fn select(&self, now: DateTime<Utc>) -> Vec<RefreshTask> {
        let (hour, minute) = local_clock(now, self.offset_hours);
        self.select_local(hour, minute)
    }

    /// Tasks due at a UTC hour and minute.
    pub fn select_utc(&self, utc_hour: u32, minute: u32) -> Vec<RefreshTask> {
        self.select_local(local_hour(utc_hour, self.offset_hours), minute)
    }

    /// Tasks due at a local hour and minute.
    pub fn select_local(&self, local_hour: u32, minute: u32) -> Vec<RefreshTask> {
        let mut tasks = Vec::with_capacity(3);

        if self.official_hours.contains(&local_hour) {
            tasks.push(RefreshTask::OfficialRate);
        }
        if local_hour % MARKETPLACE_EVERY_HOURS == 0 {
            tasks.push(RefreshTask::Marketplace);
        }
        if CACHE_REFRESH_MINUTES.contains(&minute) {
            tasks.push(RefreshTask::CacheRefresh);
        }

        tasks
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}
