//! Metrics collection for pipeline monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::scheduler::RefreshTask;
use crate::tiered_cache::CacheTier;

/// Pipeline metrics.
pub struct Metrics {
    /// Ticks run.
    pub ticks_total: AtomicU64,
    /// Tasks that completed.
    pub tasks_succeeded: AtomicU64,
    /// Tasks that failed.
    pub tasks_failed: AtomicU64,
    /// Official-rate refreshes attempted.
    pub official_refreshes: AtomicU64,
    /// Marketplace samples attempted.
    pub marketplace_refreshes: AtomicU64,
    /// Cache write-path refreshes attempted.
    pub cache_refreshes: AtomicU64,
    /// Reads served by the in-process tier.
    pub cache_memory_hits: AtomicU64,
    /// Reads served by the persistent tier.
    pub cache_persistent_hits: AtomicU64,
    /// Reads served by the origin.
    pub cache_origin_hits: AtomicU64,
    /// Reads served from stale data.
    pub cache_stale_hits: AtomicU64,
    /// Reads that exhausted every tier.
    pub cache_unavailable: AtomicU64,
    /// Rate samples persisted after a detected change.
    pub samples_persisted: AtomicU64,
    /// Change notifications dispatched.
    pub notifications_sent: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            tasks_succeeded: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            official_refreshes: AtomicU64::new(0),
            marketplace_refreshes: AtomicU64::new(0),
            cache_refreshes: AtomicU64::new(0),
            cache_memory_hits: AtomicU64::new(0),
            cache_persistent_hits: AtomicU64::new(0),
            cache_origin_hits: AtomicU64::new(0),
            cache_stale_hits: AtomicU64::new(0),
            cache_unavailable: AtomicU64::new(0),
            samples_persisted: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
        }
    }

    /// Increment ticks.
    pub fn tick_started(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task start.
    pub fn task_started(&self, task: RefreshTask) {
        let counter = match task {
            RefreshTask::OfficialRate => &self.official_refreshes,
            RefreshTask::Marketplace => &self.marketplace_refreshes,
            RefreshTask::CacheRefresh => &self.cache_refreshes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that completed.
    pub fn task_succeeded(&self) {
        self.tasks_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that failed.
    pub fn task_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record which tier answered a read.
    pub fn cache_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Memory => &self.cache_memory_hits,
            CacheTier::Persistent => &self.cache_persistent_hits,
            CacheTier::Origin => &self.cache_origin_hits,
            CacheTier::MemoryStale | CacheTier::PersistentStale => &self.cache_stale_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that exhausted every tier.
    pub fn cache_miss(&self) {
        self.cache_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sample_persisted(&self) {
        self.samples_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_total: self.ticks_total.load(Ordering::Relaxed),
            tasks_succeeded: self.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            official_refreshes: self.official_refreshes.load(Ordering::Relaxed),
            marketplace_refreshes: self.marketplace_refreshes.load(Ordering::Relaxed),
            cache_refreshes: self.cache_refreshes.load(Ordering::Relaxed),
            cache_memory_hits: self.cache_memory_hits.load(Ordering::Relaxed),
            cache_persistent_hits: self.cache_persistent_hits.load(Ordering::Relaxed),
            cache_origin_hits: self.cache_origin_hits.load(Ordering::Relaxed),
            cache_stale_hits: self.cache_stale_hits.load(Ordering::Relaxed),
            cache_unavailable: self.cache_unavailable.load(Ordering::Relaxed),
            samples_persisted: self.samples_persisted.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("ticks_total", "Total scheduler ticks", s.ticks_total),
            ("tasks_succeeded", "Refresh tasks that completed", s.tasks_succeeded),
            ("tasks_failed", "Refresh tasks that failed", s.tasks_failed),
            ("official_refreshes", "Official-rate refreshes", s.official_refreshes),
            ("marketplace_refreshes", "Marketplace refreshes", s.marketplace_refreshes),
            ("cache_refreshes", "Cache write-path refreshes", s.cache_refreshes),
            ("cache_memory_hits", "Reads served in-process", s.cache_memory_hits),
            ("cache_persistent_hits", "Reads served by the store", s.cache_persistent_hits),
            ("cache_origin_hits", "Reads served by the origin", s.cache_origin_hits),
            ("cache_stale_hits", "Reads served from stale data", s.cache_stale_hits),
            ("cache_unavailable", "Reads that exhausted every tier", s.cache_unavailable),
            ("samples_persisted", "Rate samples persisted", s.samples_persisted),
            ("notifications_sent", "Change notifications dispatched", s.notifications_sent),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP ratefeed_{name} {help}\n# TYPE ratefeed_{name} counter\nratefeed_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub ticks_total: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub official_refreshes: u64,
    pub marketplace_refreshes: u64,
    pub cache_refreshes: u64,
    pub cache_memory_hits: u64,
    pub cache_persistent_hits: u64,
    pub cache_origin_hits: u64,
    pub cache_stale_hits: u64,
    pub cache_unavailable: u64,
    pub samples_persisted: u64,
    pub notifications_sent: u64,
}
