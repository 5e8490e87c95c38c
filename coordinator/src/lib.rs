//! RateFeed Coordinator
//!
//! Decides when each refresh runs, serves the aggregated rate list through a
//! tiered cache, and records rates only when they change.

pub mod change_detector;
pub mod config;
pub mod metrics;
pub mod notification;
pub mod pipeline;
pub mod scheduler;
pub mod state;
pub mod supervisor;
pub mod tiered_cache;

pub use change_detector::{ChangeDetector, RateChange};
pub use config::ServiceConfig;
pub use notification::{ChangedRatesPayload, LogNotifier, NotificationTrigger};
pub use pipeline::{DatabaseStatus, HealthReport, RatePipeline};
pub use scheduler::{RefreshTask, Scheduler};
pub use state::PipelineState;
pub use supervisor::{Supervisor, TaskOutcome, TaskSummary, TickReport};
pub use tiered_cache::{CacheEntry, CacheRead, CacheTier, TieredRateCache};
