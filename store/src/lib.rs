//! RateFeed Store
//!
//! Durable state behind the pipeline: the singleton cached rate list, the
//! append-only marketplace quote log and the rate-sample history that backs
//! change detection.

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{CachedBlob, CurrentRates, PersistentStore, RateKey};
