//! RateFeed Common Types
//!
//! Shared types used across the RateFeed workspace: currencies, rate samples,
//! marketplace quotes, the aggregated rate list, the error taxonomy and time
//! helpers.

pub mod error;
pub mod rates;
pub mod time;

pub use error::*;
pub use rates::*;
pub use time::*;
