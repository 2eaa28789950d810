//! Ingestion pipeline: pollers feeding the latest-value cache and the
//! downstream publisher.

pub mod cache;
pub mod poller;

pub use cache::{MemoryCache, ReadingCache};
pub use poller::{Poller, PollerReport};
