//! Latest-value cache.
//!
//! One entry per device id, each holding the most recent reading. Entries
//! are `Arc<Reading>` swapped in whole, so a reader either sees the old
//! reading or the new one and never a partially written value. The map is
//! sharded, so writers for different devices do not serialize on one lock.

use dashmap::DashMap;
use edgelink_common::Reading;
use std::sync::Arc;

/// Capability set of a latest-reading store.
pub trait ReadingCache: Send + Sync {
    /// Replace whatever is stored for `reading.device_id`.
    fn set(&self, reading: Reading);

    /// Most recent reading for `device_id`, or `None` if never set.
    fn latest(&self, device_id: &str) -> Option<Arc<Reading>>;

    /// Every cached reading, sorted by device id.
    fn snapshot(&self) -> Vec<Arc<Reading>>;

    /// Number of devices with a cached reading.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory cache; lives for the whole process, no expiry or eviction.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Arc<Reading>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size for a known number of devices.
    pub fn with_capacity(devices: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(devices),
        }
    }
}

impl ReadingCache for MemoryCache {
    fn set(&self, reading: Reading) {
        self.entries
            .insert(reading.device_id.clone(), Arc::new(reading));
    }

    fn latest(&self, device_id: &str) -> Option<Arc<Reading>> {
        self.entries
            .get(device_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self) -> Vec<Arc<Reading>> {
        let mut readings: Vec<Arc<Reading>> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        readings.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        readings
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
