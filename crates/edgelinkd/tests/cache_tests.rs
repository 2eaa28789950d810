//! Concurrency tests for the latest-value cache

use edgelink_common::Reading;
use edgelinkd::pipeline::{MemoryCache, ReadingCache};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

const WRITES_PER_DEVICE: u64 = 2_000;

/// Every metric carries the same value, so a mix of two writes is detectable.
fn reading(device_id: &str, seq: u64) -> Reading {
    let mut metrics = BTreeMap::new();
    for name in ["pressure_bar", "temp_c", "vibration_rms", "seq"] {
        metrics.insert(name.to_string(), seq as f64);
    }
    Reading::new(device_id, metrics)
}

fn is_consistent(reading: &Reading) -> bool {
    let mut values = reading.metrics.values();
    match values.next() {
        Some(first) => reading.metrics.len() == 4 && values.all(|v| v == first),
        None => false,
    }
}

#[test]
fn test_concurrent_writers_and_readers() {
    let cache = Arc::new(MemoryCache::new());
    let devices: Vec<String> = (0..8).map(|i| format!("dev-{}", i)).collect();
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let devices = devices.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last_seen = vec![0.0_f64; devices.len()];
                while !done.load(Ordering::Acquire) {
                    for (i, id) in devices.iter().enumerate() {
                        if let Some(r) = cache.latest(id) {
                            assert_eq!(&r.device_id, id);
                            assert!(is_consistent(&r), "torn read: {:?}", r);
                            let seq = r.metric("seq").unwrap();
                            // One writer per device, so values never go backwards
                            assert!(seq >= last_seen[i]);
                            last_seen[i] = seq;
                        }
                    }
                }
            })
        })
        .collect();

    let writers: Vec<_> = devices
        .iter()
        .cloned()
        .map(|id| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for seq in 1..=WRITES_PER_DEVICE {
                    cache.set(reading(&id, seq));
                }
            })
        })
        .collect();

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(cache.len(), devices.len());
    for id in &devices {
        let latest = cache.latest(id).unwrap();
        assert_eq!(latest.metric("seq"), Some(WRITES_PER_DEVICE as f64));
    }
}

#[test]
fn test_last_write_wins() {
    let cache = MemoryCache::new();
    cache.set(reading("press-1", 1));
    cache.set(reading("press-1", 2));
    cache.set(reading("press-1", 3).with_quality("uncertain"));

    let latest = cache.latest("press-1").unwrap();
    assert_eq!(latest.metric("seq"), Some(3.0));
    assert!(!latest.is_good());
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_held_reading_survives_replacement() {
    let cache = MemoryCache::new();
    cache.set(reading("motor-7", 1));
    let held = cache.latest("motor-7").unwrap();

    cache.set(reading("motor-7", 2));

    assert_eq!(held.metric("seq"), Some(1.0));
    assert_eq!(cache.latest("motor-7").unwrap().metric("seq"), Some(2.0));
}

#[test]
fn test_snapshot_sorted_by_device() {
    let cache = MemoryCache::new();
    for id in ["press-1", "boiler-2", "motor-7"] {
        cache.set(reading(id, 1));
    }
    let ids: Vec<String> = cache
        .snapshot()
        .iter()
        .map(|r| r.device_id.clone())
        .collect();
    assert_eq!(ids, vec!["boiler-2", "motor-7", "press-1"]);
}
