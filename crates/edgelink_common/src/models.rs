//! Core data model: readings produced by devices and the static device specs
//! that drive the pollers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Quality tag for a reading taken without any known problem.
pub const QUALITY_GOOD: &str = "good";

/// One timestamped measurement snapshot from a device.
///
/// Readings are immutable once built; every poll produces a fresh value that
/// replaces the previous one in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    /// Capture time, always UTC, serialized as RFC-3339 with a `Z` suffix
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    /// Metric name -> value; the key set is fixed by the device spec
    pub metrics: BTreeMap<String, f64>,
    /// Opaque status string, minimally "good"
    pub quality: String,
}

impl Reading {
    /// Build a reading stamped now with quality "good".
    pub fn new(device_id: impl Into<String>, metrics: BTreeMap<String, f64>) -> Self {
        Self::at(device_id, Utc::now(), metrics)
    }

    /// Build a reading with an explicit capture time.
    pub fn at(
        device_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        metrics: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            timestamp,
            metrics,
            quality: QUALITY_GOOD.to_string(),
        }
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn is_good(&self) -> bool {
        self.quality == QUALITY_GOOD
    }
}

/// Static configuration for one field device.
///
/// Loaded once at startup and never changed; one poller is bound to exactly
/// one spec for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    /// Unique within a running instance
    pub id: String,

    /// Driver selector, e.g. "fake"
    #[serde(rename = "type")]
    pub device_type: String,

    /// Fixed polling cadence, e.g. "1s" or "250ms"
    #[serde(with = "humantime_serde")]
    pub poll_every: Duration,

    /// +/- fraction applied by simulated drivers (0.05 = 5%)
    #[serde(default)]
    pub jitter: f64,

    /// Ordered metric names this device reports
    #[serde(default)]
    pub metric_names: Vec<String>,
}

impl DeviceSpec {
    pub fn new(
        id: impl Into<String>,
        device_type: impl Into<String>,
        poll_every: Duration,
        metric_names: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            poll_every,
            jitter: 0.0,
            metric_names: metric_names.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deadline for a single poll attempt: half the polling interval.
    pub fn poll_budget(&self) -> Duration {
        self.poll_every / 2
    }
}

/// RFC-3339 timestamps that keep sub-second precision and always use `Z`.
mod rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Reading {
        let mut metrics = BTreeMap::new();
        metrics.insert("pressure_bar".to_string(), 6.234_567_891);
        metrics.insert("temp_c".to_string(), 71.5);
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        Reading::at("press-1", ts, metrics)
    }

    #[test]
    fn test_reading_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["device_id"], "press-1");
        assert_eq!(value["timestamp"], "2024-03-09T14:05:07.123456789Z");
        assert_eq!(value["metrics"]["temp_c"], 71.5);
        assert_eq!(value["quality"], "good");
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_reading_json_round_trip() {
        let reading = sample();
        let json = serde_json::to_string(&reading).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }

    #[test]
    fn test_reading_accepts_offset_timestamps() {
        let json = r#"{"device_id":"a","timestamp":"2024-01-01T02:00:00+02:00","metrics":{},"quality":"good"}"#;
        let reading: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_quality_helpers() {
        let reading = sample();
        assert!(reading.is_good());
        assert!(!reading.with_quality("stale").is_good());
    }

    #[test]
    fn test_device_spec_yaml() {
        let yaml = r#"
id: press-1
type: fake
poll_every: 1s
jitter: 0.05
metric_names: [pressure_bar]
"#;
        let spec: DeviceSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.id, "press-1");
        assert_eq!(spec.device_type, "fake");
        assert_eq!(spec.poll_every, Duration::from_secs(1));
        assert_eq!(spec.poll_budget(), Duration::from_millis(500));
        assert_eq!(spec.metric_names, vec!["pressure_bar".to_string()]);
    }

    #[test]
    fn test_device_spec_defaults() {
        let spec: DeviceSpec =
            serde_yaml::from_str("id: x\ntype: fake\npoll_every: 250ms\n").unwrap();
        assert_eq!(spec.jitter, 0.0);
        assert!(spec.metric_names.is_empty());
    }
}
