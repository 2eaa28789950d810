//! Simulated device driver.
//!
//! Generates plausible values for well-known metric names and applies the
//! device's jitter fraction as multiplicative noise. Used for demos and tests
//! where no real field device is attached.

use super::{Driver, DriverError, PollContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use edgelink_common::{DeviceSpec, Reading};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::debug;

/// Driver that fabricates readings for a device spec.
pub struct SimulatedDriver {
    spec: DeviceSpec,
    rng: StdRng,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SimulatedDriver {
    pub fn new(spec: DeviceSpec) -> Self {
        Self {
            spec,
            rng: StdRng::from_entropy(),
            last_timestamp: None,
        }
    }

    /// Deterministic driver for tests
    pub fn with_seed(spec: DeviceSpec, seed: u64) -> Self {
        Self {
            spec,
            rng: StdRng::seed_from_u64(seed),
            last_timestamp: None,
        }
    }

    /// Base value range for a metric name
    fn base_value(&mut self, name: &str) -> f64 {
        let unit: f64 = self.rng.gen();
        match name {
            "temp_c" => 60.0 + unit * 20.0,
            "pressure_bar" => 6.0 + unit * 0.5,
            "vibration_rms" => 0.2 + unit * 0.05,
            _ => unit * 100.0,
        }
    }

    fn sample(&mut self) -> BTreeMap<String, f64> {
        let names = self.spec.metric_names.clone();
        let jitter = self.spec.jitter;
        let mut metrics = BTreeMap::new();
        for name in names {
            let base = self.base_value(&name);
            let value = if jitter > 0.0 {
                let noise: f64 = self.rng.gen_range(-1.0..=1.0);
                base * (1.0 + jitter * noise)
            } else {
                base
            };
            metrics.insert(name, value);
        }
        metrics
    }

    /// Never hand out a timestamp older than the previous one.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let ts = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(ts);
        ts
    }
}

#[async_trait]
impl Driver for SimulatedDriver {
    async fn poll(&mut self, ctx: &PollContext) -> Result<Reading, DriverError> {
        ctx.check()?;
        let metrics = self.sample();
        let timestamp = self.next_timestamp();
        Ok(Reading::at(self.spec.id.clone(), timestamp, metrics))
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        debug!(device = %self.spec.id, "simulated driver closed");
        Ok(())
    }
}
