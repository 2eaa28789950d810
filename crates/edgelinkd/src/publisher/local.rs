//! Process-local sink.
//!
//! Logs every reading and, when built with `recording()`, keeps a copy of
//! each message for inspection. Always succeeds.

use super::{encode, PublishError, Publisher};
use async_trait::async_trait;
use edgelink_common::{device_topic, Reading};
use std::sync::Mutex;
use tracing::info;

/// A message as it would have gone out on the wire.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    pub fn reading(&self) -> Result<Reading, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

pub struct LocalPublisher {
    base_topic: String,
    history: Option<Mutex<Vec<PublishedMessage>>>,
}

impl LocalPublisher {
    /// Log-only sink for environments without a broker
    pub fn console(base_topic: &str) -> Self {
        Self {
            base_topic: base_topic.to_string(),
            history: None,
        }
    }

    /// Sink that also keeps every message in memory
    pub fn recording(base_topic: &str) -> Self {
        Self {
            base_topic: base_topic.to_string(),
            history: Some(Mutex::new(Vec::new())),
        }
    }

    /// Messages recorded so far (empty for a console sink)
    pub fn published(&self) -> Vec<PublishedMessage> {
        match &self.history {
            Some(history) => history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone(),
            None => Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        match &self.history {
            Some(history) => history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .len(),
            None => 0,
        }
    }
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, reading: &Reading) -> Result<(), PublishError> {
        let topic = device_topic(&self.base_topic, &reading.device_id);
        info!(
            target: "edgelink::console",
            topic = %topic,
            ts = %reading.timestamp.format("%H:%M:%S"),
            metrics = ?reading.metrics,
            quality = %reading.quality,
            "reading"
        );

        if let Some(history) = &self.history {
            let payload = encode(reading)?;
            history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(PublishedMessage { topic, payload });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn reading(id: &str) -> Reading {
        let mut metrics = BTreeMap::new();
        metrics.insert("pressure_bar".to_string(), 6.25);
        Reading::new(id, metrics)
    }

    #[tokio::test]
    async fn test_recording_topic_and_payload() {
        let publisher = LocalPublisher::recording("plant");
        let r = reading("press-1");
        publisher.publish(&r).await.unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "plant/press-1");
        assert_eq!(published[0].reading().unwrap(), r);
    }

    #[tokio::test]
    async fn test_simulated_readings_survive_the_wire_exactly() {
        use crate::device::{Driver, PollContext, SimulatedDriver};
        use edgelink_common::DeviceSpec;
        use std::time::Duration;

        let spec = DeviceSpec::new(
            "press-1",
            "fake",
            Duration::from_secs(1),
            &["pressure_bar", "temp_c", "vibration_rms", "flow"],
        )
        .with_jitter(0.05);
        let mut driver = SimulatedDriver::with_seed(spec, 1);
        let publisher = LocalPublisher::recording("plant");

        let mut originals = Vec::new();
        for _ in 0..5_000 {
            let ctx = PollContext::with_budget(Duration::from_secs(1));
            let reading = driver.poll(&ctx).await.unwrap();
            publisher.publish(&reading).await.unwrap();
            originals.push(reading);
        }

        let published = publisher.published();
        assert_eq!(published.len(), originals.len());
        for (message, original) in published.iter().zip(&originals) {
            assert_eq!(message.reading().unwrap(), *original);
        }
    }

    #[tokio::test]
    async fn test_console_keeps_nothing() {
        let publisher = LocalPublisher::console("plant");
        publisher.publish(&reading("press-1")).await.unwrap();
        assert_eq!(publisher.count(), 0);
        assert!(publisher.published().is_empty());
    }
}
