//! Downstream sinks for readings.
//!
//! The pipeline only sees the `Publisher` capability; which sink is behind
//! it is decided once at startup from the broker configuration.

pub mod local;
pub mod mqtt;

pub use local::{LocalPublisher, PublishedMessage};
pub use mqtt::MqttPublisher;

use async_trait::async_trait;
use edgelink_common::{BrokerConfig, PublisherKind, Reading};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Errors a sink can report. None of them is fatal to the poller.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize reading: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    #[error("publisher closed")]
    Closed,
}

/// Capability set of a downstream sink.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Forward one reading. Returns once the sink has accepted it.
    async fn publish(&self, reading: &Reading) -> Result<(), PublishError>;

    /// Flush and disconnect, bounded in time. Safe to call more than once.
    async fn close(&self) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Wire payload for a reading: its JSON form.
pub fn encode(reading: &Reading) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(reading)?)
}

/// Build the sink selected in the broker configuration.
///
/// Must be called from inside a tokio runtime (the MQTT sink spawns its
/// connection task).
pub fn build_publisher(broker: &BrokerConfig) -> Result<Arc<dyn Publisher>, PublishError> {
    match broker.publisher {
        PublisherKind::Console => {
            info!(base_topic = %broker.base_topic, "using console publisher");
            Ok(Arc::new(LocalPublisher::console(&broker.base_topic)))
        }
        PublisherKind::Mqtt => {
            info!(url = %broker.mqtt_url, base_topic = %broker.base_topic, "using MQTT publisher");
            Ok(Arc::new(MqttPublisher::start(broker)?))
        }
    }
}
